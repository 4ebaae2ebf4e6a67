//! VIF driver.
//!
//! Plugs guest vNICs by asking the control daemon for a device on the
//! configured fabric and describing it as a guest device.

use eswitch_common::EswitchConfig;
use eswitch_types::{MacAddress, PciAddress, VnicType};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channel::ControlChannel;
use crate::error::VifError;
use crate::guest_config::GuestDevice;

pub struct VifDriver {
    channel: Mutex<ControlChannel>,
    fabric: String,
    vnic_type: VnicType,
}

impl VifDriver {
    pub fn new(channel: ControlChannel, fabric: impl Into<String>, vnic_type: VnicType) -> Self {
        Self { channel: Mutex::new(channel), fabric: fabric.into(), vnic_type }
    }

    pub fn from_config(config: &EswitchConfig) -> Self {
        Self::new(ControlChannel::from_config(config), config.vif.fabric.clone(), config.vif.vnic_type)
    }

    pub fn fabric(&self) -> &str {
        &self.fabric
    }

    pub fn vnic_type(&self) -> VnicType {
        self.vnic_type
    }

    /// Allocates a device for `mac` on behalf of `instance`.
    pub async fn plug(&self, instance: &str, mac: MacAddress) -> Result<GuestDevice, VifError> {
        let dev = self
            .channel
            .lock()
            .await
            .allocate_virtual_interface(mac, instance, &self.fabric, self.vnic_type, None)
            .await
            .map_err(|source| VifError::CreateFailed { instance: instance.to_string(), source })?;

        let device = match self.vnic_type {
            VnicType::Direct => GuestDevice::Interface { mac, dev },
            VnicType::Hostdev => match dev.parse::<PciAddress>() {
                Ok(address) => GuestDevice::HostDev { address },
                Err(_) => {
                    self.unplug(instance, mac).await;
                    return Err(VifError::InvalidDevice { dev, vnic_type: self.vnic_type.to_string() });
                }
            },
        };
        info!(instance, %mac, dev = %device.dev(), "Plugged vNIC");
        Ok(device)
    }

    /// Releases the device of `mac`. Failures are logged, not returned.
    pub async fn unplug(&self, instance: &str, mac: MacAddress) -> bool {
        match self.channel.lock().await.deallocate(mac, &self.fabric).await {
            Ok(dev) => {
                info!(instance, %mac, dev = %dev, "Unplugged vNIC");
                true
            }
            Err(e) => {
                warn!(instance, %mac, error = %e, "Failed while unplugging vNIC");
                false
            }
        }
    }
}
