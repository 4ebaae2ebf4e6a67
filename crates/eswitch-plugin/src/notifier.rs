//! Agent notifications.
//!
//! The plugin tells the switch about port state changes after its own
//! transaction has committed. A failed notification is the caller's to log;
//! it never undoes the database change.

use async_trait::async_trait;
use eswitch_client::ControlChannel;
use eswitch_common::EswitchConfig;
use eswitch_types::protocol::VnicInfo;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::bindings::NetworkBinding;
use crate::error::Result;
use crate::model::Port;

#[async_trait]
pub trait AgentNotifier: Send + Sync {
    /// Port admin state changed.
    async fn port_update(&self, port: &Port, binding: &NetworkBinding) -> Result<()>;

    /// Port was deleted.
    async fn port_release(&self, port: &Port, binding: &NetworkBinding) -> Result<()>;

    /// vNICs the switch currently has attached.
    async fn attached_vnics(&self) -> Result<Vec<VnicInfo>>;
}

/// Notifier that drives eswitchd over the control channel. The physical
/// network of a port's network is the fabric it lives on.
pub struct EswitchNotifier {
    channel: Mutex<ControlChannel>,
}

impl EswitchNotifier {
    pub fn new(channel: ControlChannel) -> Self {
        Self { channel: Mutex::new(channel) }
    }

    pub fn from_config(config: &EswitchConfig) -> Self {
        Self::new(ControlChannel::from_config(config))
    }
}

#[async_trait]
impl AgentNotifier for EswitchNotifier {
    #[instrument(skip_all, fields(port = %port.id, mac = %port.mac_address))]
    async fn port_update(&self, port: &Port, binding: &NetworkBinding) -> Result<()> {
        let Some(fabric) = binding.physical_network.as_deref() else {
            debug!("Local network, nothing to notify");
            return Ok(());
        };

        let mut channel = self.channel.lock().await;
        if port.admin_state_up {
            if binding.network_type.is_segmented() {
                channel.set_port_vlan(fabric, port.mac_address, binding.segmentation_id).await?;
            }
            channel.port_up(fabric, port.mac_address).await?;
        } else {
            channel.port_down(fabric, port.mac_address).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(port = %port.id, mac = %port.mac_address))]
    async fn port_release(&self, port: &Port, binding: &NetworkBinding) -> Result<()> {
        let Some(fabric) = binding.physical_network.as_deref() else {
            return Ok(());
        };
        self.channel.lock().await.port_release(fabric, port.mac_address).await?;
        Ok(())
    }

    async fn attached_vnics(&self) -> Result<Vec<VnicInfo>> {
        Ok(self.channel.lock().await.get_attached_vnics().await?)
    }
}
