//! Resource manager.
//!
//! Ties the device topology reader to the pool store: fabrics are registered
//! by physical function interface, and at startup allocations are rebuilt
//! from what the hypervisor reports as attached.

use eswitch_types::MacAddress;
use tracing::{debug, info, instrument, warn};

use crate::device_db::{Allocation, DeviceDb, DeviceKind, DeviceOwner, FabricInfo, RefreshReport};
use crate::error::{EswitchdError, Result};
use crate::hypervisor::{DomainInterface, DomainSource};
use crate::pci_utils::PciUtils;

/// Attached device classified to its fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub dev: String,
    pub mac: MacAddress,
    pub fabric: String,
    pub device_id: String,
}

/// Outcome of [`ResourceManager::scan_attached_devices`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachedScan {
    pub attached: Vec<AttachedDevice>,
    /// Interfaces on host devices no registered fabric owns.
    pub unmatched: Vec<DomainInterface>,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<AttachedDevice>,
    /// Attachments that could not be recorded (device already held, or no
    /// longer pooled).
    pub skipped: Vec<AttachedDevice>,
    pub unmatched: Vec<DomainInterface>,
}

pub struct ResourceManager {
    pci: PciUtils,
    db: DeviceDb,
}

impl ResourceManager {
    pub fn new(pci: PciUtils) -> Self {
        Self { pci, db: DeviceDb::new() }
    }

    pub fn pci(&self) -> &PciUtils {
        &self.pci
    }

    pub fn db(&self) -> &DeviceDb {
        &self.db
    }

    /// Registers `fabric` behind physical function interface `pf` and pools
    /// every device discovered on its port.
    #[instrument(skip(self))]
    pub fn add_fabric(&self, fabric: &str, pf: &str) -> Result<usize> {
        let details = self
            .pci
            .pf_details(pf)
            .ok_or_else(|| EswitchdError::PfNotFound(pf.to_string()))?;
        let devices = self.pci.discover_devices(&details.pci_id, details.hca_port);
        debug!(eths = ?devices.eths, vfs = devices.vfs.len(), "Discovered devices");

        self.db.add_fabric(
            FabricInfo {
                name: fabric.to_string(),
                pf: pf.to_string(),
                pci_id: details.pci_id,
                hca_port: details.hca_port,
            },
            devices,
        )
    }

    /// Rediscovers the devices of a registered fabric.
    #[instrument(skip(self))]
    pub fn refresh_fabric(&self, fabric: &str) -> Result<RefreshReport> {
        let info = self
            .db
            .fabric_info(fabric)
            .ok_or_else(|| EswitchdError::FabricNotFound(fabric.to_string()))?;
        let devices = self.pci.discover_devices(&info.pci_id, info.hca_port);
        self.db.replace_devices(fabric, devices)
    }

    pub fn remove_fabric(&self, fabric: &str) -> Result<FabricInfo> {
        self.db.remove_fabric(fabric)
    }

    pub fn allocate_device(
        &self,
        fabric: &str,
        want_virtual_function: bool,
        dev: Option<&str>,
        owner: Option<DeviceOwner>,
    ) -> Result<String> {
        self.db.allocate_device(fabric, kind_of(want_virtual_function), dev, owner)
    }

    pub fn deallocate_device(&self, fabric: &str, want_virtual_function: bool, dev: &str) -> Result<()> {
        self.db.deallocate_device(fabric, kind_of(want_virtual_function), dev)
    }

    /// [`allocate_device`](Self::allocate_device) collapsed to an option;
    /// the cause of a failure is logged.
    pub fn try_allocate_device(
        &self,
        fabric: &str,
        want_virtual_function: bool,
        dev: Option<&str>,
        owner: Option<DeviceOwner>,
    ) -> Option<String> {
        match self.allocate_device(fabric, want_virtual_function, dev, owner) {
            Ok(dev) => Some(dev),
            Err(e) => {
                warn!(fabric, ?dev, error = %e, "Device allocation failed");
                None
            }
        }
    }

    /// [`deallocate_device`](Self::deallocate_device) collapsed to a flag.
    pub fn try_deallocate_device(&self, fabric: &str, want_virtual_function: bool, dev: &str) -> bool {
        match self.deallocate_device(fabric, want_virtual_function, dev) {
            Ok(()) => true,
            Err(e) => {
                warn!(fabric, dev, error = %e, "Device deallocation failed");
                false
            }
        }
    }

    pub fn get_free_devices(&self, fabric: &str) -> Result<Vec<String>> {
        self.db.get_free_devices(fabric)
    }

    pub fn get_free_eths(&self, fabric: &str) -> Result<Vec<String>> {
        self.db.get_free_eths(fabric)
    }

    pub fn get_free_vfs(&self, fabric: &str) -> Result<Vec<String>> {
        self.db.get_free_vfs(fabric)
    }

    pub fn get_fabric_for_dev(&self, dev: &str) -> Option<String> {
        self.db.get_dev_fabric(dev)
    }

    pub fn get_fabric_pf(&self, fabric: &str) -> Option<String> {
        self.db.get_pf(fabric)
    }

    pub fn fabrics(&self) -> Vec<String> {
        self.db.fabrics()
    }

    pub fn find_by_mac(&self, mac: &MacAddress) -> Option<Allocation> {
        self.db.find_by_mac(mac)
    }

    /// Classifies interfaces attached to running domains by the fabric of
    /// their backing device. Interfaces on devices no fabric owns are
    /// returned in `unmatched`.
    pub async fn scan_attached_devices(&self, source: &dyn DomainSource) -> Result<AttachedScan> {
        let interfaces = source.attached_interfaces().await?;
        let mut scan = AttachedScan::default();

        for iface in interfaces {
            match self.db.get_dev_fabric(&iface.source_dev) {
                Some(fabric) => scan.attached.push(AttachedDevice {
                    dev: iface.source_dev,
                    mac: iface.mac,
                    fabric,
                    device_id: iface.device_id,
                }),
                None => {
                    warn!(
                        dev = %iface.source_dev,
                        mac = %iface.mac,
                        domain = %iface.device_id,
                        "No fabric found for attached device"
                    );
                    scan.unmatched.push(iface);
                }
            }
        }

        info!(attached = scan.attached.len(), unmatched = scan.unmatched.len(), "Scanned attached devices");
        Ok(scan)
    }

    /// Marks scanned attachments allocated. A device is never handed to a
    /// second owner: attachments that collide are reported in `skipped`.
    pub fn restore_allocations(&self, attached: &[AttachedDevice]) -> RestoreReport {
        let mut report = RestoreReport::default();

        for device in attached {
            let Some(kind) = self.db.device_kind(&device.fabric, &device.dev) else {
                report.skipped.push(device.clone());
                continue;
            };
            let owner = DeviceOwner::new(device.mac, Some(device.device_id.clone()));
            match self.db.allocate_device(&device.fabric, kind, Some(&device.dev), Some(owner)) {
                Ok(_) => report.restored.push(device.clone()),
                Err(e) => {
                    warn!(dev = %device.dev, mac = %device.mac, error = %e, "Cannot restore allocation");
                    report.skipped.push(device.clone());
                }
            }
        }

        info!(
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            "Restored allocations"
        );
        report
    }
}

fn kind_of(want_virtual_function: bool) -> DeviceKind {
    if want_virtual_function {
        DeviceKind::Vf
    } else {
        DeviceKind::Eth
    }
}
