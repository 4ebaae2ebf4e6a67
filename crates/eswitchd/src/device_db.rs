//! Device pool store.
//!
//! Tracks, per fabric, the physical function it hangs off and the Ethernet
//! devices and virtual functions discovered behind it, each either free or
//! allocated. Every fabric pool sits behind its own mutex so allocate and
//! deallocate on one fabric are serialized without blocking other fabrics.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use eswitch_types::{MacAddress, VnicType};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{EswitchdError, Result};
use crate::pci_utils::DiscoveredDevices;

/// Kind of pooled device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Ethernet netdev, used by direct vNICs.
    Eth,
    /// Virtual function, used by hostdev vNICs.
    Vf,
}

impl From<VnicType> for DeviceKind {
    fn from(vnic_type: VnicType) -> Self {
        if vnic_type.wants_virtual_function() {
            DeviceKind::Vf
        } else {
            DeviceKind::Eth
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Eth => f.write_str("eth"),
            DeviceKind::Vf => f.write_str("vf"),
        }
    }
}

/// Consumer holding an allocated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOwner {
    pub mac: MacAddress,
    /// VM the vNIC belongs to, when known.
    pub device_id: Option<String>,
}

impl DeviceOwner {
    pub fn new(mac: MacAddress, device_id: Option<String>) -> Self {
        Self { mac, device_id }
    }
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    kind: DeviceKind,
    owner: Option<DeviceOwner>,
    allocated: bool,
}

impl DeviceEntry {
    fn free(kind: DeviceKind) -> Self {
        Self { kind, owner: None, allocated: false }
    }
}

/// Fabric identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricInfo {
    pub name: String,
    /// Host interface of the physical function.
    pub pf: String,
    /// `domain:bus:slot` of the physical function.
    pub pci_id: String,
    /// 1-indexed HCA port.
    pub hca_port: u32,
}

#[derive(Debug)]
struct FabricPool {
    info: FabricInfo,
    devices: BTreeMap<String, DeviceEntry>,
}

impl FabricPool {
    fn free_of(&self, kind: Option<DeviceKind>) -> Vec<String> {
        self.devices
            .iter()
            .filter(|(_, e)| !e.allocated && kind.map_or(true, |k| e.kind == k))
            .map(|(dev, _)| dev.clone())
            .collect()
    }
}

/// Outcome of [`DeviceDb::replace_devices`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Devices that vanished from the device tree while allocated; they stay
    /// in the pool until released.
    pub missing_allocated: Vec<String>,
}

/// Snapshot of one allocated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub fabric: String,
    pub dev: String,
    pub kind: DeviceKind,
    pub owner: Option<DeviceOwner>,
}

type SharedPool = Arc<Mutex<FabricPool>>;

/// Fabric → device pool map.
#[derive(Debug, Default)]
pub struct DeviceDb {
    fabrics: RwLock<HashMap<String, SharedPool>>,
}

impl DeviceDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, fabric: &str) -> Result<SharedPool> {
        self.fabrics
            .read()
            .get(fabric)
            .cloned()
            .ok_or_else(|| EswitchdError::FabricNotFound(fabric.to_string()))
    }

    /// Registers a fabric with its discovered devices, all free.
    ///
    /// Devices already pooled by another fabric are skipped so a device never
    /// belongs to two fabrics. Returns the number of pooled devices.
    pub fn add_fabric(&self, info: FabricInfo, devices: DiscoveredDevices) -> Result<usize> {
        let mut fabrics = self.fabrics.write();
        if fabrics.contains_key(&info.name) {
            return Err(EswitchdError::FabricExists(info.name));
        }

        let taken: HashSet<String> = fabrics
            .values()
            .flat_map(|pool| pool.lock().devices.keys().cloned().collect::<Vec<_>>())
            .collect();

        let mut pooled = BTreeMap::new();
        let candidates = devices
            .eths
            .into_iter()
            .map(|eth| (eth, DeviceKind::Eth))
            .chain(devices.vfs.into_iter().map(|vf| (vf.to_string(), DeviceKind::Vf)));
        for (dev, kind) in candidates {
            if taken.contains(&dev) {
                warn!(fabric = %info.name, dev = %dev, "Device already pooled by another fabric, skipping");
                continue;
            }
            pooled.insert(dev, DeviceEntry::free(kind));
        }

        let count = pooled.len();
        info!(
            fabric = %info.name,
            pf = %info.pf,
            pci_id = %info.pci_id,
            hca_port = info.hca_port,
            devices = count,
            "Added fabric"
        );
        fabrics.insert(
            info.name.clone(),
            Arc::new(Mutex::new(FabricPool { info, devices: pooled })),
        );
        Ok(count)
    }

    /// Removes a fabric and its pool. Allocated devices are dropped with a
    /// warning; their owners keep the hardware until they unplug.
    pub fn remove_fabric(&self, fabric: &str) -> Result<FabricInfo> {
        let pool = self
            .fabrics
            .write()
            .remove(fabric)
            .ok_or_else(|| EswitchdError::FabricNotFound(fabric.to_string()))?;
        let pool = pool.lock();
        let allocated = pool.devices.values().filter(|e| e.allocated).count();
        if allocated > 0 {
            warn!(fabric, allocated, "Removed fabric with allocated devices");
        }
        Ok(pool.info.clone())
    }

    /// Rescans a fabric: new devices are added free, vanished free devices
    /// are dropped, vanished allocated devices are kept.
    pub fn replace_devices(&self, fabric: &str, devices: DiscoveredDevices) -> Result<RefreshReport> {
        let fabrics = self.fabrics.read();
        let pool = fabrics
            .get(fabric)
            .ok_or_else(|| EswitchdError::FabricNotFound(fabric.to_string()))?;

        let taken: HashSet<String> = fabrics
            .iter()
            .filter(|(name, _)| name.as_str() != fabric)
            .flat_map(|(_, p)| p.lock().devices.keys().cloned().collect::<Vec<_>>())
            .collect();

        let mut fresh: BTreeMap<String, DeviceKind> = devices
            .eths
            .into_iter()
            .map(|eth| (eth, DeviceKind::Eth))
            .chain(devices.vfs.into_iter().map(|vf| (vf.to_string(), DeviceKind::Vf)))
            .filter(|(dev, _)| !taken.contains(dev))
            .collect();

        let mut report = RefreshReport::default();
        let mut pool = pool.lock();
        pool.devices.retain(|dev, entry| {
            if fresh.remove(dev).is_some() {
                true
            } else if entry.allocated {
                report.missing_allocated.push(dev.clone());
                true
            } else {
                report.removed.push(dev.clone());
                false
            }
        });
        for (dev, kind) in fresh {
            report.added.push(dev.clone());
            pool.devices.insert(dev, DeviceEntry::free(kind));
        }

        if !report.missing_allocated.is_empty() {
            warn!(fabric, missing = ?report.missing_allocated, "Allocated devices no longer present");
        }
        debug!(fabric, added = report.added.len(), removed = report.removed.len(), "Refreshed fabric");
        Ok(report)
    }

    /// Allocates a device of `kind`.
    ///
    /// With `dev` set, exactly that device transitions free → allocated;
    /// otherwise any free device of the kind is taken.
    pub fn allocate_device(
        &self,
        fabric: &str,
        kind: DeviceKind,
        dev: Option<&str>,
        owner: Option<DeviceOwner>,
    ) -> Result<String> {
        let pool = self.pool(fabric)?;
        let mut pool = pool.lock();

        let chosen = match dev {
            Some(dev) => {
                let entry = pool
                    .devices
                    .get(dev)
                    .filter(|e| e.kind == kind)
                    .ok_or_else(|| EswitchdError::device_not_found(fabric, dev))?;
                if entry.allocated {
                    return Err(EswitchdError::already_allocated(fabric, dev));
                }
                dev.to_string()
            }
            None => pool
                .devices
                .iter()
                .find(|(_, e)| !e.allocated && e.kind == kind)
                .map(|(dev, _)| dev.clone())
                .ok_or_else(|| EswitchdError::PoolExhausted { fabric: fabric.to_string(), kind })?,
        };

        if let Some(entry) = pool.devices.get_mut(&chosen) {
            entry.allocated = true;
            entry.owner = owner;
        }
        debug!(fabric, dev = %chosen, %kind, "Allocated device");
        Ok(chosen)
    }

    /// Returns a device to the pool. Releasing a free device is a no-op.
    pub fn deallocate_device(&self, fabric: &str, kind: DeviceKind, dev: &str) -> Result<()> {
        let pool = self.pool(fabric)?;
        let mut pool = pool.lock();

        let entry = pool
            .devices
            .get_mut(dev)
            .filter(|e| e.kind == kind)
            .ok_or_else(|| EswitchdError::device_not_found(fabric, dev))?;
        if !entry.allocated {
            debug!(fabric, dev, "Device already free");
            return Ok(());
        }
        entry.allocated = false;
        entry.owner = None;
        debug!(fabric, dev, %kind, "Deallocated device");
        Ok(())
    }

    pub fn get_free_devices(&self, fabric: &str) -> Result<Vec<String>> {
        Ok(self.pool(fabric)?.lock().free_of(None))
    }

    pub fn get_free_eths(&self, fabric: &str) -> Result<Vec<String>> {
        Ok(self.pool(fabric)?.lock().free_of(Some(DeviceKind::Eth)))
    }

    pub fn get_free_vfs(&self, fabric: &str) -> Result<Vec<String>> {
        Ok(self.pool(fabric)?.lock().free_of(Some(DeviceKind::Vf)))
    }

    /// Fabric pooling `dev`, if any.
    pub fn get_dev_fabric(&self, dev: &str) -> Option<String> {
        self.fabrics
            .read()
            .iter()
            .find(|(_, pool)| pool.lock().devices.contains_key(dev))
            .map(|(name, _)| name.clone())
    }

    /// Kind of `dev` within `fabric`.
    pub fn device_kind(&self, fabric: &str, dev: &str) -> Option<DeviceKind> {
        self.pool(fabric).ok()?.lock().devices.get(dev).map(|e| e.kind)
    }

    pub fn get_pf(&self, fabric: &str) -> Option<String> {
        self.fabric_info(fabric).map(|info| info.pf)
    }

    pub fn fabric_info(&self, fabric: &str) -> Option<FabricInfo> {
        self.pool(fabric).ok().map(|pool| pool.lock().info.clone())
    }

    pub fn fabrics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fabrics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every allocated device, across fabrics.
    pub fn allocations(&self) -> Vec<Allocation> {
        let fabrics = self.fabrics.read();
        let mut out = Vec::new();
        for (name, pool) in fabrics.iter() {
            let pool = pool.lock();
            out.extend(pool.devices.iter().filter(|(_, e)| e.allocated).map(|(dev, e)| Allocation {
                fabric: name.clone(),
                dev: dev.clone(),
                kind: e.kind,
                owner: e.owner.clone(),
            }));
        }
        out.sort_by(|a, b| (&a.fabric, &a.dev).cmp(&(&b.fabric, &b.dev)));
        out
    }

    /// Allocation held by the vNIC with `mac`, if any.
    pub fn find_by_mac(&self, mac: &MacAddress) -> Option<Allocation> {
        self.allocations()
            .into_iter()
            .find(|a| a.owner.as_ref().is_some_and(|o| &o.mac == mac))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Barrier;
    use std::thread;

    fn info(name: &str) -> FabricInfo {
        FabricInfo {
            name: name.to_string(),
            pf: "eth2".to_string(),
            pci_id: "0000:08:00".to_string(),
            hca_port: 1,
        }
    }

    fn devices() -> DiscoveredDevices {
        DiscoveredDevices {
            eths: vec!["eth4".into(), "eth5".into()],
            vfs: vec!["0000:08:00.3".parse().unwrap(), "0000:08:00.4".parse().unwrap()],
        }
    }

    fn db() -> DeviceDb {
        let db = DeviceDb::new();
        db.add_fabric(info("default"), devices()).unwrap();
        db
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0xfa, 0x16, 0x3e, 0, 0, last])
    }

    #[test]
    fn test_add_fabric_marks_everything_free() {
        let db = db();
        assert_eq!(db.get_free_eths("default").unwrap(), vec!["eth4", "eth5"]);
        assert_eq!(db.get_free_vfs("default").unwrap(), vec!["0000:08:00.3", "0000:08:00.4"]);
        assert_eq!(db.get_free_devices("default").unwrap().len(), 4);
        assert_eq!(db.get_pf("default"), Some("eth2".to_string()));
    }

    #[test]
    fn test_duplicate_fabric_rejected() {
        let db = db();
        let err = db.add_fabric(info("default"), devices()).unwrap_err();
        assert!(matches!(err, EswitchdError::FabricExists(name) if name == "default"));
        assert_eq!(db.get_free_devices("default").unwrap().len(), 4);
    }

    #[test]
    fn test_device_joins_only_one_fabric() {
        let db = db();
        let pooled = db.add_fabric(info("other"), devices()).unwrap();
        assert_eq!(pooled, 0);
        assert_eq!(db.get_dev_fabric("eth4"), Some("default".to_string()));
    }

    #[test]
    fn test_allocate_any_and_exhaust() {
        let db = db();
        let a = db.allocate_device("default", DeviceKind::Vf, None, None).unwrap();
        let b = db.allocate_device("default", DeviceKind::Vf, None, None).unwrap();
        assert_ne!(a, b);
        let err = db.allocate_device("default", DeviceKind::Vf, None, None).unwrap_err();
        assert!(matches!(err, EswitchdError::PoolExhausted { kind: DeviceKind::Vf, .. }));
        assert_eq!(db.get_free_eths("default").unwrap().len(), 2);
    }

    #[test]
    fn test_allocate_specific() {
        let db = db();
        let owner = DeviceOwner::new(mac(1), Some("vm-1".into()));
        assert_eq!(
            db.allocate_device("default", DeviceKind::Eth, Some("eth5"), Some(owner.clone())).unwrap(),
            "eth5"
        );
        let err = db.allocate_device("default", DeviceKind::Eth, Some("eth5"), None).unwrap_err();
        assert!(matches!(err, EswitchdError::AlreadyAllocated { .. }));

        let err = db.allocate_device("default", DeviceKind::Eth, Some("eth9"), None).unwrap_err();
        assert!(matches!(err, EswitchdError::DeviceNotFound { .. }));

        // right device, wrong kind
        let err = db.allocate_device("default", DeviceKind::Vf, Some("eth4"), None).unwrap_err();
        assert!(matches!(err, EswitchdError::DeviceNotFound { .. }));

        let found = db.find_by_mac(&mac(1)).unwrap();
        assert_eq!(found.dev, "eth5");
        assert_eq!(found.owner, Some(owner));
    }

    #[test]
    fn test_unknown_fabric() {
        let db = db();
        assert!(matches!(
            db.allocate_device("nope", DeviceKind::Eth, None, None),
            Err(EswitchdError::FabricNotFound(_))
        ));
        assert!(db.get_free_devices("nope").is_err());
        assert_eq!(db.get_dev_fabric("eth9"), None);
    }

    #[test]
    fn test_deallocate_is_idempotent() {
        let db = db();
        let dev = db.allocate_device("default", DeviceKind::Eth, None, Some(DeviceOwner::new(mac(2), None))).unwrap();
        db.deallocate_device("default", DeviceKind::Eth, &dev).unwrap();
        db.deallocate_device("default", DeviceKind::Eth, &dev).unwrap();
        assert_eq!(db.get_free_eths("default").unwrap().len(), 2);
        assert!(db.find_by_mac(&mac(2)).is_none());

        let err = db.deallocate_device("default", DeviceKind::Eth, "eth9").unwrap_err();
        assert!(matches!(err, EswitchdError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_concurrent_allocation_of_one_device() {
        let db = Arc::new(db());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    db.allocate_device("default", DeviceKind::Eth, Some("eth4"), None)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EswitchdError::AlreadyAllocated { .. })));
    }

    #[test]
    fn test_concurrent_allocate_any_hands_out_distinct_devices() {
        let db = Arc::new(db());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || db.allocate_device("default", DeviceKind::Vf, None, None))
            })
            .collect();

        let mut got: Vec<String> =
            handles.into_iter().filter_map(|h| h.join().unwrap().ok()).collect();
        got.sort();
        assert_eq!(got, vec!["0000:08:00.3", "0000:08:00.4"]);
    }

    #[test]
    fn test_replace_devices_keeps_allocations() {
        let db = db();
        db.allocate_device("default", DeviceKind::Eth, Some("eth4"), None).unwrap();

        let report = db
            .replace_devices(
                "default",
                DiscoveredDevices { eths: vec!["eth6".into()], vfs: vec!["0000:08:00.3".parse().unwrap()] },
            )
            .unwrap();

        assert_eq!(report.added, vec!["eth6"]);
        assert_eq!(report.removed, vec!["0000:08:00.4", "eth5"]);
        assert_eq!(report.missing_allocated, vec!["eth4"]);
        assert_eq!(db.get_free_eths("default").unwrap(), vec!["eth6"]);
        assert_eq!(db.allocations().len(), 1);
    }

    #[test]
    fn test_remove_fabric() {
        let db = db();
        assert_eq!(db.remove_fabric("default").unwrap().pf, "eth2");
        assert!(db.fabrics().is_empty());
        assert!(db.remove_fabric("default").is_err());
    }
}
