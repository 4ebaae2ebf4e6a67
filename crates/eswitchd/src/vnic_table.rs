//! vNICs known to the daemon, keyed by MAC.

use std::collections::HashMap;

use eswitch_types::protocol::{PortState, VnicInfo};
use eswitch_types::{MacAddress, VnicType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnicEntry {
    pub fabric: String,
    pub dev: String,
    pub vnic_type: VnicType,
    pub device_id: Option<String>,
    pub vlan: Option<i64>,
    pub state: PortState,
}

impl VnicEntry {
    pub fn new(fabric: impl Into<String>, dev: impl Into<String>, vnic_type: VnicType, device_id: Option<String>) -> Self {
        Self {
            fabric: fabric.into(),
            dev: dev.into(),
            vnic_type,
            device_id,
            vlan: None,
            state: PortState::Down,
        }
    }
}

#[derive(Debug, Default)]
pub struct VnicTable {
    vnics: HashMap<MacAddress, VnicEntry>,
}

impl VnicTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mac: MacAddress, entry: VnicEntry) -> Option<VnicEntry> {
        self.vnics.insert(mac, entry)
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&VnicEntry> {
        self.vnics.get(mac)
    }

    /// Entry for `mac`, only if it sits on `fabric`.
    pub fn get_on_fabric_mut(&mut self, fabric: &str, mac: &MacAddress) -> Option<&mut VnicEntry> {
        self.vnics.get_mut(mac).filter(|e| e.fabric == fabric)
    }

    pub fn remove(&mut self, mac: &MacAddress) -> Option<VnicEntry> {
        self.vnics.remove(mac)
    }

    /// vNICs on `fabric`, or all of them when `fabric` is `None`, sorted by
    /// MAC.
    pub fn list(&self, fabric: Option<&str>) -> Vec<VnicInfo> {
        let mut out: Vec<VnicInfo> = self
            .vnics
            .iter()
            .filter(|(_, e)| fabric.map_or(true, |f| e.fabric == f))
            .map(|(mac, e)| VnicInfo {
                mac: *mac,
                fabric: e.fabric.clone(),
                dev: e.dev.clone(),
                device_id: e.device_id.clone(),
                vnic_type: e.vnic_type,
                vlan: e.vlan,
                state: e.state,
            })
            .collect();
        out.sort_by_key(|v| v.mac);
        out
    }

    pub fn len(&self) -> usize {
        self.vnics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vnics.is_empty()
    }
}
