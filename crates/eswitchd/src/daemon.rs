//! Request handling.
//!
//! [`EswitchDaemon`] executes control channel requests against the resource
//! manager and keeps the table of vNICs it has handed devices to. Handling is
//! synchronous; the transport lives in [`crate::server`].

use eswitch_common::InterfaceMappings;
use eswitch_types::protocol::{DeviceReply, PortState, Reply, Request, ALL_FABRICS};
use eswitch_types::{MacAddress, VnicType};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::device_db::DeviceOwner;
use crate::error::{EswitchdError, Result};
use crate::hypervisor::DomainSource;
use crate::resource_mgr::{ResourceManager, RestoreReport};
use crate::vnic_table::{VnicEntry, VnicTable};

/// Action reported when a frame cannot be decoded at all.
const UNKNOWN_ACTION: &str = "unknown";

pub struct EswitchDaemon {
    rm: ResourceManager,
    vnics: Mutex<VnicTable>,
}

impl EswitchDaemon {
    pub fn new(rm: ResourceManager) -> Self {
        Self { rm, vnics: Mutex::new(VnicTable::new()) }
    }

    pub fn resource_manager(&self) -> &ResourceManager {
        &self.rm
    }

    /// Registers every configured fabric. Fabrics whose physical function
    /// cannot be resolved yet are skipped with a warning; they can be added
    /// later with `define_fabric_mapping`. Returns the number registered.
    pub fn register_fabrics(&self, mappings: &InterfaceMappings) -> usize {
        let mut registered = 0;
        for (fabric, interface) in mappings.iter() {
            match self.rm.add_fabric(fabric, interface) {
                Ok(devices) => {
                    info!(fabric, interface, devices, "Registered fabric");
                    registered += 1;
                }
                Err(e) => warn!(fabric, interface, error = %e, "Cannot register fabric"),
            }
        }
        registered
    }

    /// Rebuilds allocations and the vNIC table from the hypervisor.
    pub async fn restore_from(&self, source: &dyn DomainSource) -> Result<RestoreReport> {
        let scan = self.rm.scan_attached_devices(source).await?;
        let mut report = self.rm.restore_allocations(&scan.attached);
        report.unmatched = scan.unmatched;

        let mut vnics = self.vnics.lock();
        for device in &report.restored {
            let mut entry = VnicEntry::new(
                &device.fabric,
                &device.dev,
                VnicType::Direct,
                Some(device.device_id.clone()),
            );
            entry.state = PortState::Up;
            vnics.insert(device.mac, entry);
        }
        Ok(report)
    }

    /// Decodes and handles one frame. Frames that do not decode get a
    /// `FAIL` reply naming the action when one can be found.
    pub fn handle_line(&self, line: &str) -> Reply {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request),
            Err(e) => {
                let action = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("action").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| UNKNOWN_ACTION.to_string());
                warn!(action = %action, error = %e, "Malformed request");
                Reply::fail(action, format!("malformed request: {e}"))
            }
        }
    }

    pub fn handle(&self, request: Request) -> Reply {
        let action = request.action();
        match self.dispatch(request) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(action, error = %e, "Request failed");
                Reply::fail(action, e.to_string())
            }
        }
    }

    fn dispatch(&self, request: Request) -> Result<Reply> {
        match request {
            Request::CreatePort { vnic_mac, device_id, fabric, vnic_type, dev_name } => {
                let dev = self.create_port(vnic_mac, device_id, &fabric, vnic_type, dev_name.as_deref())?;
                Ok(Reply::ok(DeviceReply { dev })?)
            }
            Request::PlugNic { vnic_mac, device_id, fabric, vnic_type, dev_name } => {
                let dev = self.create_port(vnic_mac, device_id, &fabric, vnic_type, Some(&dev_name))?;
                Ok(Reply::ok(DeviceReply { dev })?)
            }
            Request::DeletePort { fabric, vnic_mac } => {
                let dev = self.delete_port(&fabric, vnic_mac)?;
                Ok(Reply::ok(DeviceReply { dev })?)
            }
            Request::DefineFabricMapping { fabric, interface } => {
                self.define_fabric_mapping(&fabric, &interface)?;
                Ok(Reply::ok_empty())
            }
            Request::PortUp { fabric, mac, .. } => {
                self.update_vnic(&fabric, mac, |e| e.state = PortState::Up)?;
                Ok(Reply::ok_empty())
            }
            Request::PortDown { fabric, mac, .. } => {
                self.update_vnic(&fabric, mac, |e| e.state = PortState::Down)?;
                Ok(Reply::ok_empty())
            }
            Request::PortRelease { fabric, mac, .. } => {
                self.update_vnic(&fabric, mac, |e| {
                    e.state = PortState::Down;
                    e.vlan = None;
                })?;
                Ok(Reply::ok_empty())
            }
            Request::GetVnics { fabric } => {
                let filter = (fabric != ALL_FABRICS).then_some(fabric.as_str());
                let listed = self.vnics.lock().list(filter);
                Ok(Reply::ok(listed)?)
            }
            Request::SetVlan { fabric, port_mac, vlan } => {
                self.update_vnic(&fabric, port_mac, |e| e.vlan = Some(vlan))?;
                Ok(Reply::ok_empty())
            }
        }
    }

    /// Allocates a device for a vNIC. Repeating the request for a vNIC that
    /// already holds a matching device returns that device.
    #[instrument(skip(self, device_id))]
    fn create_port(
        &self,
        mac: MacAddress,
        device_id: String,
        fabric: &str,
        vnic_type: VnicType,
        dev_name: Option<&str>,
    ) -> Result<String> {
        let mut vnics = self.vnics.lock();
        if let Some(existing) = vnics.get(&mac) {
            if existing.fabric == fabric
                && existing.vnic_type == vnic_type
                && dev_name.map_or(true, |d| d == existing.dev)
            {
                debug!(dev = %existing.dev, "vNIC already has a device");
                return Ok(existing.dev.clone());
            }
            return Err(EswitchdError::VnicInUse {
                mac,
                fabric: existing.fabric.clone(),
                dev: existing.dev.clone(),
            });
        }

        let owner = DeviceOwner::new(mac, Some(device_id.clone()));
        let dev = self
            .rm
            .allocate_device(fabric, vnic_type.wants_virtual_function(), dev_name, Some(owner))?;
        vnics.insert(mac, VnicEntry::new(fabric, &dev, vnic_type, Some(device_id)));
        info!(dev = %dev, "Allocated device for vNIC");
        Ok(dev)
    }

    #[instrument(skip(self))]
    fn delete_port(&self, fabric: &str, mac: MacAddress) -> Result<String> {
        let mut vnics = self.vnics.lock();
        let entry = vnics
            .get_on_fabric_mut(fabric, &mac)
            .ok_or(EswitchdError::VnicNotFound(mac))?;
        self.rm
            .deallocate_device(fabric, entry.vnic_type.wants_virtual_function(), &entry.dev)?;
        let dev = entry.dev.clone();
        vnics.remove(&mac);
        info!(dev = %dev, "Released device of vNIC");
        Ok(dev)
    }

    /// Adds a fabric. Repeating an identical mapping is accepted; mapping a
    /// known fabric to another interface is not.
    fn define_fabric_mapping(&self, fabric: &str, interface: &str) -> Result<()> {
        if let Some(existing) = self.rm.get_fabric_pf(fabric) {
            if existing == interface {
                debug!(fabric, interface, "Fabric mapping unchanged");
                return Ok(());
            }
            return Err(EswitchdError::MappingConflict {
                fabric: fabric.to_string(),
                existing,
                requested: interface.to_string(),
            });
        }
        let devices = self.rm.add_fabric(fabric, interface)?;
        info!(fabric, interface, devices, "Defined fabric mapping");
        Ok(())
    }

    fn update_vnic(&self, fabric: &str, mac: MacAddress, apply: impl FnOnce(&mut VnicEntry)) -> Result<()> {
        let mut vnics = self.vnics.lock();
        let entry = vnics
            .get_on_fabric_mut(fabric, &mac)
            .ok_or(EswitchdError::VnicNotFound(mac))?;
        apply(&mut *entry);
        debug!(fabric, %mac, state = ?entry.state, vlan = ?entry.vlan, "Updated vNIC");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::{DomainInterface, StaticDomains};
    use crate::pci_utils::PciUtils;
    use eswitch_types::protocol::{ReplyOutcome, VnicInfo, STATUS_FAIL};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn sysfs() -> TempDir {
        let dir = TempDir::new().unwrap();
        let pci = dir.path().join("sys/bus/pci/devices");
        let net = dir.path().join("sys/class/net");
        for (addr, eth) in [
            ("0000:08:00.0", Some("eth2")),
            ("0000:08:00.1", Some("eth4")),
            ("0000:08:00.2", Some("eth5")),
            ("0000:08:00.3", None),
        ] {
            fs::create_dir_all(pci.join(addr)).unwrap();
            if let Some(eth) = eth {
                let ndir = pci.join(addr).join("net").join(eth);
                fs::create_dir_all(&ndir).unwrap();
                fs::write(ndir.join("dev_id"), "0\n").unwrap();
                fs::create_dir_all(net.join(eth)).unwrap();
                fs::write(net.join(eth).join("dev_id"), "0\n").unwrap();
                symlink(format!("../../../{addr}"), net.join(eth).join("device")).unwrap();
            }
        }
        dir
    }

    fn daemon(dir: &TempDir) -> EswitchDaemon {
        let daemon = EswitchDaemon::new(ResourceManager::new(PciUtils::new(dir.path())));
        let mappings = InterfaceMappings::parse(["default:eth2", "missing:eth9"]).unwrap();
        assert_eq!(daemon.register_fabrics(&mappings), 1);
        daemon
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0xfa, 0x16, 0x3e, 0, 0, last])
    }

    fn create(mac: MacAddress, vnic_type: VnicType, dev_name: Option<&str>) -> Request {
        Request::CreatePort {
            vnic_mac: mac,
            device_id: "vm-1".into(),
            fabric: "default".into(),
            vnic_type,
            dev_name: dev_name.map(str::to_string),
        }
    }

    fn dev_of(reply: Reply) -> String {
        match reply.into_outcome() {
            ReplyOutcome::Ok(Some(payload)) => serde_json::from_value::<DeviceReply>(payload).unwrap().dev,
            other => panic!("expected device reply, got {other:?}"),
        }
    }

    fn vnics(daemon: &EswitchDaemon, fabric: &str) -> Vec<VnicInfo> {
        match daemon.handle(Request::GetVnics { fabric: fabric.into() }).into_outcome() {
            ReplyOutcome::Ok(Some(payload)) => serde_json::from_value(payload).unwrap(),
            other => panic!("expected vnic list, got {other:?}"),
        }
    }

    #[test]
    fn test_create_port_is_idempotent_per_mac() {
        let dir = sysfs();
        let daemon = daemon(&dir);

        let first = dev_of(daemon.handle(create(mac(1), VnicType::Direct, None)));
        let again = dev_of(daemon.handle(create(mac(1), VnicType::Direct, None)));
        assert_eq!(first, again);
        assert_eq!(daemon.resource_manager().get_free_eths("default").unwrap().len(), 1);
    }

    #[test]
    fn test_create_port_rejects_other_vnic_type_for_same_mac() {
        let dir = sysfs();
        let daemon = daemon(&dir);
        assert_eq!(dev_of(daemon.handle(create(mac(1), VnicType::Direct, None))), "eth4");

        let reply = daemon.handle(create(mac(1), VnicType::Hostdev, None));
        assert_eq!(reply.status, STATUS_FAIL);
        assert_eq!(reply.action.as_deref(), Some("create_port"));
        assert_eq!(
            reply.reason.as_deref(),
            Some("vNIC fa:16:3e:00:00:01 already holds device eth4 on fabric default")
        );

        // the first device stays allocated and the vf stays free
        assert_eq!(daemon.resource_manager().get_free_eths("default").unwrap(), vec!["eth5".to_string()]);
        assert_eq!(daemon.resource_manager().get_free_vfs("default").unwrap(), vec!["0000:08:00.3".to_string()]);
    }

    #[test]
    fn test_create_port_hostdev_takes_vf() {
        let dir = sysfs();
        let daemon = daemon(&dir);
        assert_eq!(dev_of(daemon.handle(create(mac(1), VnicType::Hostdev, None))), "0000:08:00.3");

        let reply = daemon.handle(create(mac(2), VnicType::Hostdev, None));
        assert_eq!(reply.status, STATUS_FAIL);
        assert_eq!(reply.action.as_deref(), Some("create_port"));
        assert_eq!(reply.reason.as_deref(), Some("No free vf device on fabric default"));
    }

    #[test]
    fn test_plug_nic_specific_device() {
        let dir = sysfs();
        let daemon = daemon(&dir);
        let plug = |m| Request::PlugNic {
            vnic_mac: m,
            device_id: "vm-1".into(),
            fabric: "default".into(),
            vnic_type: VnicType::Direct,
            dev_name: "eth5".into(),
        };
        assert_eq!(dev_of(daemon.handle(plug(mac(1)))), "eth5");

        let reply = daemon.handle(plug(mac(2)));
        assert_eq!(
            reply.into_outcome(),
            ReplyOutcome::Fail {
                action: "plug_nic".into(),
                reason: "Device eth5 on fabric default is already allocated".into(),
            }
        );
    }

    #[test]
    fn test_delete_port_returns_device() {
        let dir = sysfs();
        let daemon = daemon(&dir);
        let dev = dev_of(daemon.handle(create(mac(1), VnicType::Direct, Some("eth4"))));

        let reply = daemon.handle(Request::DeletePort { fabric: "default".into(), vnic_mac: mac(1) });
        assert_eq!(dev_of(reply), dev);
        assert_eq!(daemon.resource_manager().get_free_eths("default").unwrap().len(), 2);

        let reply = daemon.handle(Request::DeletePort { fabric: "default".into(), vnic_mac: mac(1) });
        assert_eq!(reply.status, STATUS_FAIL);
    }

    #[test]
    fn test_port_state_and_vlan() {
        let dir = sysfs();
        let daemon = daemon(&dir);
        dev_of(daemon.handle(create(mac(1), VnicType::Direct, None)));

        let ok = |r: Request| assert_eq!(daemon.handle(r).into_outcome(), ReplyOutcome::Ok(None));
        ok(Request::SetVlan { fabric: "default".into(), port_mac: mac(1), vlan: 101 });
        ok(Request::PortUp { fabric: "default".into(), ref_by: Default::default(), mac: mac(1) });

        let listed = vnics(&daemon, ALL_FABRICS);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].vlan, Some(101));
        assert_eq!(listed[0].state, PortState::Up);

        ok(Request::PortRelease { fabric: "default".into(), ref_by: Default::default(), mac: mac(1) });
        let listed = vnics(&daemon, "default");
        assert_eq!(listed[0].vlan, None);
        assert_eq!(listed[0].state, PortState::Down);
        assert!(vnics(&daemon, "storage").is_empty());

        let reply = daemon.handle(Request::PortUp { fabric: "storage".into(), ref_by: Default::default(), mac: mac(1) });
        assert_eq!(reply.status, STATUS_FAIL);
    }

    #[test]
    fn test_define_fabric_mapping() {
        let dir = sysfs();
        let daemon = daemon(&dir);
        let define = |iface: &str| Request::DefineFabricMapping { fabric: "default".into(), interface: iface.into() };

        assert_eq!(daemon.handle(define("eth2")).into_outcome(), ReplyOutcome::Ok(None));
        match daemon.handle(define("eth3")).into_outcome() {
            ReplyOutcome::Fail { action, reason } => {
                assert_eq!(action, "define_fabric_mapping");
                assert!(reason.contains("mapped to eth2"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frames() {
        let dir = sysfs();
        let daemon = daemon(&dir);

        let reply = daemon.handle_line(r#"{"action":"set_vlan","fabric":"default"}"#);
        assert_eq!(reply.action.as_deref(), Some("set_vlan"));
        assert_eq!(reply.status, STATUS_FAIL);

        let reply = daemon.handle_line("not json");
        assert_eq!(reply.action.as_deref(), Some(UNKNOWN_ACTION));
    }

    #[tokio::test]
    async fn test_restore_from_hypervisor() {
        let dir = sysfs();
        let daemon = daemon(&dir);
        let stray = DomainInterface { device_id: "vm-8".into(), mac: mac(8), source_dev: "eth9".into() };
        let source = StaticDomains(vec![
            DomainInterface { device_id: "vm-7".into(), mac: mac(7), source_dev: "eth5".into() },
            stray.clone(),
        ]);

        let report = daemon.restore_from(&source).await.unwrap();
        assert_eq!(report.restored.len(), 1);
        assert_eq!(report.unmatched, vec![stray]);
        assert_eq!(vnics(&daemon, ALL_FABRICS).len(), 1);

        let listed = vnics(&daemon, ALL_FABRICS);
        assert_eq!(listed[0].dev, "eth5");
        assert_eq!(listed[0].device_id.as_deref(), Some("vm-7"));

        // the restored vNIC can be deleted like any other
        let reply = daemon.handle(Request::DeletePort { fabric: "default".into(), vnic_mac: mac(7) });
        assert_eq!(dev_of(reply), "eth5");
    }
}
