//! Device pool behaviour through the public daemon API.

use std::sync::{Arc, Barrier};
use std::thread;

use eswitch_common::InterfaceMappings;
use eswitch_test::{single_port_sysfs, vnic_mac, PF_INTERFACE};
use eswitch_types::protocol::{Reply, ReplyOutcome, Request};
use eswitch_types::VnicType;
use eswitchd::{EswitchDaemon, EswitchdError, PciUtils, ResourceManager};
use pretty_assertions::assert_eq;
use serde_json::json;

fn create(n: u8, vnic_type: VnicType) -> Request {
    Request::CreatePort {
        vnic_mac: vnic_mac(n),
        device_id: format!("vm-{n}"),
        fabric: "default".into(),
        vnic_type,
        dev_name: None,
    }
}

fn ok_dev(reply: Reply) -> String {
    match reply.into_outcome() {
        ReplyOutcome::Ok(Some(payload)) => payload["dev"].as_str().unwrap_or_default().to_string(),
        other => panic!("expected a device, got {other:?}"),
    }
}

#[test]
fn test_discovery_registers_port_devices_only() {
    let sysfs = single_port_sysfs().unwrap();
    let rm = ResourceManager::new(PciUtils::new(sysfs.root()));

    assert_eq!(rm.add_fabric("default", PF_INTERFACE).unwrap(), 4);
    assert_eq!(rm.get_free_eths("default").unwrap(), vec!["eth4", "eth5"]);
    assert_eq!(rm.get_free_vfs("default").unwrap(), vec!["0000:08:00.3", "0000:08:00.4"]);
    // eth6 sits on port 2
    assert_eq!(rm.get_fabric_for_dev("eth6"), None);
    assert_eq!(rm.get_fabric_for_dev("eth5"), Some("default".into()));
}

#[test]
fn test_concurrent_allocation_hands_out_each_device_once() {
    let sysfs = single_port_sysfs().unwrap();
    let rm = Arc::new(ResourceManager::new(PciUtils::new(sysfs.root())));
    rm.add_fabric("default", PF_INTERFACE).unwrap();

    let workers = 12;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let rm = Arc::clone(&rm);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                rm.allocate_device("default", i % 2 == 0, None, None)
            })
        })
        .collect();

    let mut granted = Vec::new();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(dev) => granted.push(dev),
            Err(e) => assert!(matches!(e, EswitchdError::PoolExhausted { .. }), "unexpected {e:?}"),
        }
    }
    granted.sort();
    assert_eq!(granted, vec!["0000:08:00.3", "0000:08:00.4", "eth4", "eth5"]);
    assert!(rm.get_free_devices("default").unwrap().is_empty());
}

#[test]
fn test_daemon_port_lifecycle() {
    let sysfs = single_port_sysfs().unwrap();
    let daemon = EswitchDaemon::new(ResourceManager::new(PciUtils::new(sysfs.root())));
    let mappings = InterfaceMappings::parse([format!("default:{PF_INTERFACE}")]).unwrap();
    assert_eq!(daemon.register_fabrics(&mappings), 1);

    let first = ok_dev(daemon.handle(create(1, VnicType::Direct)));
    let second = ok_dev(daemon.handle(create(2, VnicType::Direct)));
    assert_ne!(first, second);

    match daemon.handle(create(3, VnicType::Direct)).into_outcome() {
        ReplyOutcome::Fail { action, reason } => {
            assert_eq!(action, "create_port");
            assert_eq!(reason, "No free eth device on fabric default");
        }
        other => panic!("expected FAIL, got {other:?}"),
    }

    let vf = ok_dev(daemon.handle(create(3, VnicType::Hostdev)));
    assert!(vf.starts_with("0000:08:00."));

    daemon.handle(Request::SetVlan { fabric: "default".into(), port_mac: vnic_mac(1), vlan: 100 });
    daemon.handle(Request::PortUp { fabric: "default".into(), ref_by: Default::default(), mac: vnic_mac(1) });

    let listed = daemon.handle_line(r#"{"action":"get_vnics","fabric":"default"}"#).into_outcome();
    let ReplyOutcome::Ok(Some(vnics)) = listed else {
        panic!("expected a vNIC list, got {listed:?}");
    };
    assert_eq!(vnics.as_array().map(Vec::len), Some(3));
    assert_eq!(vnics[0]["mac"], json!("fa:16:3e:00:00:01"));
    assert_eq!(vnics[0]["vlan"], json!(100));
    assert_eq!(vnics[0]["state"], json!("up"));

    let released = ok_dev(daemon.handle(Request::DeletePort { fabric: "default".into(), vnic_mac: vnic_mac(1) }));
    assert_eq!(released, first);
    assert_eq!(ok_dev(daemon.handle(create(4, VnicType::Direct))), first);
}

#[test]
fn test_refresh_after_vf_disabled() {
    let sysfs = single_port_sysfs().unwrap();
    let rm = ResourceManager::new(PciUtils::new(sysfs.root()));
    rm.add_fabric("default", PF_INTERFACE).unwrap();
    rm.allocate_device("default", true, Some("0000:08:00.4"), None).unwrap();

    sysfs.remove_function("0000:08:00.3").unwrap();
    sysfs.remove_function("0000:08:00.4").unwrap();
    let report = rm.refresh_fabric("default").unwrap();

    assert_eq!(report.removed, vec!["0000:08:00.3"]);
    assert_eq!(report.missing_allocated, vec!["0000:08:00.4"]);
    assert!(rm.get_free_vfs("default").unwrap().is_empty());
}
