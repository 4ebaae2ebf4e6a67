//! Loading a complete configuration file from disk.

use eswitch_common::{ConfigError, EswitchConfig};
use eswitch_types::{TenantNetworkType, VlanRange, VnicType};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const FULL: &str = r#"
[vlans]
tenant_network_type = "local"
network_vlan_ranges = ["default:100:199", "default:300:300", "storage"]

[database]
sql_connection = "sqlite:///var/lib/eswitch/eswitch.db"
max_connections = 2

[eswitch]
physical_interface_mappings = ["default:eth2", "storage:eth3"]
daemon_endpoint = "10.0.0.1:6001"
request_timeout_ms = 1500
vnic_type = "hostdev"

[daemon]
listen = "0.0.0.0:6001"
sysfs_root = "/tmp/sysfs"
scan_attached = false
log_level = "debug"

[agent]
polling_interval_secs = 5
rpc = false

[vif]
fabric = "storage"
vnic_type = "direct"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_file() {
    let file = write_config(FULL);
    let config = EswitchConfig::load_or_default(file.path()).unwrap();

    assert_eq!(config.vlans.tenant_network_type, TenantNetworkType::Local);
    assert_eq!(config.database.max_connections, 2);
    assert_eq!(config.eswitch.daemon_endpoint, "10.0.0.1:6001");
    assert_eq!(config.eswitch.vnic_type, VnicType::Hostdev);
    assert_eq!(config.request_timeout(), Duration::from_millis(1500));
    assert_eq!(config.daemon.sysfs_root.to_str(), Some("/tmp/sysfs"));
    assert!(!config.daemon.scan_attached);
    assert!(!config.agent.rpc);
    assert_eq!(config.polling_interval(), Duration::from_secs(5));
    assert_eq!(config.vif.fabric, "storage");

    let ranges = config.network_vlan_ranges().unwrap();
    assert_eq!(
        ranges.ranges("default"),
        &[VlanRange::new(100, 199).unwrap(), VlanRange::new(300, 300).unwrap()]
    );
    assert!(ranges.is_configured("storage"));
    assert!(ranges.allocatable_ids("storage").is_empty());

    let mappings = config.interface_mappings().unwrap();
    assert_eq!(
        mappings.iter().collect::<Vec<_>>(),
        vec![("default", "eth2"), ("storage", "eth3")]
    );
}

#[test]
fn test_bad_mapping_in_file_is_fatal() {
    let file = write_config("[eswitch]\nphysical_interface_mappings = [\"eth2\"]\n");
    let err = EswitchConfig::load_or_default(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidInterfaceMapping { .. }));
}

#[test]
fn test_empty_file_is_all_defaults() {
    let file = write_config("");
    let config = EswitchConfig::load_or_default(file.path()).unwrap();
    assert_eq!(config.vlans.network_vlan_ranges, vec!["default:1:1000"]);
    assert!(config.network_vlan_ranges().unwrap().contains("default", 1000));
}
