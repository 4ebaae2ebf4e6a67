//! Common test topologies and configuration.

use std::io;

use eswitch_types::MacAddress;

use crate::sysfs::FakeSysfs;

/// PCI slot of the fixture physical function.
pub const PF_PCI_ID: &str = "0000:08:00";
pub const PF_INTERFACE: &str = "eth2";

/// One physical function `eth2` on port 1 with two VF netdevs (`eth4`,
/// `eth5`) and two bare VFs (`0000:08:00.3`, `0000:08:00.4`). A netdev on
/// port 2 (`eth6`) is present but belongs to another port.
pub fn single_port_sysfs() -> io::Result<FakeSysfs> {
    let sysfs = FakeSysfs::new()?;
    sysfs
        .add_pf("0000:08:00.0", PF_INTERFACE, 1)?
        .add_netdev("0000:08:00.1", "eth4", 1)?
        .add_netdev("0000:08:00.2", "eth5", 1)?
        .add_vf("0000:08:00.3")?
        .add_vf("0000:08:00.4")?
        .add_netdev("0000:08:00.5", "eth6", 2)?;
    Ok(sysfs)
}

/// `fa:16:3e:00:00:<n>`.
pub fn vnic_mac(n: u8) -> MacAddress {
    MacAddress::new([0xfa, 0x16, 0x3e, 0x00, 0x00, n])
}

/// Minimal configuration document for a single fabric.
pub fn config_toml(daemon_endpoint: &str, request_timeout_ms: u64) -> String {
    format!(
        r#"
[vlans]
tenant_network_type = "vlan"
network_vlan_ranges = ["default:100:102"]

[eswitch]
physical_interface_mappings = ["default:{PF_INTERFACE}"]
daemon_endpoint = "{daemon_endpoint}"
request_timeout_ms = {request_timeout_ms}

[vif]
fabric = "default"
vnic_type = "direct"
"#
    )
}
