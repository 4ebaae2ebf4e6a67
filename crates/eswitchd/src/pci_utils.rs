//! Device topology reader.
//!
//! Reads physical/virtual function topology from sysfs:
//!
//! - `sys/class/net/<eth>/device` links a netdev to its PCI function
//! - `sys/class/net/<eth>/dev_id` holds the 0-indexed hardware port
//! - `sys/bus/pci/devices/<addr>/net/<eth>` exists for functions that expose
//!   a netdev on the host
//!
//! Everything here is best effort. A missing link or file yields `None` (or
//! an empty listing), meaning "not available yet", never an error.

use std::fs;
use std::path::{Path, PathBuf};

use eswitch_types::{PciAddress, VnicType};
use tracing::debug;

const PCI_DEVICES: &str = "sys/bus/pci/devices";
const CLASS_NET: &str = "sys/class/net";

/// Physical function identity as needed to register a fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfDetails {
    /// `domain:bus:slot` shared by the PF and its VFs.
    pub pci_id: String,
    /// 1-indexed HCA port.
    pub hca_port: u32,
}

/// Devices found behind a physical function port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDevices {
    /// Netdevs whose `dev_id` matches the port.
    pub eths: Vec<String>,
    /// Virtual functions without a host netdev.
    pub vfs: Vec<PciAddress>,
}

/// Sysfs reader rooted at a configurable directory (`/` in production).
#[derive(Debug, Clone)]
pub struct PciUtils {
    root: PathBuf,
}

impl Default for PciUtils {
    fn default() -> Self {
        Self::new("/")
    }
}

impl PciUtils {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn net_path(&self, dev: &str) -> PathBuf {
        self.root.join(CLASS_NET).join(dev)
    }

    /// PCI function behind a netdev.
    pub fn get_eth_vf(&self, dev: &str) -> Option<PciAddress> {
        let target = fs::read_link(self.net_path(dev).join("device")).ok()?;
        target.file_name()?.to_str()?.parse().ok()
    }

    /// `domain:bus:slot` of the physical function behind a netdev.
    pub fn get_pf_pci(&self, pf: &str) -> Option<String> {
        self.get_eth_vf(pf).map(|addr| addr.slot_prefix())
    }

    /// 1-indexed hardware port of a netdev.
    pub fn get_eth_port(&self, dev: &str) -> Option<u32> {
        read_dev_id(&self.net_path(dev).join("dev_id")).map(|id| id + 1)
    }

    /// Function index of a VF. For direct vNICs `dev` is a netdev and is
    /// resolved to its function first; for hostdev vNICs it is a PCI address.
    pub fn get_vf_index(&self, dev: &str, vnic_type: VnicType) -> Option<u8> {
        let addr = match vnic_type {
            VnicType::Direct => self.get_eth_vf(dev)?,
            VnicType::Hostdev => dev.parse().ok()?,
        };
        Some(addr.function())
    }

    pub fn pf_details(&self, pf: &str) -> Option<PfDetails> {
        let hca_port = self.get_eth_port(pf)?;
        let pci_id = self.get_pf_pci(pf)?;
        Some(PfDetails { pci_id, hca_port })
    }

    /// Enumerates the non-zero functions sharing `pci_id`.
    ///
    /// Functions exposing netdevs contribute the netdevs that sit on
    /// `hca_port`; functions without a netdev are returned as VFs. Both lists
    /// are sorted so callers never depend on directory order.
    pub fn discover_devices(&self, pci_id: &str, hca_port: u32) -> DiscoveredDevices {
        let mut found = DiscoveredDevices::default();
        let devices_dir = self.root.join(PCI_DEVICES);

        let entries = match fs::read_dir(&devices_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", devices_dir.display(), e);
                return found;
            }
        };

        let wanted_dev_id = hca_port.checked_sub(1);

        for entry in entries.flatten() {
            let Some(addr) = entry.file_name().to_str().and_then(|n| n.parse::<PciAddress>().ok())
            else {
                continue;
            };
            if addr.slot_prefix() != pci_id || !addr.is_virtual_function() {
                continue;
            }

            let net_dir = entry.path().join("net");
            if !net_dir.is_dir() {
                found.vfs.push(addr);
                continue;
            }

            let Ok(netdevs) = fs::read_dir(&net_dir) else {
                continue;
            };
            for netdev in netdevs.flatten() {
                let Some(eth) = netdev.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let dev_id = read_dev_id(&netdev.path().join("dev_id"));
                if dev_id.is_some() && dev_id == wanted_dev_id {
                    found.eths.push(eth);
                } else {
                    debug!(%addr, eth = %eth, ?dev_id, hca_port, "Skipping netdev on another port");
                }
            }
        }

        found.eths.sort();
        found.vfs.sort();
        found
    }
}

/// Reads a `dev_id` file. Values use C integer syntax (`0x1`, `1`).
fn read_dev_id(path: &Path) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    parse_int_auto(raw.trim())
}

fn parse_int_auto(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = s.strip_prefix("0o") {
        u32::from_str_radix(oct, 8).ok()
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    /// PF 0000:08:00.0 with netdev eth2 on port 1, VF .1 and .2 exposing
    /// netdevs eth4 (port 1) and eth5 (port 2), VFs .3 and .4 without netdev,
    /// and an unrelated function on 0000:09:00.
    fn sysfs() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let pci = root.join(PCI_DEVICES);
        let net = root.join(CLASS_NET);
        fs::create_dir_all(&net).unwrap();

        let add_function = |addr: &str, netdev: Option<(&str, &str)>| {
            let fdir = pci.join(addr);
            fs::create_dir_all(&fdir).unwrap();
            if let Some((eth, dev_id)) = netdev {
                let ndir = fdir.join("net").join(eth);
                fs::create_dir_all(&ndir).unwrap();
                fs::write(ndir.join("dev_id"), format!("{dev_id}\n")).unwrap();
                let class = net.join(eth);
                fs::create_dir_all(&class).unwrap();
                fs::write(class.join("dev_id"), format!("{dev_id}\n")).unwrap();
                symlink(format!("../../../{addr}"), class.join("device")).unwrap();
            }
        };

        add_function("0000:08:00.0", Some(("eth2", "0x0")));
        add_function("0000:08:00.1", Some(("eth4", "0x0")));
        add_function("0000:08:00.2", Some(("eth5", "0x1")));
        add_function("0000:08:00.3", None);
        add_function("0000:08:00.4", None);
        add_function("0000:09:00.1", None);
        dir
    }

    #[test]
    fn test_pf_details() {
        let dir = sysfs();
        let utils = PciUtils::new(dir.path());

        assert_eq!(utils.get_eth_vf("eth2"), Some("0000:08:00.0".parse().unwrap()));
        assert_eq!(utils.get_pf_pci("eth2"), Some("0000:08:00".to_string()));
        assert_eq!(utils.get_eth_port("eth2"), Some(1));
        assert_eq!(utils.get_eth_port("eth5"), Some(2));
        assert_eq!(
            utils.pf_details("eth2"),
            Some(PfDetails { pci_id: "0000:08:00".into(), hca_port: 1 })
        );
    }

    #[test]
    fn test_missing_links_are_not_errors() {
        let dir = sysfs();
        let utils = PciUtils::new(dir.path());

        assert_eq!(utils.get_eth_vf("eth9"), None);
        assert_eq!(utils.get_eth_port("eth9"), None);
        assert_eq!(utils.pf_details("eth9"), None);
        assert_eq!(PciUtils::new("/nonexistent").discover_devices("0000:08:00", 1), DiscoveredDevices::default());
    }

    #[test]
    fn test_discover_devices_by_port() {
        let dir = sysfs();
        let utils = PciUtils::new(dir.path());

        let port1 = utils.discover_devices("0000:08:00", 1);
        assert_eq!(port1.eths, vec!["eth4".to_string()]);
        assert_eq!(
            port1.vfs,
            vec!["0000:08:00.3".parse().unwrap(), "0000:08:00.4".parse().unwrap()]
        );

        let port2 = utils.discover_devices("0000:08:00", 2);
        assert_eq!(port2.eths, vec!["eth5".to_string()]);
        assert_eq!(port2.vfs, port1.vfs);
    }

    #[test]
    fn test_vf_index() {
        let dir = sysfs();
        let utils = PciUtils::new(dir.path());

        assert_eq!(utils.get_vf_index("eth4", VnicType::Direct), Some(1));
        assert_eq!(utils.get_vf_index("0000:08:00.3", VnicType::Hostdev), Some(3));
        assert_eq!(utils.get_vf_index("eth4", VnicType::Hostdev), None);
    }

    #[test]
    fn test_parse_int_auto() {
        assert_eq!(parse_int_auto("0x1"), Some(1));
        assert_eq!(parse_int_auto("0X1f"), Some(31));
        assert_eq!(parse_int_auto("2"), Some(2));
        assert_eq!(parse_int_auto("0o7"), Some(7));
        assert_eq!(parse_int_auto("x"), None);
    }
}
