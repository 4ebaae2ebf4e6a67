//! Hypervisor view of attached interfaces.
//!
//! The daemon only needs one thing from the hypervisor: for every running
//! domain, the network interfaces it has attached and the host device each
//! one is backed by. [`VirshDomains`] gets that from `virsh`.

use async_trait::async_trait;
use eswitch_common::command::{run_checked, VIRSH_CMD};
use eswitch_types::MacAddress;
use tracing::{debug, warn};

use crate::error::Result;

/// One interface attached to a running domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInterface {
    /// Domain UUID.
    pub device_id: String,
    pub mac: MacAddress,
    /// Host device backing the interface.
    pub source_dev: String,
}

/// Source of attached interfaces.
#[async_trait]
pub trait DomainSource: Send + Sync {
    async fn attached_interfaces(&self) -> Result<Vec<DomainInterface>>;
}

/// Queries libvirt through `virsh`.
#[derive(Debug, Clone)]
pub struct VirshDomains {
    program: String,
}

impl Default for VirshDomains {
    fn default() -> Self {
        Self::new(VIRSH_CMD)
    }
}

impl VirshDomains {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl DomainSource for VirshDomains {
    async fn attached_interfaces(&self) -> Result<Vec<DomainInterface>> {
        let uuids = run_checked(&self.program, &["list", "--uuid"]).await?;

        let mut interfaces = Vec::new();
        for uuid in uuids.lines().map(str::trim).filter(|l| !l.is_empty()) {
            // domains can go away between the two calls
            match run_checked(&self.program, &["domiflist", uuid]).await {
                Ok(table) => interfaces.extend(parse_domiflist(uuid, &table)),
                Err(e) => warn!(domain = uuid, error = %e, "Cannot list domain interfaces"),
            }
        }
        Ok(interfaces)
    }
}

/// Parses `virsh domiflist` output, keeping `direct` interfaces.
///
/// ```text
///  Interface   Type     Source   Model    MAC
/// -----------------------------------------------------------
///  macvtap0    direct   eth4     virtio   fa:16:3e:00:00:01
/// ```
fn parse_domiflist(device_id: &str, table: &str) -> Vec<DomainInterface> {
    table
        .lines()
        .skip_while(|line| !line.trim_start().starts_with('-'))
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 || cols[1] != "direct" {
                return None;
            }
            match cols[4].parse() {
                Ok(mac) => Some(DomainInterface {
                    device_id: device_id.to_string(),
                    mac,
                    source_dev: cols[2].to_string(),
                }),
                Err(_) => {
                    debug!(domain = device_id, line, "Skipping interface with unparsable MAC");
                    None
                }
            }
        })
        .collect()
}

/// Fixed interface list.
#[derive(Debug, Clone, Default)]
pub struct StaticDomains(pub Vec<DomainInterface>);

#[async_trait]
impl DomainSource for StaticDomains {
    async fn attached_interfaces(&self) -> Result<Vec<DomainInterface>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOMIFLIST: &str = " Interface   Type      Source    Model    MAC
-----------------------------------------------------------------
 macvtap0    direct    eth4      virtio   fa:16:3e:00:00:01
 vnet0       bridge    br0       virtio   52:54:00:12:34:56
 macvtap1    direct    eth5      virtio   not-a-mac
";

    #[test]
    fn test_parse_domiflist() {
        let parsed = parse_domiflist("vm-1", DOMIFLIST);
        assert_eq!(
            parsed,
            vec![DomainInterface {
                device_id: "vm-1".into(),
                mac: "fa:16:3e:00:00:01".parse().unwrap(),
                source_dev: "eth4".into(),
            }]
        );
    }

    #[test]
    fn test_parse_empty_domiflist() {
        assert!(parse_domiflist("vm-1", "").is_empty());
        assert!(parse_domiflist("vm-1", " Interface Type Source Model MAC\n----\n").is_empty());
    }

    #[tokio::test]
    async fn test_missing_virsh_is_an_error() {
        let source = VirshDomains::new("/nonexistent/virsh");
        assert!(source.attached_interfaces().await.is_err());
    }
}
