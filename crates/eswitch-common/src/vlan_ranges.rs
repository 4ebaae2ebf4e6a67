//! Physical network VLAN ranges and interface mappings.

use std::collections::{BTreeMap, BTreeSet};

use eswitch_types::VlanRange;

use crate::error::{ConfigError, ConfigResult};

/// Physical network name used when a provider network does not name one.
pub const DEFAULT_PHYSICAL_NETWORK: &str = "default";

/// Allocatable segmentation ids per physical network.
///
/// Built from `network_vlan_ranges` entries of the form
/// `<physnet>:<min>:<max>` or a bare `<physnet>`. A bare entry configures the
/// physical network with no allocatable ids, which still makes it a valid
/// target for flat and provider networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkVlanRanges {
    ranges: BTreeMap<String, Vec<VlanRange>>,
}

impl NetworkVlanRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(entries: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Self::new();
        for entry in entries {
            parsed.add_entry(entry.as_ref())?;
        }
        Ok(parsed)
    }

    fn add_entry(&mut self, entry: &str) -> ConfigResult<()> {
        let entry = entry.trim();
        let mut parts = entry.split(':');
        let physical_network = parts.next().unwrap_or_default().trim();
        if physical_network.is_empty() {
            return Err(ConfigError::vlan_range(entry, "missing physical network name"));
        }

        match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => {
                self.add_network(physical_network);
                Ok(())
            }
            (Some(min), Some(max), None) => {
                let min = parse_tag(entry, min)?;
                let max = parse_tag(entry, max)?;
                let range =
                    VlanRange::new(min, max).map_err(|e| ConfigError::vlan_range(entry, e.to_string()))?;
                self.add_range(physical_network, range);
                Ok(())
            }
            _ => Err(ConfigError::vlan_range(
                entry,
                "expected <physical_network>:<vlan_min>:<vlan_max> or <physical_network>",
            )),
        }
    }

    /// Registers a physical network without adding any range.
    pub fn add_network(&mut self, physical_network: impl Into<String>) {
        self.ranges.entry(physical_network.into()).or_default();
    }

    pub fn add_range(&mut self, physical_network: impl Into<String>, range: VlanRange) {
        self.ranges.entry(physical_network.into()).or_default().push(range);
    }

    pub fn is_configured(&self, physical_network: &str) -> bool {
        self.ranges.contains_key(physical_network)
    }

    pub fn ranges(&self, physical_network: &str) -> &[VlanRange] {
        self.ranges.get(physical_network).map(Vec::as_slice).unwrap_or_default()
    }

    /// True if `id` falls in any configured range of `physical_network`.
    pub fn contains(&self, physical_network: &str, id: i64) -> bool {
        self.ranges(physical_network).iter().any(|r| r.contains(id))
    }

    /// Every id inside the configured ranges of `physical_network`.
    pub fn allocatable_ids(&self, physical_network: &str) -> BTreeSet<i64> {
        self.ranges(physical_network).iter().flat_map(VlanRange::ids).collect()
    }

    pub fn physical_networks(&self) -> impl Iterator<Item = &str> {
        self.ranges.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[VlanRange])> {
        self.ranges.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

fn parse_tag(entry: &str, value: &str) -> ConfigResult<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::vlan_range(entry, format!("'{}' is not an integer", value.trim())))
}

/// Physical network to host interface mapping, from
/// `physical_interface_mappings` entries of the form `<physnet>:<interface>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceMappings {
    mappings: BTreeMap<String, String>,
}

impl InterfaceMappings {
    pub fn parse<I, S>(entries: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mappings = BTreeMap::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let Some((physical_network, interface)) = entry.split_once(':') else {
                return Err(ConfigError::interface_mapping(
                    entry,
                    "expected <physical_network>:<physical_interface>",
                ));
            };
            let (physical_network, interface) = (physical_network.trim(), interface.trim());
            if physical_network.is_empty() || interface.is_empty() || interface.contains(':') {
                return Err(ConfigError::interface_mapping(
                    entry,
                    "expected <physical_network>:<physical_interface>",
                ));
            }
            if mappings.insert(physical_network.to_string(), interface.to_string()).is_some() {
                return Err(ConfigError::interface_mapping(
                    entry,
                    format!("physical network '{physical_network}' mapped more than once"),
                ));
            }
        }
        Ok(Self { mappings })
    }

    pub fn interface(&self, physical_network: &str) -> Option<&str> {
        self.mappings.get(physical_network).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.mappings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_ranges_and_bare_networks() {
        let ranges =
            NetworkVlanRanges::parse(["net1:10:12", "net1:20:20", "net2", "default:1:1000"]).unwrap();

        assert!(ranges.is_configured("net2"));
        assert!(ranges.ranges("net2").is_empty());
        assert_eq!(ranges.ranges("net1").len(), 2);
        assert!(ranges.contains("net1", 11));
        assert!(ranges.contains("net1", 20));
        assert!(!ranges.contains("net1", 13));
        assert!(!ranges.contains("net3", 11));
        assert_eq!(
            ranges.allocatable_ids("net1").into_iter().collect::<Vec<_>>(),
            vec![10, 11, 12, 20]
        );
        assert_eq!(
            ranges.physical_networks().collect::<Vec<_>>(),
            vec!["default", "net1", "net2"]
        );
    }

    #[test]
    fn test_overlapping_ranges_deduplicate_ids() {
        let ranges = NetworkVlanRanges::parse(["net1:10:12", "net1:11:13"]).unwrap();
        assert_eq!(ranges.allocatable_ids("net1").len(), 4);
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        for entry in ["net1:10", "net1:a:12", "net1:12:10", "net1:0:10", "net1:1:4095", ":1:2", "n:1:2:3"] {
            let err = NetworkVlanRanges::parse([entry]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidVlanRange { .. }),
                "{entry} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_interface_mappings() {
        let mappings = InterfaceMappings::parse(["default:eth2", " net1 : eth3 "]).unwrap();
        assert_eq!(mappings.interface("default"), Some("eth2"));
        assert_eq!(mappings.interface("net1"), Some("eth3"));
        assert_eq!(mappings.interface("net2"), None);
        assert_eq!(mappings.len(), 2);
    }

    #[test]
    fn test_invalid_interface_mappings() {
        assert!(InterfaceMappings::parse(["eth2"]).is_err());
        assert!(InterfaceMappings::parse(["default:"]).is_err());
        assert!(InterfaceMappings::parse(["default:eth2", "default:eth3"]).is_err());
    }
}
