//! Provider network attributes and port binding profiles.
//!
//! A network created with any provider attribute is a provider network and
//! must describe itself completely:
//!
//! | type    | physical network          | segmentation id            |
//! |---------|---------------------------|----------------------------|
//! | `flat`  | configured, or `default`  | none (stored as `-1`)      |
//! | `vlan`  | configured, or `default`  | required, 1 through 4094   |
//! | `ib`    | configured, or `default`  | required, 1 through 4094   |
//! | `local` | none                      | none (stored as `-2`)      |

use eswitch_common::{NetworkVlanRanges, DEFAULT_PHYSICAL_NETWORK};
use eswitch_types::{is_valid_vlan_tag, NetworkType, VnicType, FLAT_VLAN_ID, LOCAL_VLAN_ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PluginError, Result};

/// Key of the vNIC type in a port's binding profile.
pub const VNIC_TYPE_KEY: &str = "vnic_type";

/// Provider attributes as given by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttributes {
    #[serde(rename = "provider:network_type", default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    #[serde(rename = "provider:physical_network", default, skip_serializing_if = "Option::is_none")]
    pub physical_network: Option<String>,
    #[serde(rename = "provider:segmentation_id", default, skip_serializing_if = "Option::is_none")]
    pub segmentation_id: Option<i64>,
}

impl ProviderAttributes {
    pub fn vlan(physical_network: impl Into<String>, segmentation_id: i64) -> Self {
        Self {
            network_type: Some(NetworkType::Vlan.to_string()),
            physical_network: Some(physical_network.into()),
            segmentation_id: Some(segmentation_id),
        }
    }

    pub fn flat(physical_network: impl Into<String>) -> Self {
        Self {
            network_type: Some(NetworkType::Flat.to_string()),
            physical_network: Some(physical_network.into()),
            segmentation_id: None,
        }
    }

    pub fn local() -> Self {
        Self { network_type: Some(NetworkType::Local.to_string()), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.network_type.is_none() && self.physical_network.is_none() && self.segmentation_id.is_none()
    }
}

/// Validated provider network: what gets reserved and bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderNetwork {
    pub network_type: NetworkType,
    /// `None` only for local networks.
    pub physical_network: Option<String>,
    pub segmentation_id: i64,
}

/// Validates provider attributes of a new network. `Ok(None)` means none
/// were given and the network is a tenant network.
pub fn process_provider_create(
    attrs: &ProviderAttributes,
    ranges: &NetworkVlanRanges,
) -> Result<Option<ProviderNetwork>> {
    if attrs.is_empty() {
        return Ok(None);
    }

    let Some(network_type) = attrs.network_type.as_deref() else {
        return Err(PluginError::invalid_input("provider:network_type required"));
    };
    let network_type: NetworkType = network_type
        .parse()
        .map_err(|_| PluginError::invalid_input(format!("provider:network_type {network_type} not supported")))?;

    let segmentation_id = match network_type {
        NetworkType::Flat => {
            if attrs.segmentation_id.is_some() {
                return Err(PluginError::invalid_input("provider:segmentation_id specified for flat network"));
            }
            FLAT_VLAN_ID
        }
        NetworkType::Vlan | NetworkType::Ib => {
            let Some(segmentation_id) = attrs.segmentation_id else {
                return Err(PluginError::invalid_input("provider:segmentation_id required"));
            };
            if !is_valid_vlan_tag(segmentation_id) {
                return Err(PluginError::invalid_input(
                    "provider:segmentation_id out of range (1 through 4094)",
                ));
            }
            segmentation_id
        }
        NetworkType::Local => {
            if attrs.physical_network.is_some() {
                return Err(PluginError::invalid_input(
                    "provider:physical_network specified for local network",
                ));
            }
            if attrs.segmentation_id.is_some() {
                return Err(PluginError::invalid_input("provider:segmentation_id specified for local network"));
            }
            return Ok(Some(ProviderNetwork { network_type, physical_network: None, segmentation_id: LOCAL_VLAN_ID }));
        }
    };

    let physical_network = match attrs.physical_network.as_deref() {
        Some(name) if ranges.is_configured(name) => name.to_string(),
        Some(name) => {
            return Err(PluginError::invalid_input(format!("unknown provider:physical_network {name}")));
        }
        None if ranges.is_configured(DEFAULT_PHYSICAL_NETWORK) => DEFAULT_PHYSICAL_NETWORK.to_string(),
        None => return Err(PluginError::invalid_input("provider:physical_network required")),
    };

    Ok(Some(ProviderNetwork { network_type, physical_network: Some(physical_network), segmentation_id }))
}

/// Provider attributes cannot change once a network exists.
pub fn check_provider_update(attrs: &ProviderAttributes) -> Result<()> {
    if attrs.is_empty() {
        Ok(())
    } else {
        Err(PluginError::invalid_input("Plugin does not support updating provider attributes"))
    }
}

/// vNIC type of a new port: from the `vnic_type` key of its binding
/// profile, or `default` when no profile is given.
pub fn vnic_type_from_profile(profile: Option<&Value>, default: VnicType) -> Result<VnicType> {
    let Some(profile) = profile else {
        return Ok(default);
    };
    match profile.get(VNIC_TYPE_KEY) {
        Some(Value::String(name)) => name
            .parse()
            .map_err(|_| PluginError::invalid_input("invalid vnic_type on port_create")),
        Some(_) => Err(PluginError::invalid_input("invalid vnic_type on port_create")),
        None => Err(PluginError::invalid_input("vnic_type is not defined in port profile")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ranges() -> NetworkVlanRanges {
        NetworkVlanRanges::parse(["default:1:100", "net2"]).unwrap()
    }

    fn attrs(network_type: Option<&str>, physical_network: Option<&str>, segmentation_id: Option<i64>) -> ProviderAttributes {
        ProviderAttributes {
            network_type: network_type.map(str::to_string),
            physical_network: physical_network.map(str::to_string),
            segmentation_id,
        }
    }

    fn rejected(a: ProviderAttributes) -> String {
        match process_provider_create(&a, &ranges()) {
            Err(PluginError::InvalidInput(message)) => message,
            other => panic!("expected InvalidInput for {a:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_no_attributes_is_tenant_network() {
        assert_eq!(process_provider_create(&ProviderAttributes::default(), &ranges()).unwrap(), None);
    }

    #[test]
    fn test_vlan_network() {
        let network = process_provider_create(&ProviderAttributes::vlan("net2", 4094), &ranges()).unwrap().unwrap();
        assert_eq!(
            network,
            ProviderNetwork {
                network_type: NetworkType::Vlan,
                physical_network: Some("net2".into()),
                segmentation_id: 4094,
            }
        );

        assert_eq!(rejected(attrs(Some("vlan"), Some("net2"), None)), "provider:segmentation_id required");
        assert!(rejected(attrs(Some("ib"), Some("net2"), Some(0))).contains("out of range"));
        assert!(rejected(attrs(Some("vlan"), Some("net2"), Some(4095))).contains("out of range"));
    }

    #[test]
    fn test_flat_network_uses_sentinel_and_default_physnet() {
        let network = process_provider_create(&attrs(Some("flat"), None, None), &ranges()).unwrap().unwrap();
        assert_eq!(network.physical_network.as_deref(), Some("default"));
        assert_eq!(network.segmentation_id, FLAT_VLAN_ID);

        assert!(rejected(attrs(Some("flat"), None, Some(5))).contains("flat network"));
    }

    #[test]
    fn test_local_network() {
        let network = process_provider_create(&ProviderAttributes::local(), &ranges()).unwrap().unwrap();
        assert_eq!(network.physical_network, None);
        assert_eq!(network.segmentation_id, LOCAL_VLAN_ID);

        assert!(rejected(attrs(Some("local"), Some("default"), None)).contains("physical_network"));
        assert!(rejected(attrs(Some("local"), None, Some(3))).contains("segmentation_id"));
    }

    #[test]
    fn test_type_and_physical_network_checks() {
        assert_eq!(rejected(attrs(None, Some("net2"), Some(5))), "provider:network_type required");
        assert_eq!(rejected(attrs(Some("gre"), None, None)), "provider:network_type gre not supported");
        assert_eq!(
            rejected(attrs(Some("vlan"), Some("net9"), Some(5))),
            "unknown provider:physical_network net9"
        );

        let no_default = NetworkVlanRanges::parse(["net2"]).unwrap();
        assert!(matches!(
            process_provider_create(&attrs(Some("vlan"), None, Some(5)), &no_default),
            Err(PluginError::InvalidInput(m)) if m == "provider:physical_network required"
        ));
    }

    #[test]
    fn test_provider_update_rejected() {
        assert!(check_provider_update(&ProviderAttributes::default()).is_ok());
        assert!(check_provider_update(&ProviderAttributes::local()).is_err());
    }

    #[test]
    fn test_vnic_type_from_profile() {
        assert_eq!(vnic_type_from_profile(None, VnicType::Direct).unwrap(), VnicType::Direct);
        assert_eq!(
            vnic_type_from_profile(Some(&json!({"vnic_type": "hostdev"})), VnicType::Direct).unwrap(),
            VnicType::Hostdev
        );
        assert!(vnic_type_from_profile(Some(&json!({"vnic_type": "macvtap"})), VnicType::Direct).is_err());
        assert!(vnic_type_from_profile(Some(&json!({"vnic_type": 3})), VnicType::Direct).is_err());
        assert!(matches!(
            vnic_type_from_profile(Some(&json!({})), VnicType::Direct),
            Err(PluginError::InvalidInput(m)) if m.contains("not defined")
        ));
    }

    #[test]
    fn test_attributes_wire_names() {
        let a: ProviderAttributes = serde_json::from_value(json!({
            "provider:network_type": "vlan",
            "provider:physical_network": "default",
            "provider:segmentation_id": 7
        }))
        .unwrap();
        assert_eq!(a, ProviderAttributes::vlan("default", 7));
    }
}
