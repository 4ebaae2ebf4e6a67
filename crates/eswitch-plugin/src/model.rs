//! Network and port resources as seen by callers of the plugin.

use eswitch_types::{MacAddress, NetworkType, VnicType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ProviderAttributes;

/// Operational status of a network or port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Status {
    Active,
    #[default]
    Down,
    Build,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_admin_state")]
    pub admin_state_up: bool,
    #[serde(flatten)]
    pub provider: ProviderAttributes,
}

impl NetworkRequest {
    /// Tenant network request.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), admin_state_up: true, provider: ProviderAttributes::default() }
    }

    pub fn with_provider(mut self, provider: ProviderAttributes) -> Self {
        self.provider = provider;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin_state_up: Option<bool>,
    #[serde(flatten)]
    pub provider: ProviderAttributes,
}

/// A network with its provider attributes.
///
/// Flat networks report no segmentation id and local networks report
/// neither a physical network nor a segmentation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub admin_state_up: bool,
    pub status: Status,
    #[serde(rename = "provider:network_type")]
    pub network_type: NetworkType,
    #[serde(rename = "provider:physical_network")]
    pub physical_network: Option<String>,
    #[serde(rename = "provider:segmentation_id")]
    pub segmentation_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequest {
    pub network_id: String,
    #[serde(default)]
    pub name: String,
    pub mac_address: MacAddress,
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_admin_state")]
    pub admin_state_up: bool,
    /// `{"vnic_type": "direct" | "hostdev"}`; the configured default is used
    /// when absent.
    #[serde(rename = "binding:profile", default, skip_serializing_if = "Option::is_none")]
    pub binding_profile: Option<Value>,
}

impl PortRequest {
    pub fn new(network_id: impl Into<String>, mac_address: MacAddress) -> Self {
        Self {
            network_id: network_id.into(),
            name: String::new(),
            mac_address,
            device_id: String::new(),
            admin_state_up: true,
            binding_profile: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_profile(mut self, profile: Value) -> Self {
        self.binding_profile = Some(profile);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin_state_up: Option<bool>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// A port with its binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub mac_address: MacAddress,
    pub device_id: String,
    pub admin_state_up: bool,
    pub status: Status,
    #[serde(rename = "binding:vif_type")]
    pub vif_type: Option<VnicType>,
    /// Physical network of the port's network.
    #[serde(rename = "binding:physical_network")]
    pub physical_network: Option<String>,
}

fn default_admin_state() -> bool {
    true
}
