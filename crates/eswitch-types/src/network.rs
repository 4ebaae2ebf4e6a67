//! Network and vNIC classifications.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of a network as recorded in its binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Untagged traffic on a physical network.
    Flat,
    /// 802.1Q VLAN on a physical network.
    Vlan,
    /// InfiniBand partition on a physical network.
    Ib,
    /// Host-local network with no physical attachment.
    Local,
}

impl NetworkType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Flat => "flat",
            NetworkType::Vlan => "vlan",
            NetworkType::Ib => "ib",
            NetworkType::Local => "local",
        }
    }

    /// Flat, VLAN and IB networks live on a physical network.
    pub const fn has_physical_network(&self) -> bool {
        !matches!(self, NetworkType::Local)
    }

    /// VLAN and IB networks carry a real segmentation id.
    pub const fn is_segmented(&self) -> bool {
        matches!(self, NetworkType::Vlan | NetworkType::Ib)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(NetworkType::Flat),
            "vlan" => Ok(NetworkType::Vlan),
            "ib" => Ok(NetworkType::Ib),
            "local" => Ok(NetworkType::Local),
            _ => Err(ParseError::InvalidNetworkType(s.to_string())),
        }
    }
}

impl TryFrom<String> for NetworkType {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Network type used for networks created without provider attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TenantNetworkType {
    #[default]
    Vlan,
    Ib,
    Local,
    /// Tenant networks are disabled.
    None,
}

impl TenantNetworkType {
    /// Binding type for a tenant network, `None` when tenant networks are
    /// disabled.
    pub const fn network_type(&self) -> Option<NetworkType> {
        match self {
            TenantNetworkType::Vlan => Some(NetworkType::Vlan),
            TenantNetworkType::Ib => Some(NetworkType::Ib),
            TenantNetworkType::Local => Some(NetworkType::Local),
            TenantNetworkType::None => None,
        }
    }
}

impl fmt::Display for TenantNetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network_type() {
            Some(network_type) => f.write_str(network_type.as_str()),
            None => f.write_str("none"),
        }
    }
}

impl FromStr for TenantNetworkType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vlan" => Ok(TenantNetworkType::Vlan),
            "ib" => Ok(TenantNetworkType::Ib),
            "local" => Ok(TenantNetworkType::Local),
            "none" => Ok(TenantNetworkType::None),
            _ => Err(ParseError::InvalidNetworkType(s.to_string())),
        }
    }
}

impl TryFrom<String> for TenantNetworkType {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TenantNetworkType> for String {
    fn from(t: TenantNetworkType) -> String {
        t.to_string()
    }
}

/// Attachment mode of a guest vNIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VnicType {
    /// Macvtap passthrough over an Ethernet sub-interface.
    #[default]
    Direct,
    /// PCI passthrough of a virtual function.
    Hostdev,
}

impl VnicType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            VnicType::Direct => "direct",
            VnicType::Hostdev => "hostdev",
        }
    }

    /// Host-device vNICs consume a virtual function, direct vNICs consume an
    /// Ethernet device.
    pub const fn wants_virtual_function(&self) -> bool {
        matches!(self, VnicType::Hostdev)
    }
}

impl fmt::Display for VnicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VnicType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(VnicType::Direct),
            "hostdev" => Ok(VnicType::Hostdev),
            _ => Err(ParseError::InvalidVnicType(s.to_string())),
        }
    }
}

impl TryFrom<String> for VnicType {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
