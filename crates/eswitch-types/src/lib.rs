//! Common types for the eSwitch SR-IOV control plane.
//!
//! - [`MacAddress`]: vNIC hardware addresses
//! - [`PciAddress`]: PCI function addresses of physical and virtual functions
//! - [`NetworkType`], [`TenantNetworkType`], [`VnicType`]: network and vNIC classifications
//! - [`VlanRange`]: allocatable segmentation id ranges
//! - [`protocol`]: requests and replies exchanged with the control daemon

mod mac;
mod network;
mod pci;
pub mod protocol;
mod segmentation;

pub use mac::MacAddress;
pub use network::{NetworkType, TenantNetworkType, VnicType};
pub use pci::PciAddress;
pub use segmentation::{
    is_valid_vlan_tag, VlanRange, FLAT_VLAN_ID, LOCAL_VLAN_ID, MAX_VLAN_TAG, MIN_VLAN_TAG,
};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid PCI address format: {0}")]
    InvalidPciAddress(String),

    #[error("invalid VLAN range: {0} (must be within 1-4094, min <= max)")]
    InvalidVlanRange(String),

    #[error("invalid network type: {0}")]
    InvalidNetworkType(String),

    #[error("invalid vnic type: {0} (must be direct or hostdev)")]
    InvalidVnicType(String),
}
