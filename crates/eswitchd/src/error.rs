//! Error types for eswitchd

use eswitch_common::{ConfigError, ShellError};
use eswitch_types::MacAddress;
use thiserror::Error;

use crate::device_db::DeviceKind;

/// Errors that can occur in eswitchd
#[derive(Debug, Error)]
pub enum EswitchdError {
    /// No fabric registered under this name
    #[error("Fabric not found: {0}")]
    FabricNotFound(String),

    /// `add_fabric` called for a name that is already registered
    #[error("Fabric already exists: {0}")]
    FabricExists(String),

    /// The physical function behind an interface could not be resolved
    /// from the device tree (link or `dev_id` missing)
    #[error("Physical function details not available for interface {0}")]
    PfNotFound(String),

    /// Device unknown to the fabric (or of the other kind)
    #[error("Device {dev} not found on fabric {fabric}")]
    DeviceNotFound { fabric: String, dev: String },

    /// Device is held by another consumer
    #[error("Device {dev} on fabric {fabric} is already allocated")]
    AlreadyAllocated { fabric: String, dev: String },

    /// No free device of the requested kind
    #[error("No free {kind} device on fabric {fabric}")]
    PoolExhausted { fabric: String, kind: DeviceKind },

    /// No vNIC with this MAC is known to the daemon
    #[error("vNIC {0} not found")]
    VnicNotFound(MacAddress),

    /// MAC already holds a device other than the one requested
    #[error("vNIC {mac} already holds device {dev} on fabric {fabric}")]
    VnicInUse {
        mac: MacAddress,
        fabric: String,
        dev: String,
    },

    /// Fabric is mapped to a different interface than requested
    #[error("Fabric {fabric} is mapped to {existing}, not {requested}")]
    MappingConflict {
        fabric: String,
        existing: String,
        requested: String,
    },

    /// Hypervisor query failed
    #[error("Hypervisor error: {0}")]
    Hypervisor(#[from] ShellError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Reply payload could not be encoded
    #[error("Cannot encode reply: {0}")]
    Encode(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EswitchdError {
    pub fn device_not_found(fabric: impl Into<String>, dev: impl Into<String>) -> Self {
        Self::DeviceNotFound { fabric: fabric.into(), dev: dev.into() }
    }

    pub fn already_allocated(fabric: impl Into<String>, dev: impl Into<String>) -> Self {
        Self::AlreadyAllocated { fabric: fabric.into(), dev: dev.into() }
    }

    /// True for failures caused by the state of the pool rather than by
    /// the request itself.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EswitchdError::AlreadyAllocated { .. }
                | EswitchdError::PoolExhausted { .. }
                | EswitchdError::FabricExists(_)
                | EswitchdError::VnicInUse { .. }
                | EswitchdError::MappingConflict { .. }
        )
    }
}

/// Result type alias for eswitchd operations
pub type Result<T> = std::result::Result<T, EswitchdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EswitchdError::PoolExhausted { fabric: "default".into(), kind: DeviceKind::Vf };
        assert_eq!(err.to_string(), "No free vf device on fabric default");

        let err = EswitchdError::already_allocated("default", "eth4");
        assert_eq!(err.to_string(), "Device eth4 on fabric default is already allocated");
    }

    #[test]
    fn test_is_conflict() {
        assert!(EswitchdError::already_allocated("f", "eth4").is_conflict());
        assert!(EswitchdError::FabricExists("f".into()).is_conflict());
        assert!(!EswitchdError::device_not_found("f", "eth4").is_conflict());
        assert!(!EswitchdError::FabricNotFound("f".into()).is_conflict());
    }
}
