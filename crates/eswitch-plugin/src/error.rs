//! Error types for the segmentation id allocator and the plugin workflow

use eswitch_client::ClientError;
use eswitch_common::ConfigError;
use thiserror::Error;

/// Errors raised by the allocator, the binding tables and the plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No network with this id
    #[error("Network {0} could not be found")]
    NetworkNotFound(String),

    /// No port with this id
    #[error("Port {0} could not be found")]
    PortNotFound(String),

    /// Network still has ports
    #[error("Unable to complete operation on network {network_id}: there are {ports} ports on it")]
    NetworkInUse { network_id: String, ports: i64 },

    /// Requested segmentation id is held by another network
    #[error("Unable to create the network: segmentation id {segmentation_id} on physical network {physical_network} is in use")]
    SegmentationIdInUse {
        physical_network: String,
        segmentation_id: i64,
    },

    /// Every configured segmentation id is allocated
    #[error("Unable to create the network: no tenant network is available for allocation")]
    NoNetworkAvailable,

    /// Tenant network type is `none`
    #[error("Tenant network creation is not enabled")]
    TenantNetworksDisabled,

    /// Request attributes failed validation
    #[error("Invalid input for operation: {0}")]
    InvalidInput(String),

    /// Store query failed
    #[error("Database error in {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Schema migration failed
    #[error("Database migration failed: {reason}")]
    Migration { reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Agent notification failed
    #[error("Agent notification failed: {0}")]
    Client(#[from] ClientError),
}

impl PluginError {
    pub fn database(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Database { operation, source }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn migration(reason: impl ToString) -> Self {
        Self::Migration { reason: reason.to_string() }
    }

    /// True for failures that depend on the current allocation state and
    /// may succeed once ids are released.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PluginError::SegmentationIdInUse { .. } | PluginError::NoNetworkAvailable | PluginError::NetworkInUse { .. }
        )
    }

    /// True for transient store or channel failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            PluginError::Database { source, .. } => {
                matches!(source, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
                    || source.as_database_error().and_then(|e| e.code()).is_some_and(|code| code == "5")
            }
            PluginError::Client(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_use_message_names_id() {
        let err = PluginError::SegmentationIdInUse {
            physical_network: "net1".into(),
            segmentation_id: 10,
        };
        assert!(err.to_string().contains("segmentation id 10 on physical network net1"));
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = PluginError::database("reserve_network", sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        assert!(!err.is_conflict());
        assert!(!PluginError::invalid_input("bad").is_retryable());
    }
}
