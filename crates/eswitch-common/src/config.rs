//! Configuration file support.
//!
//! All components read one TOML file, default location
//! `/etc/eswitch/eswitch.toml`. Missing files fall back to defaults; a file
//! that exists but does not parse or validate is a fatal error.
//!
//! ```toml
//! [vlans]
//! tenant_network_type = "vlan"
//! network_vlan_ranges = ["default:1:1000", "net2"]
//!
//! [database]
//! sql_connection = "sqlite:///var/lib/eswitch/eswitch.db"
//!
//! [eswitch]
//! physical_interface_mappings = ["default:eth2"]
//! daemon_endpoint = "127.0.0.1:5001"
//! request_timeout_ms = 3000
//! ```

use eswitch_types::{TenantNetworkType, VnicType};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::vlan_ranges::{InterfaceMappings, NetworkVlanRanges};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/eswitch/eswitch.toml";

/// Tenant network and segmentation id settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlansConfig {
    /// Network type for networks created without provider attributes.
    #[serde(default)]
    pub tenant_network_type: TenantNetworkType,

    /// `<physical_network>:<vlan_min>:<vlan_max>` or `<physical_network>`.
    #[serde(default = "default_network_vlan_ranges")]
    pub network_vlan_ranges: Vec<String>,
}

/// Segmentation id store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    #[serde(default = "default_sql_connection")]
    pub sql_connection: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Control channel and fabric settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// `<physical_network>:<physical_interface>`.
    #[serde(default)]
    pub physical_interface_mappings: Vec<String>,

    /// `host:port` of the control daemon.
    #[serde(default = "default_daemon_endpoint")]
    pub daemon_endpoint: String,

    /// Per-request reply deadline on the control channel.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// vNIC type for ports created without a binding profile.
    #[serde(default)]
    pub vnic_type: VnicType,
}

/// Control daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Listen address of the request server.
    #[serde(default = "default_daemon_endpoint")]
    pub listen: String,

    /// Root under which `sys/bus/pci/devices` and `sys/class/net` are read.
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Rebuild allocations from running domains at startup.
    #[serde(default = "default_true")]
    pub scan_attached: bool,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Agent notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    /// Send port and network notifications to the daemon.
    #[serde(default = "default_true")]
    pub rpc: bool,
}

/// VIF driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VifConfig {
    /// Physical network vNICs are plugged into.
    #[serde(default = "default_fabric")]
    pub fabric: String,

    #[serde(default)]
    pub vnic_type: VnicType,
}

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EswitchConfig {
    #[serde(default)]
    pub vlans: VlansConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub eswitch: SwitchConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub vif: VifConfig,
}

fn default_network_vlan_ranges() -> Vec<String> {
    vec!["default:1:1000".to_string()]
}

fn default_sql_connection() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_daemon_endpoint() -> String {
    "127.0.0.1:5001".to_string()
}

fn default_request_timeout() -> u64 {
    3000
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_polling_interval() -> u64 {
    2
}

fn default_fabric() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for VlansConfig {
    fn default() -> Self {
        Self {
            tenant_network_type: TenantNetworkType::default(),
            network_vlan_ranges: default_network_vlan_ranges(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sql_connection: default_sql_connection(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            physical_interface_mappings: Vec::new(),
            daemon_endpoint: default_daemon_endpoint(),
            request_timeout_ms: default_request_timeout(),
            vnic_type: VnicType::default(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: default_daemon_endpoint(),
            sysfs_root: default_sysfs_root(),
            scan_attached: true,
            log_level: default_log_level(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_polling_interval(),
            rpc: true,
        }
    }
}

impl Default for VifConfig {
    fn default() -> Self {
        Self {
            fabric: default_fabric(),
            vnic_type: VnicType::default(),
        }
    }
}

impl EswitchConfig {
    /// Load configuration from file, falling back to defaults if the file is
    /// not found. The loaded configuration is validated.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        let config = match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| match e {
                ConfigError::Parse { message, .. } => ConfigError::Parse {
                    path: path.to_path_buf(),
                    message,
                },
                other => other,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        Ok(config)
    }

    /// Load from the default location or defaults.
    pub fn load() -> ConfigResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field that has structure beyond its TOML type.
    pub fn validate(&self) -> ConfigResult<()> {
        self.network_vlan_ranges()?;
        self.interface_mappings()?;
        if self.eswitch.request_timeout_ms == 0 {
            return Err(ConfigError::invalid_field(
                "eswitch.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid_field(
                "database.max_connections",
                "must be greater than zero",
            ));
        }
        if self.vif.fabric.trim().is_empty() {
            return Err(ConfigError::invalid_field("vif.fabric", "must not be empty"));
        }
        Ok(())
    }

    pub fn network_vlan_ranges(&self) -> ConfigResult<NetworkVlanRanges> {
        NetworkVlanRanges::parse(&self.vlans.network_vlan_ranges)
    }

    pub fn interface_mappings(&self) -> ConfigResult<InterfaceMappings> {
        InterfaceMappings::parse(&self.eswitch.physical_interface_mappings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.eswitch.request_timeout_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.agent.polling_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EswitchConfig::default();
        assert_eq!(config.vlans.tenant_network_type, TenantNetworkType::Vlan);
        assert_eq!(config.vlans.network_vlan_ranges, vec!["default:1:1000"]);
        assert_eq!(config.eswitch.daemon_endpoint, "127.0.0.1:5001");
        assert_eq!(config.request_timeout(), Duration::from_millis(3000));
        assert_eq!(config.polling_interval(), Duration::from_secs(2));
        assert_eq!(config.vif.fabric, "default");
        assert!(config.agent.rpc);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = EswitchConfig::from_toml(
            r#"
            [vlans]
            tenant_network_type = "ib"

            [eswitch]
            physical_interface_mappings = ["default:eth2"]
            request_timeout_ms = 1000
            vnic_type = "hostdev"
            "#,
        )
        .unwrap();

        assert_eq!(config.vlans.tenant_network_type, TenantNetworkType::Ib);
        assert_eq!(config.vlans.network_vlan_ranges, vec!["default:1:1000"]);
        assert_eq!(config.eswitch.vnic_type, VnicType::Hostdev);
        assert_eq!(config.request_timeout(), Duration::from_millis(1000));
        assert_eq!(config.interface_mappings().unwrap().interface("default"), Some("eth2"));
        assert_eq!(config.database.sql_connection, "sqlite::memory:");
    }

    #[test]
    fn test_invalid_tenant_network_type_is_fatal() {
        let err = EswitchConfig::from_toml("[vlans]\ntenant_network_type = \"gre\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_range_is_fatal() {
        let err =
            EswitchConfig::from_toml("[vlans]\nnetwork_vlan_ranges = [\"net1:9:x\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVlanRange { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = EswitchConfig::from_toml("[eswitch]\nrequest_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = EswitchConfig::load_or_default("/nonexistent/eswitch.toml").unwrap();
        assert_eq!(config.vif.fabric, "default");
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[vlans").unwrap();

        let err = EswitchConfig::load_or_default(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("expected Parse, got {other:?}"),
        }
    }
}
