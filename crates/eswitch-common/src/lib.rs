//! Shared infrastructure for the eSwitch daemon, client and plugin.
//!
//! - [`config`]: TOML configuration with defaults and fatal validation
//! - [`vlan_ranges`]: `network_vlan_ranges` and `physical_interface_mappings` parsing
//! - [`command`]: external command execution
//! - [`logging`]: tracing subscriber setup
//! - [`error`]: error types

pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod vlan_ranges;

pub use config::{EswitchConfig, DEFAULT_CONFIG_PATH};
pub use error::{ConfigError, ConfigResult, ShellError, ShellResult};
pub use vlan_ranges::{InterfaceMappings, NetworkVlanRanges, DEFAULT_PHYSICAL_NETWORK};
