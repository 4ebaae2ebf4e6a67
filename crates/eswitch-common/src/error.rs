//! Error types for configuration loading and helper commands.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
///
/// Every variant is fatal at startup: a daemon or plugin that sees one of
/// these must not continue with a partial configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file exists but could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML for the expected schema.
    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A `network_vlan_ranges` entry is malformed.
    #[error("Invalid network VLAN range '{entry}': {message}")]
    InvalidVlanRange {
        /// The offending entry.
        entry: String,
        /// Error message.
        message: String,
    },

    /// A `physical_interface_mappings` entry is malformed.
    #[error("Invalid interface mapping '{entry}': {message}")]
    InvalidInterfaceMapping {
        /// The offending entry.
        entry: String,
        /// Error message.
        message: String,
    },

    /// Any other field failed validation.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidField {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid VLAN range error.
    pub fn vlan_range(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidVlanRange {
            entry: entry.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid interface mapping error.
    pub fn interface_mapping(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInterfaceMapping {
            entry: entry.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for shell helpers.
pub type ShellResult<T> = Result<T, ShellError>;

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The command could not be spawned.
    #[error("Failed to execute shell command '{command}': {source}")]
    Exec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The command returned a non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlan_range_display() {
        let err = ConfigError::vlan_range("net1:10", "expected <physnet>:<min>:<max>");
        assert_eq!(
            err.to_string(),
            "Invalid network VLAN range 'net1:10': expected <physnet>:<min>:<max>"
        );
    }

    #[test]
    fn test_parse_display_includes_path() {
        let err = ConfigError::Parse {
            path: PathBuf::from("/etc/eswitch/eswitch.toml"),
            message: "expected `=`".to_string(),
        };
        assert!(err.to_string().contains("/etc/eswitch/eswitch.toml"));
    }

    #[test]
    fn test_command_failed_display() {
        let err = ShellError::CommandFailed {
            command: "virsh list --uuid".to_string(),
            exit_code: 1,
            output: "failed to connect to the hypervisor".to_string(),
        };
        assert!(err.to_string().contains("virsh list"));
        assert!(err.to_string().contains("exit code 1"));
    }
}
