//! Error types for the control channel client and VIF driver

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Control channel failures.
///
/// [`Timeout`](ClientError::Timeout) and
/// [`ProtocolFailure`](ClientError::ProtocolFailure) are kept apart so callers
/// can retry the former and report the latter.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No reply within the request timeout. The connection has been dropped
    /// and the next request reconnects.
    #[error("Request {action} timed out after {}ms", timeout.as_millis())]
    Timeout { action: String, timeout: Duration },

    /// The daemon answered `FAIL`.
    #[error("Action {action} failed: {reason}")]
    ProtocolFailure { action: String, reason: String },

    /// The daemon answered with a status other than `OK` or `FAIL`.
    #[error("Unknown operation status {0}")]
    UnknownStatus(String),

    #[error("Cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The daemon closed the connection before replying.
    #[error("Connection closed by daemon")]
    ConnectionClosed,

    /// A reply frame or payload did not decode.
    #[error("Malformed reply to {action}: {message}")]
    Decode { action: String, message: String },

    /// `OK` without the payload the action requires.
    #[error("Reply to {0} carries no payload")]
    MissingPayload(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    /// True when re-issuing the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. }
                | ClientError::Connect { .. }
                | ClientError::ConnectionClosed
                | ClientError::Io(_)
        )
    }

    pub fn decode(action: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode { action: action.into(), message: message.to_string() }
    }
}

/// VIF driver failures.
#[derive(Debug, Error)]
pub enum VifError {
    /// The daemon could not provide a device for the vNIC.
    #[error("Virtual interface creation failed for instance {instance}: {source}")]
    CreateFailed {
        instance: String,
        #[source]
        source: ClientError,
    },

    /// The daemon returned a device handle the driver cannot use.
    #[error("Invalid device {dev} for {vnic_type} vNIC")]
    InvalidDevice { dev: String, vnic_type: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
