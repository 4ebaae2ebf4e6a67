//! Control channel wire protocol.
//!
//! Every frame is a single JSON object. Requests carry an `action` tag and
//! action specific fields; replies carry a `status` of `OK` (optionally with a
//! `response` payload) or `FAIL` (with the failing `action` and a `reason`).
//!
//! ```text
//! -> {"action":"create_port","vnic_mac":"fa:16:3e:00:00:01","device_id":"vm-1",
//!     "fabric":"default","vnic_type":"direct","dev_name":null}
//! <- {"status":"OK","response":{"dev":"eth4"}}
//! <- {"status":"FAIL","action":"create_port","reason":"no free device"}
//! ```

use crate::{MacAddress, VnicType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wildcard fabric accepted by `get_vnics`.
pub const ALL_FABRICS: &str = "*";

pub const STATUS_OK: &str = "OK";
pub const STATUS_FAIL: &str = "FAIL";

/// How `port_up`/`port_down`/`port_release` identify the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefBy {
    #[default]
    MacAddress,
}

/// A request to the control daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Allocate a device for a vNIC.
    CreatePort {
        vnic_mac: MacAddress,
        device_id: String,
        fabric: String,
        vnic_type: VnicType,
        #[serde(default)]
        dev_name: Option<String>,
    },
    /// Bind an already known device to a vNIC.
    PlugNic {
        vnic_mac: MacAddress,
        device_id: String,
        fabric: String,
        vnic_type: VnicType,
        dev_name: String,
    },
    /// Release the device held by a vNIC.
    DeletePort { fabric: String, vnic_mac: MacAddress },
    DefineFabricMapping { fabric: String, interface: String },
    PortUp {
        fabric: String,
        #[serde(default)]
        ref_by: RefBy,
        mac: MacAddress,
    },
    PortDown {
        fabric: String,
        #[serde(default)]
        ref_by: RefBy,
        mac: MacAddress,
    },
    PortRelease {
        fabric: String,
        #[serde(default)]
        ref_by: RefBy,
        mac: MacAddress,
    },
    GetVnics { fabric: String },
    SetVlan { fabric: String, port_mac: MacAddress, vlan: i64 },
}

impl Request {
    /// The `action` tag this request is sent with.
    pub const fn action(&self) -> &'static str {
        match self {
            Request::CreatePort { .. } => "create_port",
            Request::PlugNic { .. } => "plug_nic",
            Request::DeletePort { .. } => "delete_port",
            Request::DefineFabricMapping { .. } => "define_fabric_mapping",
            Request::PortUp { .. } => "port_up",
            Request::PortDown { .. } => "port_down",
            Request::PortRelease { .. } => "port_release",
            Request::GetVnics { .. } => "get_vnics",
            Request::SetVlan { .. } => "set_vlan",
        }
    }
}

/// Reply envelope as it appears on the wire.
///
/// `status` is kept as a string so that unrecognised values survive decoding
/// and can be reported, see [`Reply::into_outcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Decoded meaning of a [`Reply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Ok(Option<Value>),
    Fail { action: String, reason: String },
    Unknown(String),
}

impl Reply {
    /// `OK` carrying `payload`. Fails when the payload cannot be encoded.
    pub fn ok(payload: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            status: STATUS_OK.to_string(),
            response: Some(serde_json::to_value(payload)?),
            action: None,
            reason: None,
        })
    }

    pub fn ok_empty() -> Self {
        Self { status: STATUS_OK.to_string(), response: None, action: None, reason: None }
    }

    pub fn fail(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAIL.to_string(),
            response: None,
            action: Some(action.into()),
            reason: Some(reason.into()),
        }
    }

    pub fn into_outcome(self) -> ReplyOutcome {
        match self.status.as_str() {
            STATUS_OK => ReplyOutcome::Ok(self.response),
            STATUS_FAIL => ReplyOutcome::Fail {
                action: self.action.unwrap_or_default(),
                reason: self.reason.unwrap_or_default(),
            },
            _ => ReplyOutcome::Unknown(self.status),
        }
    }
}

/// Payload of `create_port`, `plug_nic` and `delete_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReply {
    pub dev: String,
}

/// Administrative state of a vNIC's switch port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Up,
    #[default]
    Down,
}

/// One entry of the `get_vnics` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnicInfo {
    pub mac: MacAddress,
    pub fabric: String,
    pub dev: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub vnic_type: VnicType,
    #[serde(default)]
    pub vlan: Option<i64>,
    #[serde(default)]
    pub state: PortState,
}
