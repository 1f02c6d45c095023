//! Data models for collected topology facts

use serde::{Deserialize, Serialize};

/// Value reported for identity fields the switch does not expose
pub const NOT_AVAILABLE: &str = "N/A";

/// Device address and web UI credentials for one request
///
/// Lives only for the duration of a single extraction call.
#[derive(Clone)]
pub struct SwitchTarget {
    pub ip: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SwitchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchTarget")
            .field("ip", &self.ip)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Inbound request body shared by every extraction route
///
/// Field names follow the wire format used by the polling application.
#[derive(Debug, Default, Deserialize)]
pub struct ExtractRequest {
    pub ip: Option<String>,
    pub user: Option<String>,
    #[serde(rename = "pass")]
    pub password: Option<String>,
}

impl ExtractRequest {
    /// Turn the body into a target, requiring all three fields to be non-empty
    ///
    /// Only the address is trimmed; credentials are passed on byte for byte.
    pub fn into_target(self) -> Option<SwitchTarget> {
        Some(SwitchTarget {
            ip: self
                .ip
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())?,
            username: self.user.filter(|u| !u.is_empty())?,
            password: self.password.filter(|p| !p.is_empty())?,
        })
    }
}

/// One learned MAC address on an SG200
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MacTableEntry {
    pub switch_ip: String,
    pub vlan: u32,
    /// Lower-case colon-hex, e.g. `00:0c:29:b2:94:c0`
    pub mac: String,
    /// Interface label as shown in the switch UI, e.g. `GE1`
    pub port_index: String,
}

#[derive(Debug, Serialize)]
pub struct MacTable {
    pub switch_ip: String,
    pub entries: Vec<MacTableEntry>,
}

/// Identity of an SG200; every field is always populated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemSummary {
    pub switch_ip: String,
    pub host_name: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub model_description: String,
}

/// One row of the Netgear access-control device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessControlEntry {
    pub router_ip: String,
    pub ip: String,
    pub mac: String,
    pub status: String,
    pub conn_type: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccessControlList {
    pub router_ip: String,
    pub entries: Vec<AccessControlEntry>,
    /// Set when the page had none of the markup we parse
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
