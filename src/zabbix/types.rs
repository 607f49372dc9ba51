//! Wire types for the Zabbix JSON-RPC API.
//!
//! Zabbix serializes almost everything as strings, including numeric IDs and
//! status fields; the structs here mirror that.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Zabbix host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "hostid")]
    pub host_id: String,
    /// Technical name.
    #[serde(default)]
    pub host: String,
    /// Visible name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub interfaces: Vec<HostInterface>,
    #[serde(default)]
    pub groups: Vec<HostGroup>,
    #[serde(default, rename = "parentTemplates")]
    pub templates: Vec<Template>,
}

/// A Zabbix host interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInterface {
    #[serde(default, rename = "interfaceid")]
    pub interface_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub dns: String,
    #[serde(default)]
    pub port: String,
    #[serde(default, rename = "type")]
    pub interface_type: String,
    #[serde(default)]
    pub main: String,
    #[serde(default, rename = "useip")]
    pub use_ip: String,
}

/// A Zabbix host group (also used for template groups, which share the same
/// `{groupid, name}` shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostGroup {
    #[serde(rename = "groupid")]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
}

/// A Zabbix template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "templateid")]
    pub template_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub name: String,
}

/// A Zabbix item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, rename = "itemid")]
    pub item_id: String,
    #[serde(default, rename = "hostid")]
    pub host_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "key_")]
    pub key: String,
    /// Most recent value.
    #[serde(default, rename = "lastvalue")]
    pub value: String,
    #[serde(default)]
    pub value_type: String,
    #[serde(default)]
    pub state: String,
}

/// Low-Level Discovery payload: `{"data": [{macro: value, ...}, ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LldData {
    pub data: Vec<Value>,
}

/// A generic Zabbix API response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// A Zabbix API error triple.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: String,
}
