use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::codec::flexible_u64_opt;

/// One entry of the tenant listing
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantDescriptor {
    #[serde(default)]
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TenantListResponse {
    #[serde(default)]
    pub value: Vec<TenantDescriptor>,
}

/// Base resource URI of a provisioned cloud shell instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudShellEndpoint {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConsoleResponse {
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl ConsoleResponse {
    pub fn uri(&self) -> Option<&str> {
        self.properties.get("uri").and_then(|value| value.as_str())
    }

    pub fn provisioning_state(&self) -> Option<&str> {
        self.properties
            .get("provisioningState")
            .and_then(|value| value.as_str())
    }
}

/// Body of the console PUT: `{Properties:{consoleRequestProperties:{osType:"linux"}}}`
#[derive(Debug, Serialize)]
pub(crate) struct ConsoleRequest {
    #[serde(rename = "Properties")]
    pub properties: ConsoleRequestProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsoleRequestProperties {
    pub console_request_properties: ConsoleOsType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsoleOsType {
    pub os_type: String,
}

impl ConsoleRequest {
    pub fn linux() -> Self {
        Self {
            properties: ConsoleRequestProperties {
                console_request_properties: ConsoleOsType {
                    os_type: "linux".to_string(),
                },
            },
        }
    }
}

/// Metadata describing a live terminal
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalDescriptor {
    #[serde(default)]
    pub id: String,
    pub socket_uri: String,
    #[serde(default, rename = "idleTimeout", deserialize_with = "flexible_u64_opt")]
    pub idle_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub token_updated: bool,
    #[serde(default)]
    pub root_directory: Option<String>,
}

/// Which shell the terminal runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellKind {
    #[default]
    PowerShell,
    Bash,
}

impl ShellKind {
    /// Value of the `shell` query parameter
    pub fn as_query_value(&self) -> &'static str {
        match self {
            ShellKind::PowerShell => "pwsh",
            ShellKind::Bash => "bash",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellKind::PowerShell => f.write_str("PowerShell"),
            ShellKind::Bash => f.write_str("Bash"),
        }
    }
}

/// Terminal geometry in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}
