//! Inbound webhook payloads and the response envelope

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DispatchError;
use super::signature::{self, SignatureError};
use crate::storage::{Alert, Host};
use crate::{HostId, MetricsSnapshot};

const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<HostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WebhookPayload {
    pub fn new(action: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            host_id: None,
            data: None,
            api_key: api_key.into(),
            signature: None,
        }
    }

    pub fn with_host(mut self, host_id: HostId) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn unsigned(&self) -> Self {
        Self {
            signature: None,
            ..self.clone()
        }
    }

    /// Sign every field except `signature` itself
    pub fn signed(mut self, secret: &str) -> Result<Self, SignatureError> {
        self.signature = Some(signature::sign(&self.unsigned(), secret)?);
        Ok(self)
    }

    /// Whether the attached signature matches the rest of the payload
    pub fn verify_signature(&self, secret: &str) -> bool {
        match &self.signature {
            Some(sig) => signature::verify(&self.unsigned(), sig, secret),
            None => false,
        }
    }

    /// The payload as recorded in the audit trail, API key masked
    pub fn audit_view(&self) -> Value {
        let mut view = serde_json::to_value(self).unwrap_or(Value::Null);
        mask_api_key(&mut view);
        view
    }
}

pub(crate) fn mask_api_key(view: &mut Value) {
    if let Some(key) = view.get_mut("apiKey") {
        *key = Value::String(REDACTED.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateHost,
    DeleteHost,
    StartHost,
    StopHost,
    RestartHost,
    UpdateMetrics,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateHost => "create_host",
            Action::DeleteHost => "delete_host",
            Action::StartHost => "start_host",
            Action::StopHost => "stop_host",
            Action::RestartHost => "restart_host",
            Action::UpdateMetrics => "update_metrics",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_host" => Ok(Action::CreateHost),
            "delete_host" => Ok(Action::DeleteHost),
            "start_host" => Ok(Action::StartHost),
            "stop_host" => Ok(Action::StopHost),
            "restart_host" => Ok(Action::RestartHost),
            "update_metrics" => Ok(Action::UpdateMetrics),
            _ => Err(DispatchError::unknown_action()),
        }
    }
}

fn required_data(data: Option<&Value>) -> Result<&serde_json::Map<String, Value>, DispatchError> {
    data.and_then(Value::as_object)
        .ok_or_else(|| DispatchError::validation("data", "data must be an object"))
}

/// First present key among `names`
fn lookup<'a>(data: &'a serde_json::Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| data.get(*name))
}

fn required_string(
    data: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, DispatchError> {
    match data.get(field).and_then(Value::as_str).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(DispatchError::validation(
            field,
            format!("{field} must be a non-empty string"),
        )),
    }
}

fn percent_field(
    data: &serde_json::Map<String, Value>,
    names: &[&str],
) -> Result<f64, DispatchError> {
    let field = names[0];
    let Some(raw) = lookup(data, names) else {
        return Ok(0.0);
    };

    match raw.as_f64() {
        Some(value) if (0.0..=100.0).contains(&value) => Ok(value),
        Some(_) => Err(DispatchError::validation(
            field,
            format!("{field} must be between 0 and 100"),
        )),
        None => Err(DispatchError::validation(
            field,
            format!("{field} must be a number"),
        )),
    }
}

fn count_field(data: &serde_json::Map<String, Value>, names: &[&str]) -> Result<u64, DispatchError> {
    let field = names[0];
    match lookup(data, names) {
        None => Ok(0),
        Some(raw) => raw.as_u64().ok_or_else(|| {
            DispatchError::validation(field, format!("{field} must be a non-negative integer"))
        }),
    }
}

/// Validated `create_host` data
#[derive(Debug, Clone, PartialEq)]
pub struct CreateHostRequest {
    pub name: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
}

impl CreateHostRequest {
    pub fn from_data(data: Option<&Value>) -> Result<Self, DispatchError> {
        let data = required_data(data)?;

        let port = match data.get("port") {
            None | Some(Value::Null) => 22,
            Some(raw) => raw
                .as_u64()
                .and_then(|port| u16::try_from(port).ok())
                .filter(|port| *port != 0)
                .ok_or_else(|| DispatchError::validation("port", "port must be 1-65535"))?,
        };

        Ok(Self {
            name: required_string(data, "name")?,
            hostname: required_string(data, "hostname")?,
            ip_address: required_string(data, "ipAddress")?,
            port,
        })
    }
}

/// Validated `update_metrics` data
///
/// Missing readings default to zero; present ones must be in range.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsUpdate {
    pub cpu_usage_percent: f64,
    pub ram_used_percent: f64,
    pub ram_used_bytes: u64,
    pub disk_used_percent: f64,
    pub disk_used_bytes: u64,
    pub network_in_bytes: u64,
    pub network_out_bytes: u64,
    pub active_connections: u64,
}

impl MetricsUpdate {
    pub fn from_data(data: Option<&Value>) -> Result<Self, DispatchError> {
        let data = required_data(data)?;

        Ok(Self {
            cpu_usage_percent: percent_field(data, &["cpuUsagePercent"])?,
            ram_used_percent: percent_field(data, &["ramUsagePercent", "ramUsedPercent"])?,
            ram_used_bytes: count_field(data, &["ramUsedBytes"])?,
            disk_used_percent: percent_field(data, &["diskUsagePercent", "diskUsedPercent"])?,
            disk_used_bytes: count_field(data, &["diskUsedBytes"])?,
            network_in_bytes: count_field(data, &["networkInBytes"])?,
            network_out_bytes: count_field(data, &["networkOutBytes"])?,
            active_connections: count_field(data, &["activeConnections"])?,
        })
    }

    pub fn into_snapshot(self, host_id: HostId, timestamp: DateTime<Utc>) -> MetricsSnapshot {
        MetricsSnapshot {
            host_id,
            cpu_usage_percent: self.cpu_usage_percent,
            ram_used_bytes: self.ram_used_bytes,
            ram_used_percent: self.ram_used_percent,
            disk_used_bytes: self.disk_used_bytes,
            disk_used_percent: self.disk_used_percent,
            network_in_bytes: self.network_in_bytes,
            network_out_bytes: self.network_out_bytes,
            active_connections: self.active_connections,
            timestamp,
        }
    }
}

/// Action-specific part of a successful response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionResult {
    Host {
        host: Host,
    },
    Deleted {
        #[serde(rename = "hostId")]
        host_id: HostId,
    },
    Metrics {
        snapshot: MetricsSnapshot,
        alerts: Vec<Alert>,
    },
}

/// `{success: true, ...action fields, message}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: ActionResult,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(result: ActionResult, message: impl Into<String>) -> Self {
        Self {
            success: true,
            result,
            message: message.into(),
        }
    }
}
