//! Persisted records
//!
//! Telemetry records themselves (`MetricsSnapshot`, `ProcessRecord`,
//! `LogRecord`) live at the crate root; this module holds the entities that
//! only exist once stored: hosts, alerts, alert rules, API keys and the
//! webhook audit trail.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{HostFacts, HostId, MetricType, UserId};

pub type AlertId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
    Warning,
    Error,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
            HostStatus::Warning => "warning",
            HostStatus::Error => "error",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(HostStatus::Online),
            "offline" => Ok(HostStatus::Offline),
            "warning" => Ok(HostStatus::Warning),
            "error" => Ok(HostStatus::Error),
            other => Err(format!("unknown host status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    pub status: HostStatus,
    pub owner_id: UserId,
    pub facts: HostFacts,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when registering a host; the store assigns the rest
#[derive(Debug, Clone, PartialEq)]
pub struct NewHost {
    pub name: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    pub owner_id: UserId,
    pub status: HostStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// An alert produced by threshold evaluation, not yet stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub host_id: HostId,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
}

/// A stored alert
///
/// Only acknowledgment mutates it, and an acknowledged alert is never
/// re-opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub host_id: HostId,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<UserId>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn from_new(id: AlertId, alert: NewAlert, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            host_id: alert.host_id,
            metric_type: alert.metric_type,
            current_value: alert.current_value,
            threshold: alert.threshold,
            severity: alert.severity,
            message: alert.message,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertOperator {
    Greater,
    Less,
    Equal,
}

impl AlertOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertOperator::Greater => "greater",
            AlertOperator::Less => "less",
            AlertOperator::Equal => "equal",
        }
    }

    /// Whether `value` trips a rule with this operator and `threshold`
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertOperator::Greater => value > threshold,
            AlertOperator::Less => value < threshold,
            AlertOperator::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl FromStr for AlertOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater" => Ok(AlertOperator::Greater),
            "less" => Ok(AlertOperator::Less),
            "equal" => Ok(AlertOperator::Equal),
            other => Err(format!("unknown alert operator: {other}")),
        }
    }
}

/// A user-editable alert rule; at most one per host and metric type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    pub host_id: HostId,
    pub metric_type: MetricType,
    pub threshold: f64,
    pub operator: AlertOperator,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    pub owner_id: UserId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Who an audit record is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditActor {
    /// No user could be resolved (bad key, rejected before lookup)
    System,
    User(UserId),
}

impl AuditActor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            AuditActor::System => None,
            AuditActor::User(id) => Some(*id),
        }
    }

    pub fn from_user_id(user_id: Option<UserId>) -> Self {
        user_id.map_or(AuditActor::System, AuditActor::User)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
    Pending,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
            AuditStatus::Pending => "pending",
        }
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditStatus::Success),
            "failed" => Ok(AuditStatus::Failed),
            "pending" => Ok(AuditStatus::Pending),
            other => Err(format!("unknown audit status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRecord {
    pub actor: AuditActor,
    pub action: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub status: AuditStatus,
    pub error: Option<String>,
}

/// One entry of the append-only webhook audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuditRecord {
    pub id: i64,
    pub actor: AuditActor,
    pub action: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub status: AuditStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookAuditRecord {
    pub fn from_new(id: i64, record: NewAuditRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            actor: record.actor,
            action: record.action,
            request: record.request,
            response: record.response,
            status: record.status,
            error: record.error,
            created_at,
        }
    }
}
