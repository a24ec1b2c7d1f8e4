pub mod alerts;
pub mod collector;
pub mod config;
pub mod remote;
pub mod storage;
pub mod util;
pub mod webhook;

#[cfg(feature = "api")]
pub mod api;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a monitored host
pub type HostId = i64;

/// Identifier of a user owning hosts and API keys
pub type UserId = i64;

/// One point-in-time telemetry reading for a host
///
/// Percentages are always within `[0, 100]`; use [`MetricsSnapshot::clamped`]
/// after building a snapshot from untrusted numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub host_id: HostId,
    pub cpu_usage_percent: f64,
    pub ram_used_bytes: u64,
    pub ram_used_percent: f64,
    pub disk_used_bytes: u64,
    pub disk_used_percent: f64,
    pub network_in_bytes: u64,
    pub network_out_bytes: u64,
    pub active_connections: u64,
    pub timestamp: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// A snapshot with every reading set to zero
    pub fn zeroed(host_id: HostId) -> Self {
        Self {
            host_id,
            cpu_usage_percent: 0.0,
            ram_used_bytes: 0,
            ram_used_percent: 0.0,
            disk_used_bytes: 0,
            disk_used_percent: 0.0,
            network_in_bytes: 0,
            network_out_bytes: 0,
            active_connections: 0,
            timestamp: Utc::now(),
        }
    }

    /// Force every percentage into `[0, 100]`
    pub fn clamped(mut self) -> Self {
        self.cpu_usage_percent = remote::parse::clamp_percent(self.cpu_usage_percent);
        self.ram_used_percent = remote::parse::clamp_percent(self.ram_used_percent);
        self.disk_used_percent = remote::parse::clamp_percent(self.disk_used_percent);
        self
    }

    /// Reading for a given metric type, as used by alert evaluation
    pub fn value_of(&self, metric: MetricType) -> f64 {
        match metric {
            MetricType::Cpu => self.cpu_usage_percent,
            MetricType::Ram => self.ram_used_percent,
            MetricType::Disk => self.disk_used_percent,
            MetricType::Network => (self.network_in_bytes + self.network_out_bytes) as f64,
        }
    }
}

/// Static-ish facts about a host, refreshed on every poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostFacts {
    pub os: String,
    pub kernel: String,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub ram_total_bytes: u64,
    pub disk_total_bytes: u64,
    pub uptime_secs: u64,
}

/// Everything a single `collect_metrics` call produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub snapshot: MetricsSnapshot,
    pub facts: HostFacts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: u32,
    pub owner: String,
    pub cpu_usage_percent: f64,
    pub ram_used_bytes: u64,
    pub name: String,
    pub status: ProcessStatus,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Zombie,
}

impl ProcessStatus {
    /// Map a `ps` STAT column to a status (first character decides)
    pub fn from_stat(stat: &str) -> Self {
        match stat.chars().next() {
            Some('R') => ProcessStatus::Running,
            Some('T') | Some('t') => ProcessStatus::Stopped,
            Some('Z') => ProcessStatus::Zombie,
            _ => ProcessStatus::Sleeping,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Zombie => "zombie",
        }
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ProcessStatus::Running),
            "sleeping" => Ok(ProcessStatus::Sleeping),
            "stopped" => Ok(ProcessStatus::Stopped),
            "zombie" => Ok(ProcessStatus::Zombie),
            other => Err(format!("unknown process status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub raw_details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Journal priority to level: 0 critical, 1 error, 2 warning, anything else info
    pub fn from_priority(priority: i64) -> Self {
        match priority {
            0 => LogLevel::Critical,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Metric families alerts can be raised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Cpu,
    Ram,
    Disk,
    Network,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Cpu => write!(f, "cpu"),
            MetricType::Ram => write!(f, "ram"),
            MetricType::Disk => write!(f, "disk"),
            MetricType::Network => write!(f, "network"),
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(MetricType::Cpu),
            "ram" => Ok(MetricType::Ram),
            "disk" => Ok(MetricType::Disk),
            "network" => Ok(MetricType::Network),
            other => Err(format!("unknown metric type: {other}")),
        }
    }
}
