//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    Alert, AlertConfig, AlertId, ApiKey, Host, HostStatus, NewAlert, NewAuditRecord, NewHost,
    WebhookAuditRecord,
};
use crate::{HostFacts, HostId, LogRecord, MetricsSnapshot, ProcessRecord, UserId};

/// Health status of the storage backend
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Persistence interface consumed by the dispatcher and the telemetry service
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across request
/// handlers and polling tasks.
///
/// ## Ordering
///
/// Listing methods return the newest records first.
///
/// ## Cascade
///
/// Deleting a host removes its snapshots, process list, log entries, alerts
/// and alert configs.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create_host(&self, host: NewHost) -> StorageResult<Host>;

    async fn get_host(&self, host_id: HostId) -> StorageResult<Option<Host>>;

    async fn list_hosts(&self) -> StorageResult<Vec<Host>>;

    /// Set a host's status; `last_seen` is only touched when given
    ///
    /// Fails with `NotFound` when the host does not exist.
    async fn update_host_status(
        &self,
        host_id: HostId,
        status: HostStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    /// Refresh `last_seen` only, leaving the status as it is now
    async fn touch_host(&self, host_id: HostId, last_seen: DateTime<Utc>) -> StorageResult<()>;

    async fn update_host_facts(&self, host_id: HostId, facts: &HostFacts) -> StorageResult<()>;

    /// Delete a host and everything hanging off it. Returns whether it existed.
    async fn delete_host(&self, host_id: HostId) -> StorageResult<bool>;

    async fn insert_snapshot(&self, snapshot: &MetricsSnapshot) -> StorageResult<()>;

    /// Store a snapshot together with the alerts it raised, all or nothing
    async fn record_metrics(
        &self,
        snapshot: &MetricsSnapshot,
        alerts: Vec<NewAlert>,
    ) -> StorageResult<Vec<Alert>>;

    async fn latest_snapshots(
        &self,
        host_id: HostId,
        limit: usize,
    ) -> StorageResult<Vec<MetricsSnapshot>>;

    /// Replace the stored process list for a host with a fresh listing
    async fn replace_processes(
        &self,
        host_id: HostId,
        processes: &[ProcessRecord],
    ) -> StorageResult<()>;

    async fn processes(&self, host_id: HostId) -> StorageResult<Vec<ProcessRecord>>;

    async fn insert_logs(&self, host_id: HostId, logs: &[LogRecord]) -> StorageResult<()>;

    async fn recent_logs(&self, host_id: HostId, limit: usize) -> StorageResult<Vec<LogRecord>>;

    async fn insert_alerts(&self, alerts: Vec<NewAlert>) -> StorageResult<Vec<Alert>>;

    async fn alerts_for_host(&self, host_id: HostId) -> StorageResult<Vec<Alert>>;

    /// Mark an alert acknowledged by `actor`
    ///
    /// Acknowledging an already acknowledged alert returns it unchanged.
    async fn acknowledge_alert(&self, alert_id: AlertId, actor: UserId) -> StorageResult<Alert>;

    /// Insert or replace the rule for `(host_id, metric_type)`
    async fn upsert_alert_config(&self, config: AlertConfig) -> StorageResult<()>;

    async fn alert_configs(&self, host_id: HostId) -> StorageResult<Vec<AlertConfig>>;

    async fn insert_api_key(&self, key: ApiKey) -> StorageResult<()>;

    async fn find_api_key(&self, key: &str) -> StorageResult<Option<ApiKey>>;

    /// Deactivate a key. Returns whether the key exists.
    async fn revoke_api_key(&self, key: &str) -> StorageResult<bool>;

    async fn append_webhook_audit(
        &self,
        record: NewAuditRecord,
    ) -> StorageResult<WebhookAuditRecord>;

    async fn list_webhook_audits(&self, limit: usize) -> StorageResult<Vec<WebhookAuditRecord>>;

    /// Delete snapshots older than `before`, returning how many were removed
    async fn cleanup_old_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
