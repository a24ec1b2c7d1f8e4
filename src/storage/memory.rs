//! In-memory storage backend (no persistence)
//!
//! Used by tests and when the config selects `"backend": "none"`. Every
//! operation runs under a single lock, so multi-record writes are atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Alert, AlertConfig, AlertId, ApiKey, Host, HostStatus, NewAlert, NewAuditRecord, NewHost,
    WebhookAuditRecord,
};
use crate::{HostFacts, HostId, LogRecord, MetricType, MetricsSnapshot, ProcessRecord, UserId};

#[derive(Default)]
struct State {
    next_host_id: HostId,
    next_alert_id: AlertId,
    next_audit_id: i64,
    hosts: BTreeMap<HostId, Host>,
    snapshots: Vec<MetricsSnapshot>,
    processes: HashMap<HostId, Vec<ProcessRecord>>,
    logs: HashMap<HostId, Vec<LogRecord>>,
    alerts: BTreeMap<AlertId, Alert>,
    alert_configs: BTreeMap<(HostId, MetricType), AlertConfig>,
    api_keys: HashMap<String, ApiKey>,
    audits: Vec<WebhookAuditRecord>,
}

impl State {
    fn require_host(&self, host_id: HostId) -> StorageResult<()> {
        if !self.hosts.contains_key(&host_id) {
            return Err(StorageError::host_not_found(host_id));
        }
        Ok(())
    }

    fn push_alerts(&mut self, alerts: Vec<NewAlert>) -> StorageResult<Vec<Alert>> {
        for alert in &alerts {
            self.require_host(alert.host_id)?;
        }

        let now = Utc::now();
        let stored = alerts
            .into_iter()
            .map(|alert| {
                self.next_alert_id += 1;
                let alert = Alert::from_new(self.next_alert_id, alert, now);
                self.alerts.insert(alert.id, alert.clone());
                alert
            })
            .collect();

        Ok(stored)
    }
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_host(&self, host: NewHost) -> StorageResult<Host> {
        let mut state = self.state.write().await;
        state.next_host_id += 1;

        let host = Host {
            id: state.next_host_id,
            name: host.name,
            hostname: host.hostname,
            ip_address: host.ip_address,
            port: host.port,
            status: host.status,
            owner_id: host.owner_id,
            facts: HostFacts::default(),
            last_seen: None,
            created_at: Utc::now(),
        };
        state.hosts.insert(host.id, host.clone());

        debug!("created host {} ({})", host.id, host.name);
        Ok(host)
    }

    async fn get_host(&self, host_id: HostId) -> StorageResult<Option<Host>> {
        Ok(self.state.read().await.hosts.get(&host_id).cloned())
    }

    async fn list_hosts(&self) -> StorageResult<Vec<Host>> {
        Ok(self.state.read().await.hosts.values().cloned().collect())
    }

    async fn update_host_status(
        &self,
        host_id: HostId,
        status: HostStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let host = state
            .hosts
            .get_mut(&host_id)
            .ok_or_else(|| StorageError::host_not_found(host_id))?;

        host.status = status;
        if last_seen.is_some() {
            host.last_seen = last_seen;
        }
        Ok(())
    }

    async fn touch_host(&self, host_id: HostId, last_seen: DateTime<Utc>) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let host = state
            .hosts
            .get_mut(&host_id)
            .ok_or_else(|| StorageError::host_not_found(host_id))?;

        host.last_seen = Some(last_seen);
        Ok(())
    }

    async fn update_host_facts(&self, host_id: HostId, facts: &HostFacts) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let host = state
            .hosts
            .get_mut(&host_id)
            .ok_or_else(|| StorageError::host_not_found(host_id))?;

        host.facts = facts.clone();
        Ok(())
    }

    async fn delete_host(&self, host_id: HostId) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if state.hosts.remove(&host_id).is_none() {
            return Ok(false);
        }

        state.snapshots.retain(|s| s.host_id != host_id);
        state.processes.remove(&host_id);
        state.logs.remove(&host_id);
        state.alerts.retain(|_, a| a.host_id != host_id);
        state.alert_configs.retain(|(id, _), _| *id != host_id);

        debug!("deleted host {host_id}");
        Ok(true)
    }

    async fn insert_snapshot(&self, snapshot: &MetricsSnapshot) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.require_host(snapshot.host_id)?;
        state.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn record_metrics(
        &self,
        snapshot: &MetricsSnapshot,
        alerts: Vec<NewAlert>,
    ) -> StorageResult<Vec<Alert>> {
        let mut state = self.state.write().await;
        state.require_host(snapshot.host_id)?;

        let stored = state.push_alerts(alerts)?;
        state.snapshots.push(snapshot.clone());
        Ok(stored)
    }

    async fn latest_snapshots(
        &self,
        host_id: HostId,
        limit: usize,
    ) -> StorageResult<Vec<MetricsSnapshot>> {
        let state = self.state.read().await;
        let mut snapshots: Vec<MetricsSnapshot> = state
            .snapshots
            .iter()
            .filter(|s| s.host_id == host_id)
            .cloned()
            .collect();

        // stable sort keeps insertion order for equal timestamps
        snapshots.sort_by_key(|s| s.timestamp);
        snapshots.reverse();
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    async fn replace_processes(
        &self,
        host_id: HostId,
        processes: &[ProcessRecord],
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.require_host(host_id)?;
        state.processes.insert(host_id, processes.to_vec());
        Ok(())
    }

    async fn processes(&self, host_id: HostId) -> StorageResult<Vec<ProcessRecord>> {
        Ok(self
            .state
            .read()
            .await
            .processes
            .get(&host_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_logs(&self, host_id: HostId, logs: &[LogRecord]) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.require_host(host_id)?;
        state
            .logs
            .entry(host_id)
            .or_default()
            .extend_from_slice(logs);
        Ok(())
    }

    async fn recent_logs(&self, host_id: HostId, limit: usize) -> StorageResult<Vec<LogRecord>> {
        let state = self.state.read().await;
        let mut logs = state.logs.get(&host_id).cloned().unwrap_or_default();

        logs.sort_by_key(|l| l.timestamp);
        logs.reverse();
        logs.truncate(limit);
        Ok(logs)
    }

    async fn insert_alerts(&self, alerts: Vec<NewAlert>) -> StorageResult<Vec<Alert>> {
        self.state.write().await.push_alerts(alerts)
    }

    async fn alerts_for_host(&self, host_id: HostId) -> StorageResult<Vec<Alert>> {
        Ok(self
            .state
            .read()
            .await
            .alerts
            .values()
            .rev()
            .filter(|a| a.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn acknowledge_alert(&self, alert_id: AlertId, actor: UserId) -> StorageResult<Alert> {
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| StorageError::NotFound(format!("alert {alert_id} not found")))?;

        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_by = Some(actor);
            alert.acknowledged_at = Some(Utc::now());
        }
        Ok(alert.clone())
    }

    async fn upsert_alert_config(&self, config: AlertConfig) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.require_host(config.host_id)?;
        state
            .alert_configs
            .insert((config.host_id, config.metric_type), config);
        Ok(())
    }

    async fn alert_configs(&self, host_id: HostId) -> StorageResult<Vec<AlertConfig>> {
        Ok(self
            .state
            .read()
            .await
            .alert_configs
            .values()
            .filter(|c| c.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn insert_api_key(&self, key: ApiKey) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state.api_keys.contains_key(&key.key) {
            return Err(StorageError::QueryFailed("duplicate API key".to_string()));
        }
        state.api_keys.insert(key.key.clone(), key);
        Ok(())
    }

    async fn find_api_key(&self, key: &str) -> StorageResult<Option<ApiKey>> {
        Ok(self.state.read().await.api_keys.get(key).cloned())
    }

    async fn revoke_api_key(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        match state.api_keys.get_mut(key) {
            Some(api_key) => {
                api_key.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_webhook_audit(
        &self,
        record: NewAuditRecord,
    ) -> StorageResult<WebhookAuditRecord> {
        let mut state = self.state.write().await;
        state.next_audit_id += 1;

        let record = WebhookAuditRecord::from_new(state.next_audit_id, record, Utc::now());
        state.audits.push(record.clone());
        Ok(record)
    }

    async fn list_webhook_audits(&self, limit: usize) -> StorageResult<Vec<WebhookAuditRecord>> {
        Ok(self
            .state
            .read()
            .await
            .audits
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cleanup_old_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let count = state.snapshots.len();
        state.snapshots.retain(|s| s.timestamp >= before);
        let removed = count - state.snapshots.len();

        debug!("removed {removed} snapshot(s) older than {before}");
        Ok(removed)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("hosts".to_string(), state.hosts.len().to_string()),
                ("snapshots".to_string(), state.snapshots.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
