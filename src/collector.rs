//! Polling glue between the session pool and the store
//!
//! [`TelemetryService::poll_host`] performs one poll of one host: reuse or
//! open its pooled session, run the telemetry commands, persist what came
//! back and move the host's status accordingly.
//!
//! ```text
//! connect failed        -> offline, session dropped
//! connection lost       -> error,   session dropped
//! configured alert(s)   -> warning
//! otherwise             -> online
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{AlertNotifier, evaluate_configs};
use crate::config::{ConnectionConfig, SshSettings};
use crate::remote::{
    RemoteSession, SessionError, SessionHandle, SessionPool, SshTransport, Transport,
};
use crate::storage::{Alert, HostStatus, StorageBackend, StorageError};
use crate::{HostFacts, HostId, LogRecord, MetricsSnapshot, ProcessRecord};

/// Builds a fresh, unopened transport for a new pooled session
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

type PooledSession = SessionHandle<Box<dyn Transport>>;

#[derive(Debug)]
pub enum PollError {
    /// The host does not exist in the store
    NotFound(HostId),

    /// No connection details were registered for the host
    NoCredentials(HostId),

    /// The host could not be reached or authenticated against
    Connection { host_id: HostId, reason: String },

    /// The session failed mid-poll
    Session(SessionError),

    Storage(StorageError),
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::NotFound(id) => write!(f, "host {} not found", id),
            PollError::NoCredentials(id) => {
                write!(f, "no connection details registered for host {}", id)
            }
            PollError::Connection { host_id, reason } => {
                write!(f, "failed to connect to host {}: {}", host_id, reason)
            }
            PollError::Session(err) => write!(f, "session error: {}", err),
            PollError::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Session(err) => Some(err),
            PollError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for PollError {
    fn from(err: StorageError) -> Self {
        PollError::Storage(err)
    }
}

/// What one successful poll produced
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub host_id: HostId,
    pub status: HostStatus,
    pub snapshot: MetricsSnapshot,
    pub facts: HostFacts,
    /// `None` when the process listing failed
    pub processes: Option<usize>,
    /// Log entries newer than anything already stored
    pub new_logs: usize,
    pub alerts: Vec<Alert>,
}

struct Collected {
    snapshot: MetricsSnapshot,
    facts: HostFacts,
    processes: Option<Vec<ProcessRecord>>,
    logs: Vec<LogRecord>,
}

pub struct TelemetryService {
    pool: Arc<SessionPool<Box<dyn Transport>>>,
    store: Arc<dyn StorageBackend>,
    connections: RwLock<HashMap<HostId, ConnectionConfig>>,
    make_transport: TransportFactory,
    command_timeout: Option<Duration>,
    log_lines: usize,
    notifier: Option<AlertNotifier>,
}

impl TelemetryService {
    pub fn new(store: Arc<dyn StorageBackend>, make_transport: TransportFactory) -> Self {
        Self {
            pool: Arc::new(SessionPool::new()),
            store,
            connections: RwLock::new(HashMap::new()),
            make_transport,
            command_timeout: None,
            log_lines: 50,
            notifier: None,
        }
    }

    /// Service opening real SSH sessions with the configured timeouts
    pub fn ssh(store: Arc<dyn StorageBackend>, settings: &SshSettings) -> Self {
        let connect_timeout = settings.connect_timeout();
        let factory: TransportFactory =
            Arc::new(move || Box::new(SshTransport::new(connect_timeout)) as Box<dyn Transport>);

        Self::new(store, factory).with_command_timeout(settings.command_timeout())
    }

    pub fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = Some(limit);
        self
    }

    pub fn with_log_lines(mut self, lines: usize) -> Self {
        self.log_lines = lines;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<AlertNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn pool(&self) -> &Arc<SessionPool<Box<dyn Transport>>> {
        &self.pool
    }

    /// Record how to reach a host. Takes effect on its next new session.
    pub async fn register(&self, host_id: HostId, config: ConnectionConfig) {
        debug!("registered {} for host {host_id}", config.address());
        self.connections.write().await.insert(host_id, config);
    }

    /// Forget a host's connection details and close its pooled session
    pub async fn unregister(&self, host_id: HostId) -> bool {
        let known = self.connections.write().await.remove(&host_id).is_some();
        if let Err(e) = self.pool.remove(host_id).await {
            warn!("failed to close session for host {host_id}: {e}");
        }
        known
    }

    pub async fn registered_hosts(&self) -> Vec<HostId> {
        let mut ids: Vec<HostId> = self.connections.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[instrument(skip(self))]
    pub async fn poll_host(&self, host_id: HostId) -> Result<PollReport, PollError> {
        let Some(host) = self.store.get_host(host_id).await? else {
            // the host was deleted; its session has nothing left to poll
            if let Err(e) = self.pool.remove(host_id).await {
                warn!("failed to close session for deleted host {host_id}: {e}");
            }
            return Err(PollError::NotFound(host_id));
        };

        let config = self
            .connections
            .read()
            .await
            .get(&host_id)
            .cloned()
            .ok_or(PollError::NoCredentials(host_id))?;

        let collected = self.collect(host_id, config).await?;

        let configs = self.store.alert_configs(host_id).await?;
        let raised = evaluate_configs(&configs, &collected.snapshot);
        let alerts = self.store.record_metrics(&collected.snapshot, raised).await?;

        self.store.update_host_facts(host_id, &collected.facts).await?;

        let processes = match &collected.processes {
            Some(list) => {
                self.store.replace_processes(host_id, list).await?;
                Some(list.len())
            }
            None => None,
        };

        let new_logs = self.store_new_logs(host_id, collected.logs).await?;

        let status = if alerts.is_empty() {
            HostStatus::Online
        } else {
            HostStatus::Warning
        };
        self.store
            .update_host_status(host_id, status, Some(Utc::now()))
            .await?;

        if !alerts.is_empty() {
            info!("host {host_id} raised {} configured alert(s)", alerts.len());
            if let Some(notifier) = &self.notifier {
                notifier.notify(&host.name, &alerts).await;
            }
        }

        Ok(PollReport {
            host_id,
            status,
            snapshot: collected.snapshot,
            facts: collected.facts,
            processes,
            new_logs,
            alerts,
        })
    }

    /// Poll every registered host concurrently
    pub async fn poll_all(&self) -> Vec<(HostId, Result<PollReport, PollError>)> {
        let hosts = self.registered_hosts().await;
        debug!("polling {} host(s)", hosts.len());

        join_all(
            hosts
                .into_iter()
                .map(|host_id| async move { (host_id, self.poll_host(host_id).await) }),
        )
        .await
    }

    async fn collect(
        &self,
        host_id: HostId,
        config: ConnectionConfig,
    ) -> Result<Collected, PollError> {
        let handle = self
            .pool
            .get_or_insert_with(host_id, || {
                let mut session = RemoteSession::new(host_id, config, (self.make_transport)());
                session.set_command_timeout(self.command_timeout);
                session
            })
            .await;
        let mut session = handle.lock().await;

        match session.try_connect().await {
            Ok(()) => {}
            // removed from the pool while we waited for the lock
            Err(SessionError::Retired) => return Err(PollError::Session(SessionError::Retired)),
            Err(e) => {
                drop(session);
                self.drop_session(host_id, &handle, HostStatus::Offline).await;
                return Err(PollError::Connection {
                    host_id,
                    reason: e.to_string(),
                });
            }
        }

        let report = match session.collect_metrics().await {
            Ok(report) => report,
            Err(e) => {
                drop(session);
                return Err(self.fail(host_id, &handle, e).await);
            }
        };

        let processes = match session.list_processes().await {
            Ok(list) => Some(list),
            Err(e) => {
                warn!("process listing for host {host_id} failed: {e}");
                None
            }
        };

        let logs = match session.read_logs(self.log_lines).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("log read for host {host_id} failed: {e}");
                Vec::new()
            }
        };

        if !session.is_connected() {
            drop(session);
            let lost = SessionError::Connection("connection lost during poll".to_string());
            return Err(self.fail(host_id, &handle, lost).await);
        }

        Ok(Collected {
            snapshot: report.snapshot,
            facts: report.facts,
            processes,
            logs,
        })
    }

    async fn fail(&self, host_id: HostId, handle: &PooledSession, err: SessionError) -> PollError {
        error!("poll of host {host_id} failed: {err}");
        self.drop_session(host_id, handle, HostStatus::Error).await;
        PollError::Session(err)
    }

    /// Discard the session this poll used and mark the host unhealthy
    async fn drop_session(&self, host_id: HostId, handle: &PooledSession, status: HostStatus) {
        if let Err(e) = self.pool.remove_handle(host_id, handle).await {
            warn!("failed to close session for host {host_id}: {e}");
        }
        if let Err(e) = self.store.update_host_status(host_id, status, None).await {
            error!("failed to mark host {host_id} {status}: {e}");
        }
    }

    /// Persist only entries newer than the newest stored one
    async fn store_new_logs(
        &self,
        host_id: HostId,
        logs: Vec<LogRecord>,
    ) -> Result<usize, PollError> {
        let newest = self
            .store
            .recent_logs(host_id, 1)
            .await?
            .first()
            .map(|log| log.timestamp);

        let fresh: Vec<LogRecord> = logs
            .into_iter()
            .filter(|log| newest.is_none_or(|newest| log.timestamp > newest))
            .collect();

        if !fresh.is_empty() {
            self.store.insert_logs(host_id, &fresh).await?;
        }
        Ok(fresh.len())
    }
}
