//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//! - **Cascades**: Foreign keys are enforced, deleting a host deletes its rows
//!
//! Timestamps are stored as Unix milliseconds, except journal entries, which
//! keep the microseconds the journal reports. Byte counters are `INTEGER`
//! saturating at `i64::MAX`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Alert, AlertConfig, AlertId, ApiKey, AuditActor, Host, HostStatus, NewAlert, NewAuditRecord,
    NewHost, WebhookAuditRecord,
};
use crate::{HostFacts, HostId, LogRecord, MetricsSnapshot, ProcessRecord, UserId};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (creating if missing) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn timestamp_to_micros(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_micros()
    }

    fn micros_to_timestamp(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }

    /// Current time at the precision it is stored with
    fn now_millis() -> DateTime<Utc> {
        Self::millis_to_timestamp(Self::timestamp_to_millis(&Utc::now()))
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_column<T: FromStr<Err = String>>(raw: &str) -> StorageResult<T> {
    raw.parse().map_err(StorageError::SerializationError)
}

fn host_from_row(row: &SqliteRow) -> StorageResult<Host> {
    let port: i64 = row.try_get("port")?;
    let status: String = row.try_get("status")?;
    let facts: String = row.try_get("facts")?;
    let last_seen: Option<i64> = row.try_get("last_seen")?;

    Ok(Host {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        hostname: row.try_get("hostname")?,
        ip_address: row.try_get("ip_address")?,
        port: u16::try_from(port)
            .map_err(|_| StorageError::SerializationError(format!("invalid port {port}")))?,
        status: parse_column(&status)?,
        owner_id: row.try_get("owner_id")?,
        facts: serde_json::from_str(&facts)?,
        last_seen: last_seen.map(SqliteBackend::millis_to_timestamp),
        created_at: SqliteBackend::millis_to_timestamp(row.try_get("created_at")?),
    })
}

fn snapshot_from_row(row: &SqliteRow) -> StorageResult<MetricsSnapshot> {
    Ok(MetricsSnapshot {
        host_id: row.try_get("host_id")?,
        cpu_usage_percent: row.try_get("cpu_usage_percent")?,
        ram_used_bytes: from_sql_int(row.try_get("ram_used_bytes")?),
        ram_used_percent: row.try_get("ram_used_percent")?,
        disk_used_bytes: from_sql_int(row.try_get("disk_used_bytes")?),
        disk_used_percent: row.try_get("disk_used_percent")?,
        network_in_bytes: from_sql_int(row.try_get("network_in_bytes")?),
        network_out_bytes: from_sql_int(row.try_get("network_out_bytes")?),
        active_connections: from_sql_int(row.try_get("active_connections")?),
        timestamp: SqliteBackend::millis_to_timestamp(row.try_get("timestamp")?),
    })
}

fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
    let metric_type: String = row.try_get("metric_type")?;
    let severity: String = row.try_get("severity")?;
    let acknowledged_at: Option<i64> = row.try_get("acknowledged_at")?;

    Ok(Alert {
        id: row.try_get("id")?,
        host_id: row.try_get("host_id")?,
        metric_type: parse_column(&metric_type)?,
        current_value: row.try_get("current_value")?,
        threshold: row.try_get("threshold")?,
        severity: parse_column(&severity)?,
        message: row.try_get("message")?,
        acknowledged: row.try_get("acknowledged")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        acknowledged_at: acknowledged_at.map(SqliteBackend::millis_to_timestamp),
        created_at: SqliteBackend::millis_to_timestamp(row.try_get("created_at")?),
    })
}

fn log_from_row(row: &SqliteRow) -> StorageResult<LogRecord> {
    let level: String = row.try_get("level")?;
    let raw_details: String = row.try_get("raw_details")?;

    Ok(LogRecord {
        level: parse_column(&level)?,
        source: row.try_get("source")?,
        message: row.try_get("message")?,
        timestamp: SqliteBackend::micros_to_timestamp(row.try_get("timestamp")?),
        raw_details: serde_json::from_str(&raw_details)?,
    })
}

fn audit_from_row(row: &SqliteRow) -> StorageResult<WebhookAuditRecord> {
    let status: String = row.try_get("status")?;
    let request: String = row.try_get("request")?;
    let response: String = row.try_get("response")?;

    Ok(WebhookAuditRecord {
        id: row.try_get("id")?,
        actor: AuditActor::from_user_id(row.try_get("user_id")?),
        action: row.try_get("action")?,
        request: serde_json::from_str(&request)?,
        response: serde_json::from_str(&response)?,
        status: parse_column(&status)?,
        error: row.try_get("error")?,
        created_at: SqliteBackend::millis_to_timestamp(row.try_get("created_at")?),
    })
}

async fn require_host(conn: &mut SqliteConnection, host_id: HostId) -> StorageResult<()> {
    let exists = sqlx::query("SELECT 1 FROM hosts WHERE id = ?")
        .bind(host_id)
        .fetch_optional(&mut *conn)
        .await?;

    match exists {
        Some(_) => Ok(()),
        None => Err(StorageError::host_not_found(host_id)),
    }
}

async fn insert_snapshot_row(
    conn: &mut SqliteConnection,
    snapshot: &MetricsSnapshot,
) -> StorageResult<()> {
    require_host(conn, snapshot.host_id).await?;

    sqlx::query(
        r#"
        INSERT INTO metric_snapshots (
            host_id, timestamp, cpu_usage_percent, ram_used_bytes, ram_used_percent,
            disk_used_bytes, disk_used_percent, network_in_bytes, network_out_bytes,
            active_connections
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(snapshot.host_id)
    .bind(SqliteBackend::timestamp_to_millis(&snapshot.timestamp))
    .bind(snapshot.cpu_usage_percent)
    .bind(to_sql_int(snapshot.ram_used_bytes))
    .bind(snapshot.ram_used_percent)
    .bind(to_sql_int(snapshot.disk_used_bytes))
    .bind(snapshot.disk_used_percent)
    .bind(to_sql_int(snapshot.network_in_bytes))
    .bind(to_sql_int(snapshot.network_out_bytes))
    .bind(to_sql_int(snapshot.active_connections))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_alert_rows(
    conn: &mut SqliteConnection,
    alerts: Vec<NewAlert>,
) -> StorageResult<Vec<Alert>> {
    let now = SqliteBackend::now_millis();
    let mut stored = Vec::with_capacity(alerts.len());

    for alert in alerts {
        require_host(conn, alert.host_id).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                host_id, metric_type, current_value, threshold, severity, message, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.host_id)
        .bind(alert.metric_type.to_string())
        .bind(alert.current_value)
        .bind(alert.threshold)
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(SqliteBackend::timestamp_to_millis(&now))
        .execute(&mut *conn)
        .await?;

        stored.push(Alert::from_new(result.last_insert_rowid(), alert, now));
    }

    Ok(stored)
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, host), fields(name = %host.name))]
    async fn create_host(&self, host: NewHost) -> StorageResult<Host> {
        let created_at = Self::now_millis();
        let facts = HostFacts::default();

        let result = sqlx::query(
            r#"
            INSERT INTO hosts (name, hostname, ip_address, port, status, owner_id, facts, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&host.name)
        .bind(&host.hostname)
        .bind(&host.ip_address)
        .bind(i64::from(host.port))
        .bind(host.status.as_str())
        .bind(host.owner_id)
        .bind(serde_json::to_string(&facts)?)
        .bind(Self::timestamp_to_millis(&created_at))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("created host {id}");

        Ok(Host {
            id,
            name: host.name,
            hostname: host.hostname,
            ip_address: host.ip_address,
            port: host.port,
            status: host.status,
            owner_id: host.owner_id,
            facts,
            last_seen: None,
            created_at,
        })
    }

    async fn get_host(&self, host_id: HostId) -> StorageResult<Option<Host>> {
        let row = sqlx::query("SELECT * FROM hosts WHERE id = ?")
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(host_from_row).transpose()
    }

    async fn list_hosts(&self) -> StorageResult<Vec<Host>> {
        let rows = sqlx::query("SELECT * FROM hosts ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(host_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn update_host_status(
        &self,
        host_id: HostId,
        status: HostStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE hosts SET status = ?, last_seen = COALESCE(?, last_seen) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(last_seen.as_ref().map(Self::timestamp_to_millis))
        .bind(host_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::host_not_found(host_id));
        }
        Ok(())
    }

    async fn touch_host(&self, host_id: HostId, last_seen: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query("UPDATE hosts SET last_seen = ? WHERE id = ?")
            .bind(Self::timestamp_to_millis(&last_seen))
            .bind(host_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::host_not_found(host_id));
        }
        Ok(())
    }

    async fn update_host_facts(&self, host_id: HostId, facts: &HostFacts) -> StorageResult<()> {
        let result = sqlx::query("UPDATE hosts SET facts = ? WHERE id = ?")
            .bind(serde_json::to_string(facts)?)
            .bind(host_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::host_not_found(host_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_host(&self, host_id: HostId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(host_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_snapshot(&self, snapshot: &MetricsSnapshot) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_snapshot_row(&mut conn, snapshot).await
    }

    #[instrument(skip_all, fields(host_id = snapshot.host_id, alerts = alerts.len()))]
    async fn record_metrics(
        &self,
        snapshot: &MetricsSnapshot,
        alerts: Vec<NewAlert>,
    ) -> StorageResult<Vec<Alert>> {
        let mut tx = self.pool.begin().await?;

        insert_snapshot_row(&mut tx, snapshot).await?;
        let stored = insert_alert_rows(&mut tx, alerts).await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn latest_snapshots(
        &self,
        host_id: HostId,
        limit: usize,
    ) -> StorageResult<Vec<MetricsSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM metric_snapshots
            WHERE host_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(host_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn replace_processes(
        &self,
        host_id: HostId,
        processes: &[ProcessRecord],
    ) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        require_host(&mut conn, host_id).await?;

        sqlx::query(
            r#"
            INSERT INTO process_lists (host_id, processes, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (host_id) DO UPDATE SET
                processes = excluded.processes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(host_id)
        .bind(serde_json::to_string(processes)?)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn processes(&self, host_id: HostId) -> StorageResult<Vec<ProcessRecord>> {
        let row = sqlx::query("SELECT processes FROM process_lists WHERE host_id = ?")
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let processes: String = row.try_get("processes")?;
                Ok(serde_json::from_str(&processes)?)
            }
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self, logs), fields(count = logs.len()))]
    async fn insert_logs(&self, host_id: HostId, logs: &[LogRecord]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        require_host(&mut tx, host_id).await?;

        for log in logs {
            sqlx::query(
                r#"
                INSERT INTO log_entries (host_id, level, source, message, timestamp, raw_details)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(host_id)
            .bind(log.level.as_str())
            .bind(&log.source)
            .bind(&log.message)
            .bind(Self::timestamp_to_micros(&log.timestamp))
            .bind(serde_json::to_string(&log.raw_details)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn recent_logs(&self, host_id: HostId, limit: usize) -> StorageResult<Vec<LogRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM log_entries
            WHERE host_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(host_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    async fn insert_alerts(&self, alerts: Vec<NewAlert>) -> StorageResult<Vec<Alert>> {
        let mut tx = self.pool.begin().await?;
        let stored = insert_alert_rows(&mut tx, alerts).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn alerts_for_host(&self, host_id: HostId) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE host_id = ? ORDER BY id DESC")
            .bind(host_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn acknowledge_alert(&self, alert_id: AlertId, actor: UserId) -> StorageResult<Alert> {
        sqlx::query(
            r#"
            UPDATE alerts
            SET acknowledged = 1, acknowledged_by = ?, acknowledged_at = ?
            WHERE id = ? AND acknowledged = 0
            "#,
        )
        .bind(actor)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(alert_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("alert {alert_id} not found")))?;

        alert_from_row(&row)
    }

    async fn upsert_alert_config(&self, config: AlertConfig) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        require_host(&mut conn, config.host_id).await?;

        sqlx::query(
            r#"
            INSERT INTO alert_configs (host_id, metric_type, threshold, operator, enabled)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (host_id, metric_type) DO UPDATE SET
                threshold = excluded.threshold,
                operator = excluded.operator,
                enabled = excluded.enabled
            "#,
        )
        .bind(config.host_id)
        .bind(config.metric_type.to_string())
        .bind(config.threshold)
        .bind(config.operator.as_str())
        .bind(config.enabled)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn alert_configs(&self, host_id: HostId) -> StorageResult<Vec<AlertConfig>> {
        let rows = sqlx::query("SELECT * FROM alert_configs WHERE host_id = ? ORDER BY metric_type")
            .bind(host_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> StorageResult<AlertConfig> {
                let metric_type: String = row.try_get("metric_type")?;
                let operator: String = row.try_get("operator")?;
                Ok(AlertConfig {
                    host_id: row.try_get("host_id")?,
                    metric_type: parse_column(&metric_type)?,
                    threshold: row.try_get("threshold")?,
                    operator: parse_column(&operator)?,
                    enabled: row.try_get("enabled")?,
                })
            })
            .collect()
    }

    async fn insert_api_key(&self, key: ApiKey) -> StorageResult<()> {
        sqlx::query("INSERT INTO api_keys (key, owner_id, active, created_at) VALUES (?, ?, ?, ?)")
            .bind(&key.key)
            .bind(key.owner_id)
            .bind(key.active)
            .bind(Self::timestamp_to_millis(&key.created_at))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_api_key(&self, key: &str) -> StorageResult<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> StorageResult<ApiKey> {
            Ok(ApiKey {
                key: row.try_get("key")?,
                owner_id: row.try_get("owner_id")?,
                active: row.try_get("active")?,
                created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            })
        })
        .transpose()
    }

    async fn revoke_api_key(&self, key: &str) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE api_keys SET active = 0 WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_webhook_audit(
        &self,
        record: NewAuditRecord,
    ) -> StorageResult<WebhookAuditRecord> {
        let created_at = Self::now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO webhook_logs (user_id, action, request, response, status, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.actor.user_id())
        .bind(&record.action)
        .bind(serde_json::to_string(&record.request)?)
        .bind(serde_json::to_string(&record.response)?)
        .bind(record.status.as_str())
        .bind(record.error.as_deref())
        .bind(Self::timestamp_to_millis(&created_at))
        .execute(&self.pool)
        .await?;

        Ok(WebhookAuditRecord::from_new(
            result.last_insert_rowid(),
            record,
            created_at,
        ))
    }

    async fn list_webhook_audits(&self, limit: usize) -> StorageResult<Vec<WebhookAuditRecord>> {
        let rows = sqlx::query("SELECT * FROM webhook_logs ORDER BY id DESC LIMIT ?")
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(audit_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM metric_snapshots WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old snapshot(s)", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite connection pool");
        self.pool.close().await;
        Ok(())
    }
}
