//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Webhook actions and polls persist through the SQLite backend
//! - Data survives reopening the database file
//! - A rejected metrics update writes nothing but its audit record
//! - Journal entries are not stored twice across polls

use std::sync::Arc;

use remote_monitoring::{
    collector::TelemetryService,
    storage::{AuditActor, HostStatus, StorageBackend, sqlite::SqliteBackend},
    webhook::{ActionDispatcher, ActionResult, WebhookPayload, issue_api_key},
};
use serde_json::json;
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_dispatch_and_poll_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("hub.db");

    let host_id = {
        let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let key = issue_api_key(store.as_ref(), 1).await.unwrap().key;
        let dispatcher = ActionDispatcher::new(store.clone());

        let created = dispatcher
            .dispatch(WebhookPayload::new("create_host", &key).with_data(json!({
                "name": "edge-1", "hostname": "edge-1.lan", "ipAddress": "192.168.1.20", "port": 2222
            })))
            .await
            .unwrap();
        let ActionResult::Host { host } = created.result else {
            panic!("expected host");
        };

        dispatcher
            .dispatch(
                WebhookPayload::new("update_metrics", &key)
                    .with_host(host.id)
                    .with_data(json!({ "cpuUsagePercent": 97.5, "networkInBytes": 4096 })),
            )
            .await
            .unwrap();

        let simulated = SimulatedHost::new();
        let service = TelemetryService::new(store.clone(), simulated.factory());
        service.register(host.id, connection("edge-1.lan")).await;
        service.poll_host(host.id).await.unwrap();
        service.pool().drain_all().await;

        store.close().await.unwrap();
        host.id
    };

    let store = SqliteBackend::new(&db_path).await.unwrap();

    let host = store.get_host(host_id).await.unwrap().unwrap();
    assert_eq!(host.port, 2222);
    assert_eq!(host.status, HostStatus::Online);
    assert_eq!(host.facts.cpu_cores, 4);

    // zero snapshot, pushed update, polled reading
    let snapshots = store.latest_snapshots(host_id, 10).await.unwrap();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[1].cpu_usage_percent, 97.5);
    assert_eq!(snapshots[1].network_in_bytes, 4096);

    let alerts = store.alerts_for_host(host_id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message, "High CPU usage");

    assert_eq!(store.processes(host_id).await.unwrap().len(), 3);
    assert_eq!(store.recent_logs(host_id, 10).await.unwrap().len(), 2);

    let audits = store.list_webhook_audits(10).await.unwrap();
    assert_eq!(audits.len(), 2);
    assert!(audits.iter().all(|a| a.actor == AuditActor::User(1)));
}

#[tokio::test]
async fn test_rejected_update_only_writes_audit() {
    let temp_dir = tempdir().unwrap();
    let store: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(temp_dir.path().join("hub.db")).await.unwrap());
    let key = issue_api_key(store.as_ref(), 1).await.unwrap().key;
    let dispatcher = ActionDispatcher::new(store.clone());

    let host = create_host(store.as_ref(), "db-1", 1).await;

    let err = dispatcher
        .dispatch(
            WebhookPayload::new("update_metrics", &key)
                .with_host(host.id)
                .with_data(json!({ "cpuUsagePercent": 99, "diskUsagePercent": -3 })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("diskUsagePercent"));

    assert!(store.latest_snapshots(host.id, 10).await.unwrap().is_empty());
    assert!(store.alerts_for_host(host.id).await.unwrap().is_empty());

    let audits = store.list_webhook_audits(10).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(
        audits[0].error.as_deref(),
        Some("diskUsagePercent must be between 0 and 100")
    );
}

#[tokio::test]
async fn test_acknowledge_persists_first_actor() {
    let temp_dir = tempdir().unwrap();
    let store: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(temp_dir.path().join("hub.db")).await.unwrap());
    let key = issue_api_key(store.as_ref(), 1).await.unwrap().key;
    let dispatcher = ActionDispatcher::new(store.clone());
    let host = create_host(store.as_ref(), "db-2", 1).await;

    dispatcher
        .dispatch(
            WebhookPayload::new("update_metrics", &key)
                .with_host(host.id)
                .with_data(json!({ "ramUsagePercent": 93 })),
        )
        .await
        .unwrap();

    let alert_id = store.alerts_for_host(host.id).await.unwrap()[0].id;
    let first = store.acknowledge_alert(alert_id, 5).await.unwrap();
    let second = store.acknowledge_alert(alert_id, 6).await.unwrap();

    assert!(first.acknowledged);
    assert_eq!(second.acknowledged_by, Some(5));
    assert_eq!(second.acknowledged_at, first.acknowledged_at);
}

#[tokio::test]
async fn test_sub_millisecond_log_is_stored_once() {
    let temp_dir = tempdir().unwrap();
    let store: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(temp_dir.path().join("hub.db")).await.unwrap());
    let host = create_host(store.as_ref(), "cron-1", 1).await;

    let simulated = SimulatedHost::new();
    *simulated.journal.lock().unwrap() = concat!(
        "{\"PRIORITY\":\"6\",\"SYSLOG_IDENTIFIER\":\"cron\",\"MESSAGE\":\"job done\",",
        "\"__REALTIME_TIMESTAMP\":\"1700000000123456\"}\n",
    )
    .to_string();

    let service = TelemetryService::new(store.clone(), simulated.factory());
    service.register(host.id, connection("cron-1")).await;

    let first = service.poll_host(host.id).await.unwrap();
    let second = service.poll_host(host.id).await.unwrap();
    assert_eq!(first.new_logs, 1);
    assert_eq!(second.new_logs, 0);

    let logs = store.recent_logs(host.id, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].timestamp.timestamp_micros(), 1_700_000_000_123_456);
}
