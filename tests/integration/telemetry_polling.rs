//! Integration tests for polling managed hosts
//!
//! These tests verify that:
//! - Polled telemetry lands in the store with host facts
//! - Configured alert rules fire on polled data only
//! - Connection failures move the host to offline or error
//! - Alerts raised while polling reach the notifier

use std::sync::Arc;
use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use remote_monitoring::{
    LogLevel, MetricType,
    alerts::AlertNotifier,
    collector::{PollError, TelemetryService},
    storage::{AlertConfig, AlertOperator, HostStatus, MemoryBackend, Severity, StorageBackend},
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_poll_stores_snapshot_facts_processes_and_logs() {
    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "web-1", 1).await;
    let simulated = SimulatedHost::new();
    let service = telemetry_with_host(store.clone(), &simulated, host.id).await;

    let report = service.poll_host(host.id).await.unwrap();
    assert_eq!(report.status, HostStatus::Online);
    assert_eq!(report.snapshot.cpu_usage_percent, 25.0);
    assert_eq!(report.snapshot.ram_used_percent, 25.0);
    assert_eq!(report.snapshot.disk_used_percent, 20.0);
    assert_eq!(report.snapshot.network_in_bytes, 123456);
    assert_eq!(report.snapshot.active_connections, 17);

    let stored = store.get_host(host.id).await.unwrap().unwrap();
    assert_eq!(stored.status, HostStatus::Online);
    assert_eq!(stored.facts.os, "Ubuntu 22.04.3 LTS");
    assert_eq!(stored.facts.kernel, "5.15.0-91-generic");
    assert_eq!(stored.facts.cpu_model, "AMD EPYC 7763 64-Core Processor");
    assert_eq!(stored.facts.cpu_cores, 4);
    assert_eq!(stored.facts.uptime_secs, 3600);

    let processes = store.processes(host.id).await.unwrap();
    assert_eq!(processes.len(), 3);
    assert!(processes.iter().any(|p| p.pid == 812));

    let logs = store.recent_logs(host.id, 10).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].level, LogLevel::Warning);
    assert_eq!(logs[0].source, "kernel");
}

#[tokio::test]
async fn test_fixed_thresholds_do_not_apply_to_polling() {
    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "hot", 1).await;
    let simulated = SimulatedHost::new();
    simulated.set_cpu_usage(99.0);
    let service = telemetry_with_host(store.clone(), &simulated, host.id).await;

    let report = service.poll_host(host.id).await.unwrap();
    assert_eq!(report.snapshot.cpu_usage_percent, 99.0);
    assert!(report.alerts.is_empty());
    assert_eq!(report.status, HostStatus::Online);
}

#[tokio::test]
async fn test_configured_rules_raise_warnings() {
    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "db-1", 1).await;
    for config in [
        AlertConfig {
            host_id: host.id,
            metric_type: MetricType::Ram,
            threshold: 20.0,
            operator: AlertOperator::Greater,
            enabled: true,
        },
        AlertConfig {
            host_id: host.id,
            metric_type: MetricType::Disk,
            threshold: 50.0,
            operator: AlertOperator::Greater,
            enabled: true,
        },
    ] {
        store.upsert_alert_config(config).await.unwrap();
    }

    let simulated = SimulatedHost::new();
    let service = telemetry_with_host(store.clone(), &simulated, host.id).await;

    let report = service.poll_host(host.id).await.unwrap();
    assert_eq!(report.status, HostStatus::Warning);
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].metric_type, MetricType::Ram);
    assert_eq!(report.alerts[0].severity, Severity::Warning);

    assert_eq!(
        store.get_host(host.id).await.unwrap().unwrap().status,
        HostStatus::Warning
    );
}

#[tokio::test]
async fn test_refused_connection_marks_offline() {
    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "gone", 1).await;
    store
        .update_host_status(host.id, HostStatus::Online, None)
        .await
        .unwrap();

    let simulated = SimulatedHost::new();
    simulated.refuse_connections.store(true, Ordering::SeqCst);
    let service = telemetry_with_host(store.clone(), &simulated, host.id).await;

    let err = service.poll_host(host.id).await.unwrap_err();
    assert_matches!(err, PollError::Connection { .. });
    assert_eq!(
        store.get_host(host.id).await.unwrap().unwrap().status,
        HostStatus::Offline
    );
    assert!(service.pool().is_empty().await);
    assert!(store.latest_snapshots(host.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connection_lost_mid_poll_marks_error() {
    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "flaky", 1).await;
    let simulated = SimulatedHost::new();
    let service = telemetry_with_host(store.clone(), &simulated, host.id).await;

    service.poll_host(host.id).await.unwrap();
    simulated.drop_connection.store(true, Ordering::SeqCst);

    assert_matches!(
        service.poll_host(host.id).await,
        Err(PollError::Session(_))
    );
    assert_eq!(
        store.get_host(host.id).await.unwrap().unwrap().status,
        HostStatus::Error
    );
    assert!(service.pool().get(host.id).await.is_none());
    assert_eq!(store.latest_snapshots(host.id, 10).await.unwrap().len(), 1);

    simulated.drop_connection.store(false, Ordering::SeqCst);
    let report = service.poll_host(host.id).await.unwrap();
    assert_eq!(report.status, HostStatus::Online);
    assert_eq!(simulated.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_poll_all_runs_every_registered_host() {
    let store = Arc::new(MemoryBackend::new());
    let up = create_host(store.as_ref(), "up", 1).await;
    let db = create_host(store.as_ref(), "db", 1).await;

    let healthy = SimulatedHost::new();
    let service = TelemetryService::new(store.clone(), healthy.factory());
    service.register(up.id, connection("up")).await;
    service.register(db.id, connection("db")).await;
    // no host record behind this registration
    service.register(999, connection("ghost")).await;

    let results = service.poll_all().await;
    assert_eq!(results.len(), 3);
    for (host_id, result) in results {
        if host_id == 999 {
            assert_matches!(result, Err(PollError::NotFound(999)));
        } else {
            assert!(result.is_ok());
        }
    }
    assert_eq!(service.pool().len().await, 2);
}

#[tokio::test]
async fn test_configured_alerts_are_delivered() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/alerts"))
        .and(body_partial_json(serde_json::json!({ "host": "web-9" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "web-9", 1).await;
    store
        .upsert_alert_config(AlertConfig {
            host_id: host.id,
            metric_type: MetricType::Cpu,
            threshold: 10.0,
            operator: AlertOperator::Greater,
            enabled: true,
        })
        .await
        .unwrap();

    let simulated = SimulatedHost::new();
    let service = TelemetryService::new(store.clone(), simulated.factory()).with_notifier(Some(
        AlertNotifier::new(format!("{}/hooks/alerts", mock_server.uri())),
    ));
    service.register(host.id, connection("web-9")).await;

    let report = service.poll_host(host.id).await.unwrap();
    assert_eq!(report.alerts.len(), 1);
}

#[tokio::test]
async fn test_deleted_host_releases_its_session() {
    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "retired", 1).await;
    let simulated = SimulatedHost::new();
    let service = telemetry_with_host(store.clone(), &simulated, host.id).await;

    service.poll_host(host.id).await.unwrap();
    assert!(service.pool().get(host.id).await.is_some());

    assert!(store.delete_host(host.id).await.unwrap());
    assert_matches!(
        service.poll_host(host.id).await,
        Err(PollError::NotFound(id)) if id == host.id
    );
    assert!(service.pool().get(host.id).await.is_none());
    assert_eq!(simulated.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregistered_session_cannot_be_revived() {
    let store = Arc::new(MemoryBackend::new());
    let host = create_host(store.as_ref(), "web-2", 1).await;
    let simulated = SimulatedHost::new();
    let service = telemetry_with_host(store.clone(), &simulated, host.id).await;

    service.poll_host(host.id).await.unwrap();
    let stale = service.pool().get(host.id).await.unwrap();

    assert!(service.unregister(host.id).await);
    assert!(stale.lock().await.try_connect().await.is_err());
    assert_eq!(simulated.opens.load(Ordering::SeqCst), 1);
    assert!(service.pool().is_empty().await);
}
