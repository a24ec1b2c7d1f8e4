//! End-to-end tests for webhook dispatch
//!
//! These tests verify that:
//! - Host lifecycle actions honor ownership
//! - Metrics updates raise the fixed critical alerts
//! - Every dispatch leaves exactly one audit record
//! - Signed payloads are checked when a secret is configured

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use remote_monitoring::{
    MetricType, MetricsSnapshot,
    storage::{AuditActor, AuditStatus, HostStatus, Severity, StorageBackend},
    webhook::{ActionDispatcher, ActionResult, DispatchError, WebhookPayload, issue_api_key},
};
use serde_json::json;

use crate::helpers::*;

fn host_data() -> serde_json::Value {
    json!({ "name": "A", "hostname": "h", "ipAddress": "10.0.0.1" })
}

async fn create(dispatcher: &ActionDispatcher, key: &str) -> i64 {
    let payload = WebhookPayload::new("create_host", key).with_data(host_data());
    match dispatcher.dispatch(payload).await.unwrap().result {
        ActionResult::Host { host } => host.id,
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_create_host_scenario() {
    let (store, dispatcher, key) = dispatcher_with_key(1).await;

    let payload = WebhookPayload::new("create_host", &key).with_data(host_data());
    let response = dispatcher.dispatch(payload).await.unwrap();

    assert!(response.success);
    assert_eq!(response.message, "Host created successfully");
    let ActionResult::Host { host } = response.result else {
        panic!("expected host");
    };
    assert_eq!(host.status, HostStatus::Online);
    assert_eq!(host.owner_id, 1);
    assert_eq!(host.name, "A");
    assert_eq!(host.port, 22);

    let snapshots = store.latest_snapshots(host.id, 10).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(
        snapshots[0],
        MetricsSnapshot {
            timestamp: snapshots[0].timestamp,
            ..MetricsSnapshot::zeroed(host.id)
        }
    );
}

#[tokio::test]
async fn test_cpu_spike_raises_one_critical_alert() {
    let (store, dispatcher, key) = dispatcher_with_key(1).await;
    let host_id = create(&dispatcher, &key).await;

    let payload = WebhookPayload::new("update_metrics", &key)
        .with_host(host_id)
        .with_data(json!({ "cpuUsagePercent": 95 }));
    dispatcher.dispatch(payload).await.unwrap();

    let alerts = store.alerts_for_host(host_id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric_type, MetricType::Cpu);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].message, "High CPU usage");
    assert!(!alerts[0].acknowledged);
}

#[tokio::test]
async fn test_ram_and_disk_raise_two_alerts() {
    let (_store, dispatcher, key) = dispatcher_with_key(1).await;
    let host_id = create(&dispatcher, &key).await;

    let payload = WebhookPayload::new("update_metrics", &key)
        .with_host(host_id)
        .with_data(json!({
            "cpuUsagePercent": 50,
            "ramUsagePercent": 95,
            "diskUsagePercent": 95
        }));

    let ActionResult::Metrics { snapshot, alerts } =
        dispatcher.dispatch(payload).await.unwrap().result
    else {
        panic!("expected metrics result");
    };

    assert_eq!(snapshot.cpu_usage_percent, 50.0);
    let mut types: Vec<String> = alerts.iter().map(|a| a.metric_type.to_string()).collect();
    types.sort();
    assert_eq!(types, vec!["disk", "ram"]);
    assert!(alerts.iter().all(|a| a.severity == Severity::Critical));
}

#[tokio::test]
async fn test_update_metrics_refreshes_last_seen_and_keeps_status() {
    let (store, dispatcher, key) = dispatcher_with_key(1).await;
    let host_id = create(&dispatcher, &key).await;

    let stop = WebhookPayload::new("stop_host", &key).with_host(host_id);
    dispatcher.dispatch(stop).await.unwrap();
    let before = store.get_host(host_id).await.unwrap().unwrap();

    let update = WebhookPayload::new("update_metrics", &key)
        .with_host(host_id)
        .with_data(json!({ "cpuUsagePercent": 10 }));
    dispatcher.dispatch(update).await.unwrap();

    let after = store.get_host(host_id).await.unwrap().unwrap();
    assert_eq!(after.status, HostStatus::Offline);
    assert!(after.last_seen >= before.last_seen);
}

#[tokio::test]
async fn test_non_owner_delete_is_refused() {
    let (store, dispatcher, key) = dispatcher_with_key(1).await;
    let host_id = create(&dispatcher, &key).await;
    let other = issue_api_key(store.as_ref(), 2).await.unwrap().key;

    let payload = WebhookPayload::new("delete_host", &other).with_host(host_id);
    let err = dispatcher.dispatch(payload).await.unwrap_err();

    assert_matches!(err, DispatchError::Permission);
    assert_eq!(err.to_string(), "permission denied");
    assert!(store.get_host(host_id).await.unwrap().is_some());

    let audits = store.list_webhook_audits(1).await.unwrap();
    assert_eq!(audits[0].actor, AuditActor::User(2));
    assert_eq!(audits[0].error.as_deref(), Some("permission denied"));
}

#[tokio::test]
async fn test_delete_cascades_to_telemetry() {
    let (store, dispatcher, key) = dispatcher_with_key(1).await;
    let host_id = create(&dispatcher, &key).await;

    let update = WebhookPayload::new("update_metrics", &key)
        .with_host(host_id)
        .with_data(json!({ "cpuUsagePercent": 99 }));
    dispatcher.dispatch(update).await.unwrap();

    let delete = WebhookPayload::new("delete_host", &key).with_host(host_id);
    dispatcher.dispatch(delete).await.unwrap();

    assert!(store.get_host(host_id).await.unwrap().is_none());
    assert!(store.latest_snapshots(host_id, 10).await.unwrap().is_empty());
    assert!(store.alerts_for_host(host_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_action_leaves_one_audit_record() {
    let (store, dispatcher, key) = dispatcher_with_key(1).await;

    let err = dispatcher
        .dispatch(WebhookPayload::new("reboot_everything", &key))
        .await
        .unwrap_err();

    assert_matches!(err, DispatchError::Validation { .. });
    assert_eq!(err.to_string(), "unknown action");

    let audits = store.list_webhook_audits(10).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].action, "reboot_everything");
    assert_eq!(audits[0].status, AuditStatus::Failed);
    assert_eq!(audits[0].response["error"], "validation_error");
}

#[tokio::test]
async fn test_failed_authentication_is_attributed_to_system() {
    let (store, dispatcher, key) = dispatcher_with_key(1).await;
    store.revoke_api_key(&key).await.unwrap();

    let err = dispatcher
        .dispatch(WebhookPayload::new("create_host", &key).with_data(host_data()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(err.to_string(), "invalid or inactive API key");

    let audits = store.list_webhook_audits(10).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].actor, AuditActor::System);
    assert_ne!(audits[0].request["apiKey"], json!(key));
    assert!(store.list_hosts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_successful_actions_are_audited_with_response() {
    let (store, dispatcher, key) = dispatcher_with_key(7).await;
    let host_id = create(&dispatcher, &key).await;

    let restart = WebhookPayload::new("restart_host", &key).with_host(host_id);
    dispatcher.dispatch(restart).await.unwrap();

    let audits = store.list_webhook_audits(10).await.unwrap();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].action, "restart_host");
    assert_eq!(audits[0].status, AuditStatus::Success);
    assert_eq!(audits[0].actor, AuditActor::User(7));
    assert_eq!(audits[0].response["success"], true);
    assert_eq!(audits[0].response["message"], "Host restarted successfully");
}

#[tokio::test]
async fn test_missing_host_id_and_unknown_host() {
    let (_store, dispatcher, key) = dispatcher_with_key(1).await;

    let err = dispatcher
        .dispatch(WebhookPayload::new("start_host", &key))
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("hostId"));

    let err = dispatcher
        .dispatch(WebhookPayload::new("start_host", &key).with_host(404))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found_error");
}

#[tokio::test]
async fn test_signed_requests() {
    let (store, _, key) = dispatcher_with_key(1).await;
    let dispatcher =
        ActionDispatcher::new(store.clone()).with_signing_secret(Some("s3cret".into()), false);

    // unsigned requests pass when signatures are optional
    let unsigned = WebhookPayload::new("create_host", &key).with_data(host_data());
    assert!(dispatcher.dispatch(unsigned.clone()).await.is_ok());

    let signed = unsigned.clone().signed("s3cret").unwrap();
    assert!(dispatcher.dispatch(signed.clone()).await.is_ok());

    let mut tampered = signed;
    tampered.data = Some(json!({ "name": "B", "hostname": "h", "ipAddress": "10.0.0.2" }));
    let err = dispatcher.dispatch(tampered).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid signature");

    assert_eq!(store.list_hosts().await.unwrap().len(), 2);
}
