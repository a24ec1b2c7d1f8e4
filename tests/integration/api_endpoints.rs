//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - The webhook endpoint returns the documented envelope and status codes
//! - Admin endpoints serve polled telemetry and manage keys and rules
//! - Authentication middleware guards only the admin routes

use std::net::SocketAddr;
use std::sync::Arc;

use remote_monitoring::{
    api::{ApiConfig, ApiState, spawn_api_server},
    collector::TelemetryService,
    storage::{MemoryBackend, StorageBackend},
    webhook::ActionDispatcher,
};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use crate::helpers::*;

const TOKEN: &str = "test-token";

struct TestApi {
    addr: SocketAddr,
    store: Arc<MemoryBackend>,
    telemetry: Arc<TelemetryService>,
    client: Client,
}

impl TestApi {
    async fn spawn(simulated: &Arc<SimulatedHost>) -> Self {
        let store = Arc::new(MemoryBackend::new());
        let shared: Arc<dyn StorageBackend> = store.clone();
        let telemetry = Arc::new(TelemetryService::new(shared.clone(), simulated.factory()));
        let state = ApiState::new(
            Arc::new(ActionDispatcher::new(shared.clone())),
            telemetry.clone(),
            shared,
        );

        let config = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            auth_token: Some(TOKEN.to_string()),
            enable_cors: true,
        };
        let addr = spawn_api_server(config, state).await.unwrap();

        Self {
            addr,
            store,
            telemetry,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn webhook(&self, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url("/api/v1/webhook"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn admin_get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn issue_key(&self, owner_id: i64) -> String {
        let response = self
            .client
            .post(self.url("/api/v1/keys"))
            .bearer_auth(TOKEN)
            .json(&json!({ "ownerId": owner_id }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        body["apiKey"]["key"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_webhook_envelopes() {
    let api = TestApi::spawn(&SimulatedHost::new()).await;
    let key = api.issue_key(1).await;

    let (status, body) = api
        .webhook(json!({
            "action": "create_host",
            "apiKey": key,
            "data": { "name": "A", "hostname": "h", "ipAddress": "10.0.0.1" }
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Host created successfully");
    assert_eq!(body["host"]["status"], "online");
    assert_eq!(body["host"]["ownerId"], 1);
    let host_id = body["host"]["id"].as_i64().unwrap();

    let (status, body) = api
        .webhook(json!({
            "action": "update_metrics",
            "apiKey": key,
            "hostId": host_id,
            "data": { "cpuUsagePercent": 95 }
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
    assert_eq!(body["alerts"][0]["metricType"], "cpu");
    assert_eq!(body["snapshot"]["cpuUsagePercent"], 95.0);

    let (status, body) = api
        .webhook(json!({ "action": "melt_host", "apiKey": key }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "unknown action");
    assert_eq!(body["field"], "action");

    let other = api.issue_key(2).await;
    let (status, body) = api
        .webhook(json!({ "action": "delete_host", "apiKey": other, "hostId": host_id }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_error");

    let (status, body) = api
        .webhook(json!({ "action": "delete_host", "apiKey": "sk_missing", "hostId": host_id }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid or inactive API key");

    assert_eq!(api.store.list_webhook_audits(100).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_poll_and_read_telemetry() {
    let simulated = SimulatedHost::new();
    let api = TestApi::spawn(&simulated).await;
    let host = create_host(api.store.as_ref(), "web-1", 1).await;
    api.telemetry.register(host.id, connection("web-1")).await;

    let response = api
        .client
        .post(api.url(&format!("/api/v1/hosts/{}/poll", host.id)))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["report"]["status"], "online");

    let (status, body) = api
        .admin_get(&format!("/api/v1/hosts/{}/metrics/latest?limit=5", host.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["metrics"][0]["cpuUsagePercent"], 25.0);

    let (_, body) = api
        .admin_get(&format!("/api/v1/hosts/{}/processes", host.id))
        .await;
    assert_eq!(body["count"], 3);

    let (_, body) = api
        .admin_get(&format!("/api/v1/hosts/{}/logs?limit=1", host.id))
        .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["logs"][0]["level"], "warning");
}

#[tokio::test]
async fn test_poll_unreachable_host_is_bad_gateway() {
    let simulated = SimulatedHost::new();
    simulated
        .refuse_connections
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let api = TestApi::spawn(&simulated).await;
    let host = create_host(api.store.as_ref(), "dark", 1).await;
    api.telemetry.register(host.id, connection("dark")).await;

    let response = api
        .client
        .post(api.url(&format!("/api/v1/hosts/{}/poll", host.id)))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "connection_error");
}

#[tokio::test]
async fn test_alert_rules_and_acknowledgment() {
    let simulated = SimulatedHost::new();
    let api = TestApi::spawn(&simulated).await;
    let host = create_host(api.store.as_ref(), "db-1", 1).await;
    api.telemetry.register(host.id, connection("db-1")).await;

    let response = api
        .client
        .put(api.url(&format!("/api/v1/hosts/{}/alert-configs", host.id)))
        .bearer_auth(TOKEN)
        .json(&json!([
            { "metricType": "cpu", "threshold": 20.0, "operator": "greater" },
            { "metricType": "disk", "threshold": 5.0, "operator": "less", "enabled": false }
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["alertConfigs"].as_array().unwrap().len(), 2);

    api.telemetry.poll_host(host.id).await.unwrap();

    let (_, body) = api
        .admin_get(&format!("/api/v1/hosts/{}/alerts", host.id))
        .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["alerts"][0]["severity"], "warning");
    let alert_id = body["alerts"][0]["id"].as_i64().unwrap();

    for user_id in [3, 4] {
        let response = api
            .client
            .post(api.url(&format!("/api/v1/alerts/{alert_id}/acknowledge")))
            .bearer_auth(TOKEN)
            .json(&json!({ "userId": user_id }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["alert"]["acknowledgedBy"], 3);
    }

    let response = api
        .client
        .post(api.url("/api/v1/alerts/9999/acknowledge"))
        .bearer_auth(TOKEN)
        .json(&json!({ "userId": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_key_revocation() {
    let api = TestApi::spawn(&SimulatedHost::new()).await;
    let key = api.issue_key(1).await;
    assert!(key.starts_with("sk_"));

    let response = api
        .client
        .delete(api.url(&format!("/api/v1/keys/{key}")))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = api
        .webhook(json!({
            "action": "create_host",
            "apiKey": key,
            "data": { "name": "A", "hostname": "h", "ipAddress": "10.0.0.1" }
        }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = api
        .client
        .delete(api.url("/api/v1/keys/sk_unknown"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_auth() {
    let api = TestApi::spawn(&SimulatedHost::new()).await;

    let response = api
        .client
        .get(api.url("/api/v1/hosts/1/alerts"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = api
        .client
        .get(api.url("/api/v1/hosts/1/alerts"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = api.client.get(api.url("/api/v1/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
