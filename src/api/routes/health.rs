//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::api::state::ApiState;

/// GET /api/v1/health
///
/// 200 while the store answers, 503 otherwise
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    let pooled_sessions = state.telemetry.pool().len().await;

    let (status, storage) = match state.store.health_check().await {
        Ok(health) if health.healthy => (StatusCode::OK, json!(health)),
        Ok(health) => (StatusCode::SERVICE_UNAVAILABLE, json!(health)),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "healthy": false, "message": e.to_string() }),
        ),
    };

    let body = json!({
        "status": if status == StatusCode::OK { "ok" } else { "degraded" },
        "storage": storage,
        "pooledSessions": pooled_sessions,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status, Json(body))
}
