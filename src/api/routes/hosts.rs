//! Per-host telemetry and alert rule endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::storage::{AlertConfig, AlertOperator, Host};
use crate::{HostId, MetricType};

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

async fn require_host(state: &ApiState, host_id: HostId) -> ApiResult<Host> {
    state
        .store
        .get_host(host_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("host {host_id} not found")))
}

/// POST /api/v1/hosts/:id/poll
///
/// Poll the host now and return what was collected
pub async fn poll_host(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
) -> ApiResult<Json<Value>> {
    let report = state.telemetry.poll_host(host_id).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

/// GET /api/v1/hosts/:id/metrics/latest
pub async fn latest_metrics(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let host = require_host(&state, host_id).await?;
    let limit = query.limit.unwrap_or(10).min(1000);

    let metrics = state.store.latest_snapshots(host_id, limit).await?;

    Ok(Json(json!({
        "hostId": host_id,
        "status": host.status,
        "lastSeen": host.last_seen,
        "count": metrics.len(),
        "metrics": metrics,
    })))
}

/// GET /api/v1/hosts/:id/processes
pub async fn processes(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
) -> ApiResult<Json<Value>> {
    require_host(&state, host_id).await?;
    let processes = state.store.processes(host_id).await?;

    Ok(Json(json!({
        "hostId": host_id,
        "count": processes.len(),
        "processes": processes,
    })))
}

/// GET /api/v1/hosts/:id/logs
pub async fn logs(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    require_host(&state, host_id).await?;
    let limit = query.limit.unwrap_or(100).min(1000);

    let logs = state.store.recent_logs(host_id, limit).await?;

    Ok(Json(json!({
        "hostId": host_id,
        "count": logs.len(),
        "logs": logs,
    })))
}

/// GET /api/v1/hosts/:id/alerts
pub async fn alerts(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
) -> ApiResult<Json<Value>> {
    require_host(&state, host_id).await?;
    let alerts = state.store.alerts_for_host(host_id).await?;

    Ok(Json(json!({
        "hostId": host_id,
        "count": alerts.len(),
        "alerts": alerts,
    })))
}

/// One rule in a `PUT .../alert-configs` body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    metric_type: MetricType,
    threshold: f64,
    operator: AlertOperator,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// PUT /api/v1/hosts/:id/alert-configs
///
/// Upsert each rule; rules for metric types not mentioned are left alone
pub async fn put_alert_configs(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
    Json(rules): Json<Vec<AlertRule>>,
) -> ApiResult<Json<Value>> {
    require_host(&state, host_id).await?;

    if let Some(rule) = rules.iter().find(|rule| !rule.threshold.is_finite()) {
        return Err(ApiError::InvalidRequest(format!(
            "threshold for {} must be a finite number",
            rule.metric_type
        )));
    }

    for rule in rules {
        state
            .store
            .upsert_alert_config(AlertConfig {
                host_id,
                metric_type: rule.metric_type,
                threshold: rule.threshold,
                operator: rule.operator,
                enabled: rule.enabled,
            })
            .await?;
    }

    let configs = state.store.alert_configs(host_id).await?;
    Ok(Json(json!({
        "success": true,
        "hostId": host_id,
        "alertConfigs": configs,
    })))
}
