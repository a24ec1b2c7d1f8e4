//! Alert acknowledgment endpoint

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::UserId;
use crate::api::{error::ApiResult, state::ApiState};
use crate::storage::AlertId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    user_id: UserId,
}

/// POST /api/v1/alerts/:id/acknowledge
///
/// Acknowledging twice returns the first acknowledgment unchanged
pub async fn acknowledge(
    State(state): State<ApiState>,
    Path(alert_id): Path<AlertId>,
    Json(request): Json<AcknowledgeRequest>,
) -> ApiResult<Json<Value>> {
    let alert = state
        .store
        .acknowledge_alert(alert_id, request.user_id)
        .await?;

    Ok(Json(json!({ "success": true, "alert": alert })))
}
