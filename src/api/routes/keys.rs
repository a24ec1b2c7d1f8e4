//! API key issuance and revocation

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::UserId;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::webhook::{issue_api_key, revoke_api_key};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyRequest {
    owner_id: UserId,
}

/// POST /api/v1/keys
pub async fn issue(
    State(state): State<ApiState>,
    Json(request): Json<IssueKeyRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let key = issue_api_key(state.store.as_ref(), request.owner_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "apiKey": key })),
    ))
}

/// DELETE /api/v1/keys/:key
pub async fn revoke(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    if !revoke_api_key(state.store.as_ref(), &key).await? {
        return Err(ApiError::NotFound("API key not found".to_string()));
    }
    Ok(Json(json!({ "success": true, "message": "API key revoked" })))
}
