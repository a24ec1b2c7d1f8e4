//! Inbound webhook endpoint

use axum::{Json, body::Bytes, extract::State};

use crate::api::{error::ApiResult, state::ApiState};
use crate::webhook::{ActionResponse, WebhookPayload};

/// POST /api/v1/webhook
///
/// Malformed bodies are audited and reported in the same envelope as
/// dispatch errors.
pub async fn handle_webhook(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<ActionResponse>> {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            let err = state
                .dispatcher
                .reject_malformed(&body, format!("invalid request body: {e}"))
                .await;
            return Err(err.into());
        }
    };

    let response = state.dispatcher.dispatch(payload).await?;
    Ok(Json(response))
}
