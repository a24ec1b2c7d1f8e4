//! Authenticated execution of inbound webhook actions
//!
//! Every call to [`ActionDispatcher::dispatch`] goes through the same steps:
//!
//! 1. API key lookup; the key must exist and be active
//! 2. signature check, when a signing secret is configured
//! 3. action routing with ownership checks against the stored host
//! 4. exactly one audit record, written whatever the outcome
//!
//! Until step 2 passes, the audit record is attributed to the system actor.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use super::error::DispatchError;
use super::payload::{
    Action, ActionResponse, ActionResult, CreateHostRequest, MetricsUpdate, WebhookPayload,
    mask_api_key,
};
use crate::alerts::{AlertNotifier, evaluate_fixed_thresholds};
use crate::storage::{
    AuditActor, AuditStatus, Host, HostStatus, NewAuditRecord, NewHost, StorageBackend,
};
use crate::{HostId, MetricsSnapshot, UserId};

/// Recorded action name when a body does not name one
const UNKNOWN_ACTION: &str = "unknown";

/// Characters of an unparseable body kept in its audit record
const MAX_RAW_BODY: usize = 1024;

fn failed_record(
    actor: AuditActor,
    action: String,
    request: Value,
    err: &DispatchError,
) -> NewAuditRecord {
    NewAuditRecord {
        actor,
        action,
        request,
        response: json!({
            "success": false,
            "error": err.kind(),
            "message": err.to_string(),
        }),
        status: AuditStatus::Failed,
        error: Some(err.to_string()),
    }
}

pub struct ActionDispatcher {
    store: Arc<dyn StorageBackend>,
    signing_secret: Option<String>,
    require_signature: bool,
    notifier: Option<AlertNotifier>,
}

impl ActionDispatcher {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self {
            store,
            signing_secret: None,
            require_signature: false,
            notifier: None,
        }
    }

    /// Verify signatures with `secret`; with `required`, unsigned payloads are rejected
    pub fn with_signing_secret(mut self, secret: Option<String>, required: bool) -> Self {
        self.signing_secret = secret;
        self.require_signature = required;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<AlertNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[instrument(skip_all, fields(action = %payload.action))]
    pub async fn dispatch(&self, payload: WebhookPayload) -> Result<ActionResponse, DispatchError> {
        let mut actor = AuditActor::System;
        let outcome = self.run(&payload, &mut actor).await;

        let record = match &outcome {
            Ok(response) => NewAuditRecord {
                actor,
                action: payload.action.clone(),
                request: payload.audit_view(),
                response: serde_json::to_value(response).unwrap_or_default(),
                status: AuditStatus::Success,
                error: None,
            },
            Err(err) => {
                warn!("action rejected: {err}");
                failed_record(actor, payload.action.clone(), payload.audit_view(), err)
            }
        };

        self.append_audit(record).await;
        outcome
    }

    /// Audit a request body that is not a valid payload
    ///
    /// The action name is taken from the body when it is a JSON object that
    /// carries one. Returns the error to report to the caller.
    #[instrument(skip_all)]
    pub async fn reject_malformed(&self, body: &[u8], reason: impl Into<String>) -> DispatchError {
        let err = DispatchError::validation("body", reason);
        warn!("malformed webhook body: {err}");

        let (action, request) = match serde_json::from_slice::<Value>(body) {
            Ok(mut value) => {
                mask_api_key(&mut value);
                let action = value
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_ACTION)
                    .to_string();
                (action, value)
            }
            Err(_) => {
                let raw: String = String::from_utf8_lossy(body)
                    .chars()
                    .take(MAX_RAW_BODY)
                    .collect();
                (UNKNOWN_ACTION.to_string(), json!({ "raw": raw }))
            }
        };

        self.append_audit(failed_record(AuditActor::System, action, request, &err))
            .await;
        err
    }

    async fn append_audit(&self, record: NewAuditRecord) {
        if let Err(e) = self.store.append_webhook_audit(record).await {
            error!("failed to write webhook audit record: {e}");
        }
    }

    async fn run(
        &self,
        payload: &WebhookPayload,
        actor: &mut AuditActor,
    ) -> Result<ActionResponse, DispatchError> {
        let caller = self.authenticate(payload).await?;
        *actor = AuditActor::User(caller);

        let action: Action = payload.action.parse()?;
        debug!("user {caller} dispatching {action}");

        match action {
            Action::CreateHost => self.create_host(payload, caller).await,
            Action::DeleteHost => self.delete_host(payload, caller).await,
            Action::StartHost => {
                self.set_status(payload, caller, HostStatus::Online, "Host started successfully")
                    .await
            }
            Action::StopHost => {
                self.set_status(payload, caller, HostStatus::Offline, "Host stopped successfully")
                    .await
            }
            Action::RestartHost => {
                self.set_status(
                    payload,
                    caller,
                    HostStatus::Online,
                    "Host restarted successfully",
                )
                .await
            }
            Action::UpdateMetrics => self.update_metrics(payload, caller).await,
        }
    }

    /// Resolve the API key to its owner, then check the signature
    async fn authenticate(&self, payload: &WebhookPayload) -> Result<UserId, DispatchError> {
        let key = self
            .store
            .find_api_key(&payload.api_key)
            .await?
            .filter(|key| key.active)
            .ok_or_else(DispatchError::invalid_api_key)?;

        self.check_signature(payload)?;
        Ok(key.owner_id)
    }

    fn check_signature(&self, payload: &WebhookPayload) -> Result<(), DispatchError> {
        let Some(secret) = &self.signing_secret else {
            if self.require_signature {
                return Err(DispatchError::Authentication(
                    "signature required but no signing secret is configured".to_string(),
                ));
            }
            return Ok(());
        };

        match &payload.signature {
            Some(_) if payload.verify_signature(secret) => Ok(()),
            Some(_) => Err(DispatchError::Authentication("invalid signature".to_string())),
            None if self.require_signature => {
                Err(DispatchError::Authentication("missing signature".to_string()))
            }
            None => Ok(()),
        }
    }

    /// The host named by the payload, provided `caller` owns it
    async fn owned_host(
        &self,
        host_id: Option<HostId>,
        caller: UserId,
    ) -> Result<Host, DispatchError> {
        let host_id =
            host_id.ok_or_else(|| DispatchError::validation("hostId", "hostId is required"))?;

        let host = self
            .store
            .get_host(host_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("host {host_id} not found")))?;

        if host.owner_id != caller {
            return Err(DispatchError::Permission);
        }
        Ok(host)
    }

    async fn create_host(
        &self,
        payload: &WebhookPayload,
        caller: UserId,
    ) -> Result<ActionResponse, DispatchError> {
        let request = CreateHostRequest::from_data(payload.data.as_ref())?;

        let host = self
            .store
            .create_host(NewHost {
                name: request.name,
                hostname: request.hostname,
                ip_address: request.ip_address,
                port: request.port,
                owner_id: caller,
                status: HostStatus::Online,
            })
            .await?;

        if let Err(e) = self
            .store
            .insert_snapshot(&MetricsSnapshot::zeroed(host.id))
            .await
        {
            // a host never exists without its initial snapshot
            if let Err(cleanup) = self.store.delete_host(host.id).await {
                error!("failed to roll back host {}: {cleanup}", host.id);
            }
            return Err(e.into());
        }

        info!("user {caller} created host {} ({})", host.id, host.name);
        Ok(ActionResponse::ok(
            ActionResult::Host { host },
            "Host created successfully",
        ))
    }

    async fn delete_host(
        &self,
        payload: &WebhookPayload,
        caller: UserId,
    ) -> Result<ActionResponse, DispatchError> {
        let host = self.owned_host(payload.host_id, caller).await?;

        if !self.store.delete_host(host.id).await? {
            return Err(DispatchError::NotFound(format!("host {} not found", host.id)));
        }

        info!("user {caller} deleted host {}", host.id);
        Ok(ActionResponse::ok(
            ActionResult::Deleted { host_id: host.id },
            "Host deleted successfully",
        ))
    }

    async fn set_status(
        &self,
        payload: &WebhookPayload,
        caller: UserId,
        status: HostStatus,
        message: &str,
    ) -> Result<ActionResponse, DispatchError> {
        let mut host = self.owned_host(payload.host_id, caller).await?;
        let now = Utc::now();

        self.store
            .update_host_status(host.id, status, Some(now))
            .await?;

        host.status = status;
        host.last_seen = Some(now);

        info!("host {} is now {}", host.id, status);
        Ok(ActionResponse::ok(ActionResult::Host { host }, message))
    }

    async fn update_metrics(
        &self,
        payload: &WebhookPayload,
        caller: UserId,
    ) -> Result<ActionResponse, DispatchError> {
        let host = self.owned_host(payload.host_id, caller).await?;
        let update = MetricsUpdate::from_data(payload.data.as_ref())?;

        let now = Utc::now();
        let snapshot = update.into_snapshot(host.id, now);
        let raised = evaluate_fixed_thresholds(&snapshot);

        let alerts = self.store.record_metrics(&snapshot, raised).await?;
        self.store.touch_host(host.id, now).await?;

        if !alerts.is_empty() {
            info!("host {} raised {} alert(s)", host.id, alerts.len());
            if let Some(notifier) = &self.notifier {
                notifier.notify(&host.name, &alerts).await;
            }
        }

        Ok(ActionResponse::ok(
            ActionResult::Metrics { snapshot, alerts },
            "Metrics updated successfully",
        ))
    }
}
