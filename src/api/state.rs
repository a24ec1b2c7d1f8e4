//! Shared state handed to every API handler

use std::sync::Arc;

use crate::collector::TelemetryService;
use crate::storage::StorageBackend;
use crate::webhook::ActionDispatcher;

#[derive(Clone)]
pub struct ApiState {
    /// Executes inbound webhook actions
    pub dispatcher: Arc<ActionDispatcher>,

    /// Runs on-demand polls against the session pool
    pub telemetry: Arc<TelemetryService>,

    pub store: Arc<dyn StorageBackend>,
}

impl ApiState {
    pub fn new(
        dispatcher: Arc<ActionDispatcher>,
        telemetry: Arc<TelemetryService>,
        store: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            dispatcher,
            telemetry,
            store,
        }
    }
}
