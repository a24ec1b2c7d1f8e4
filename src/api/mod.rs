//! HTTP surface of the monitoring hub
//!
//! ## Endpoints
//!
//! Public:
//!
//! - `GET /api/v1/health` - Health check
//! - `POST /api/v1/webhook` - Signed webhook actions, authenticated by API key
//!
//! Admin (bearer token when one is configured):
//!
//! - `POST /api/v1/hosts/:id/poll` - Poll a host now
//! - `GET /api/v1/hosts/:id/metrics/latest?limit=` - Newest snapshots
//! - `GET /api/v1/hosts/:id/processes` - Last process listing
//! - `GET /api/v1/hosts/:id/logs?limit=` - Newest log entries
//! - `GET /api/v1/hosts/:id/alerts` - Raised alerts
//! - `PUT /api/v1/hosts/:id/alert-configs` - Upsert alert rules
//! - `POST /api/v1/alerts/:id/acknowledge` - Acknowledge an alert
//! - `POST /api/v1/keys` - Issue an API key
//! - `DELETE /api/v1/keys/:key` - Revoke an API key

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Token guarding the admin routes; `None` leaves them open
    pub auth_token: Option<String>,

    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiSettings::default().into()
    }
}

impl From<ApiSettings> for ApiConfig {
    fn from(settings: ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind,
            auth_token: settings.auth_token,
            enable_cors: settings.enable_cors,
        }
    }
}

pub fn build_router(config: &ApiConfig, state: ApiState) -> Router {
    let mut admin = Router::new()
        .route("/api/v1/hosts/:id/poll", post(routes::hosts::poll_host))
        .route(
            "/api/v1/hosts/:id/metrics/latest",
            get(routes::hosts::latest_metrics),
        )
        .route("/api/v1/hosts/:id/processes", get(routes::hosts::processes))
        .route("/api/v1/hosts/:id/logs", get(routes::hosts::logs))
        .route("/api/v1/hosts/:id/alerts", get(routes::hosts::alerts))
        .route(
            "/api/v1/hosts/:id/alert-configs",
            put(routes::hosts::put_alert_configs),
        )
        .route(
            "/api/v1/alerts/:id/acknowledge",
            post(routes::alerts::acknowledge),
        )
        .route("/api/v1/keys", post(routes::keys::issue))
        .route("/api/v1/keys/:key", delete(routes::keys::revoke));

    if let Some(token) = config.auth_token.clone() {
        admin = admin.route_layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/webhook", post(routes::webhook::handle_webhook))
        .merge(admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Bind and serve the API in a background task, returning the bound address
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);
    let app = build_router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
