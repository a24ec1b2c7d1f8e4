//! Persistence for hosts, telemetry, alerts, API keys and the webhook audit trail
//!
//! ## Backends
//!
//! - **SQLite** (default, feature `storage-sqlite`): embedded database with migrations
//! - **In-Memory**: no persistence, for tests or `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use remote_monitoring::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./monitoring.db").await?;
//!     let hosts = backend.list_hosts().await?;
//!     println!("{} host(s)", hosts.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{
    Alert, AlertConfig, AlertId, AlertOperator, ApiKey, AuditActor, AuditStatus, Host, HostStatus,
    NewAlert, NewAuditRecord, NewHost, Severity, WebhookAuditRecord,
};
