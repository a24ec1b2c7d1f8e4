//! Signed webhook actions against managed hosts
//!
//! Inbound payloads carry an API key, an action name and optional host and
//! data fields. The [`ActionDispatcher`] authenticates them, checks the HMAC
//! signature when a secret is configured and records an audit entry for each.

pub mod api_key;
pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod signature;

pub use api_key::{generate_api_key, issue_api_key, revoke_api_key};
pub use dispatcher::ActionDispatcher;
pub use error::DispatchError;
pub use payload::{Action, ActionResponse, ActionResult, WebhookPayload};
pub use signature::{SignatureError, secrets_match, sign, verify};
