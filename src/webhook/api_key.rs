//! API key issuance and revocation
//!
//! Keys are opaque `sk_`-prefixed random strings. Revocation only flips
//! `active`; a revoked key stays on record and can never be re-activated
//! through this module.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::UserId;
use crate::storage::{ApiKey, StorageBackend, StorageResult};

pub const API_KEY_PREFIX: &str = "sk_";

pub fn generate_api_key() -> String {
    format!("{}{}", API_KEY_PREFIX, Uuid::new_v4().simple())
}

/// Create and store a fresh active key for `owner_id`
pub async fn issue_api_key(store: &dyn StorageBackend, owner_id: UserId) -> StorageResult<ApiKey> {
    let key = ApiKey {
        key: generate_api_key(),
        owner_id,
        active: true,
        created_at: Utc::now(),
    };
    store.insert_api_key(key.clone()).await?;

    info!("issued API key for user {owner_id}");
    Ok(key)
}

/// Deactivate `key`. Returns whether it exists.
pub async fn revoke_api_key(store: &dyn StorageBackend, key: &str) -> StorageResult<bool> {
    let revoked = store.revoke_api_key(key).await?;
    if revoked {
        info!("revoked API key");
    }
    Ok(revoked)
}
