//! Registry of live sessions, keyed by host

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::HostId;

use super::error::{SessionError, SessionResult};
use super::session::RemoteSession;
use super::transport::{SshTransport, Transport};

/// Shared handle to a pooled session
///
/// Holding the lock serializes commands on that host; different hosts are
/// independent.
pub type SessionHandle<T = SshTransport> = Arc<Mutex<RemoteSession<T>>>;

pub struct SessionPool<T: Transport = SshTransport> {
    sessions: RwLock<HashMap<HostId, SessionHandle<T>>>,
}

impl<T: Transport> Default for SessionPool<T> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Transport> SessionPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, host_id: HostId) -> Option<SessionHandle<T>> {
        self.sessions.read().await.get(&host_id).cloned()
    }

    /// Register a session for its host, closing any session it replaces
    pub async fn put(&self, session: RemoteSession<T>) -> SessionHandle<T> {
        let host_id = session.host_id();
        let handle = Arc::new(Mutex::new(session));

        let replaced = self
            .sessions
            .write()
            .await
            .insert(host_id, handle.clone());

        if let Some(old) = replaced {
            debug!("replacing session for host {host_id}");
            if let Err(e) = old.lock().await.retire().await {
                warn!("failed to close replaced session for host {host_id}: {e}");
            }
        }

        handle
    }

    /// The pooled session for `host_id`, creating it with `make` if absent
    ///
    /// Concurrent callers for the same host all receive the same handle.
    pub async fn get_or_insert_with<F>(&self, host_id: HostId, make: F) -> SessionHandle<T>
    where
        F: FnOnce() -> RemoteSession<T>,
    {
        if let Some(handle) = self.get(host_id).await {
            return handle;
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(host_id)
            .or_insert_with(|| Arc::new(Mutex::new(make())))
            .clone()
    }

    /// Drop the session for `host_id` from the pool and retire it
    ///
    /// Returns whether a session was present. Removing an unknown host is not
    /// an error. The entry is gone even when disconnecting fails, and holders
    /// of the old handle can no longer reconnect through it.
    pub async fn remove(&self, host_id: HostId) -> SessionResult<bool> {
        let Some(handle) = self.sessions.write().await.remove(&host_id) else {
            return Ok(false);
        };

        debug!("removing session for host {host_id}");
        handle.lock().await.retire().await?;
        Ok(true)
    }

    /// Like [`remove`](Self::remove), but only when `handle` is still the
    /// pooled session for `host_id`
    ///
    /// `handle` is retired either way.
    pub async fn remove_handle(
        &self,
        host_id: HostId,
        handle: &SessionHandle<T>,
    ) -> SessionResult<bool> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(&host_id) {
                Some(pooled) if Arc::ptr_eq(pooled, handle) => sessions.remove(&host_id).is_some(),
                _ => false,
            }
        };

        handle.lock().await.retire().await?;
        Ok(removed)
    }

    /// Empty the pool, disconnecting every session concurrently
    ///
    /// Failures are collected rather than aborting the drain.
    pub async fn drain_all(&self) -> Vec<(HostId, SessionError)> {
        let drained = std::mem::take(&mut *self.sessions.write().await);
        info!("closing {} pooled session(s)", drained.len());

        let closing = drained.into_iter().map(|(host_id, handle)| async move {
            let result = handle.lock().await.retire().await;
            (host_id, result)
        });

        join_all(closing)
            .await
            .into_iter()
            .filter_map(|(host_id, result)| result.err().map(|e| (host_id, e)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn host_ids(&self) -> Vec<HostId> {
        let mut ids: Vec<HostId> = self.sessions.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
