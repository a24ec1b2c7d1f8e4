//! Error types for remote sessions

use std::fmt;
use std::time::Duration;

use super::transport::TransportError;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    /// A telemetry operation was attempted on a session that is not connected
    NotConnected,

    /// The remote host could not be reached or authenticated against
    Connection(String),

    /// A remote command failed to run
    Command { command: String, reason: String },

    /// A remote command did not finish within the configured bound
    Timeout(Duration),

    /// The session was removed from its pool and can no longer be used
    Retired,
}

impl SessionError {
    pub(crate) fn command(command: &str, err: TransportError) -> Self {
        SessionError::Command {
            command: command.to_string(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConnected => write!(f, "session is not connected"),
            SessionError::Connection(msg) => write!(f, "remote connection error: {}", msg),
            SessionError::Command { command, reason } => {
                write!(f, "remote command `{}` failed: {}", command, reason)
            }
            SessionError::Timeout(limit) => {
                write!(f, "remote command timed out after {:?}", limit)
            }
            SessionError::Retired => write!(f, "session was removed from the pool"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Connection(err.to_string())
    }
}
