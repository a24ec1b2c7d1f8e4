//! Remote host telemetry over SSH
//!
//! A [`RemoteSession`] owns one connection to one host and turns the output of
//! a fixed set of shell commands into typed records. [`SessionPool`] keeps at
//! most one live session per host and hands out shared handles to them.

pub mod error;
pub mod parse;
pub mod pool;
pub mod session;
pub mod transport;

pub use error::{SessionError, SessionResult};
pub use pool::{SessionHandle, SessionPool};
pub use session::{RemoteSession, SessionState};
pub use transport::{CommandOutput, SshTransport, Transport, TransportError};
