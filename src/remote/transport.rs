//! Command transport underneath a [`RemoteSession`](super::session::RemoteSession)
//!
//! The session only needs three things from the wire: open an authenticated
//! connection, run one command and capture its output, close. `SshTransport`
//! does this over SSH; tests plug in scripted transports.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client::{AuthResult, Handle};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::config::{ConnectionConfig, Credential};

/// Captured result of one remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: u32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug)]
pub enum TransportError {
    /// TCP connect or handshake failed
    Connect(String),

    /// Server rejected the credential
    Auth(String),

    /// Private key could not be decoded
    Key(String),

    /// Opening a channel or running a command failed
    Channel(String),

    /// The underlying connection is gone
    Disconnected(String),

    /// The transport was never opened (or already closed)
    NotOpen,
}

impl TransportError {
    /// Whether the connection is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected(_) | TransportError::NotOpen
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            TransportError::Key(msg) => write!(f, "invalid private key: {}", msg),
            TransportError::Channel(msg) => write!(f, "channel error: {}", msg),
            TransportError::Disconnected(msg) => write!(f, "connection lost: {}", msg),
            TransportError::NotOpen => write!(f, "transport is not open"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        TransportError::Channel(err.to_string())
    }
}

impl From<russh::keys::Error> for TransportError {
    fn from(err: russh::keys::Error) -> Self {
        TransportError::Key(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Connect(err.to_string())
    }
}

/// A connection over which discrete commands are issued
///
/// Implementations execute one command at a time; callers hold `&mut self`
/// for the whole exchange, so results come back in issue order.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self, config: &ConnectionConfig) -> Result<(), TransportError>;

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Close the connection. Closing a transport that is not open is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn open(&mut self, config: &ConnectionConfig) -> Result<(), TransportError> {
        (**self).open(config).await
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        (**self).exec(command).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }
}

/// russh callbacks for monitoring connections
pub struct ClientHandler {
    host: String,
}

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys are accepted as presented; there is no known_hosts store.
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);
        debug!("{}: server key fingerprint {}", self.host, fingerprint);
        async { Ok(true) }
    }
}

/// SSH transport on russh
pub struct SshTransport {
    connect_timeout: Duration,
    handle: Option<Handle<ClientHandler>>,
}

impl SshTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            handle: None,
        }
    }

    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        config: &ConnectionConfig,
    ) -> Result<(), TransportError> {
        // the credential variant decides the method, keys are never tried after a password
        let result = match &config.credential {
            Credential::PrivateKey(encoded) => {
                let key = russh::keys::decode_secret_key(encoded, None)?;
                let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                handle
                    .authenticate_publickey(&config.username, key)
                    .await?
            }
            Credential::Password(password) => {
                handle
                    .authenticate_password(&config.username, password)
                    .await?
            }
        };

        match result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods, ..
            } => Err(TransportError::Auth(format!(
                "server rejected credential for '{}', remaining methods: {:?}",
                config.username, remaining_methods
            ))),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    #[instrument(skip_all, fields(host = %config.address()))]
    async fn open(&mut self, config: &ConnectionConfig) -> Result<(), TransportError> {
        self.close().await.ok();

        let address = config.address();
        let limit = self.connect_timeout;

        let stream = timeout(limit, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::Connect(format!("timed out after {limit:?}")))??;

        let mut russh_config = russh::client::Config::default();
        russh_config.inactivity_timeout = Some(limit.max(Duration::from_secs(60)));

        let handler = ClientHandler {
            host: address.clone(),
        };

        let mut handle = timeout(
            limit,
            russh::client::connect_stream(Arc::new(russh_config), stream, handler),
        )
        .await
        .map_err(|_| TransportError::Connect(format!("handshake timed out after {limit:?}")))?
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        Self::authenticate(&mut handle, config).await?;

        debug!("authenticated as {}", config.username);
        self.handle = Some(handle);
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        let handle = self.handle.as_ref().ok_or(TransportError::NotOpen)?;

        let mut channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) if handle.is_closed() => return Err(TransportError::Disconnected(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        trace!("exec: {command}");
        channel.exec(true, command).await?;

        let mut output = CommandOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                    output.stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_code = exit_status,
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(output)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| TransportError::Disconnected(e.to_string()))
    }
}
