use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::HostId;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (snapshots older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSettings,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub webhook: WebhookSettings,

    #[serde(default)]
    pub alerts: AlertSettings,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub managed_hosts: Vec<ManagedHost>,
}

#[derive(Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    pub auth_token: Option<String>,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: None,
            enable_cors: true,
        }
    }
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("bind", &self.bind)
            .field("auth_token", &redacted(self.auth_token.as_deref()))
            .field("enable_cors", &self.enable_cors)
            .finish()
    }
}

/// Renders a configured secret without its value
fn redacted(secret: Option<&str>) -> Option<&'static str> {
    secret.map(|_| "<redacted>")
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Default, serde::Deserialize)]
pub struct WebhookSettings {
    /// Shared secret for HMAC request signatures
    pub signing_secret: Option<String>,

    /// Reject unsigned requests when a secret is configured
    #[serde(default)]
    pub require_signature: bool,
}

impl std::fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("signing_secret", &redacted(self.signing_secret.as_deref()))
            .field("require_signature", &self.require_signature)
            .finish()
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AlertSettings {
    /// Endpoint receiving a JSON POST for every raised alert
    pub notify_url: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PollingSettings {
    /// Poll every managed host at this interval; no interval disables the loop
    pub interval_secs: Option<u64>,
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_secs: None,
            log_lines: default_log_lines(),
        }
    }
}

fn default_log_lines() -> usize {
    50
}

/// A host the hub may open remote sessions to
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ManagedHost {
    pub host_id: HostId,
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub credential: CredentialConfig,
}

fn default_ssh_port() -> u16 {
    22
}

/// Credential as written in the config file
#[derive(Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialConfig {
    Password(String),
    PrivateKey(String),
    PrivateKeyPath(PathBuf),
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialConfig::Password(_) => write!(f, "Password(<redacted>)"),
            CredentialConfig::PrivateKey(_) => write!(f, "PrivateKey(<redacted>)"),
            CredentialConfig::PrivateKeyPath(path) => {
                write!(f, "PrivateKeyPath({})", path.display())
            }
        }
    }
}

impl CredentialConfig {
    pub fn resolve(&self) -> anyhow::Result<Credential> {
        match self {
            CredentialConfig::Password(password) => Ok(Credential::Password(password.clone())),
            CredentialConfig::PrivateKey(key) => Ok(Credential::PrivateKey(key.clone())),
            CredentialConfig::PrivateKeyPath(path) => std::fs::read_to_string(path)
                .map(Credential::PrivateKey)
                .with_context(|| format!("failed to read private key {}", path.display())),
        }
    }
}

impl ManagedHost {
    pub fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        Ok(ConnectionConfig {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            credential: self.credential.resolve()?,
        })
    }
}

/// How to reach and authenticate against one remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl ConnectionConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    /// PEM/OpenSSH encoded private key
    PrivateKey(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => write!(f, "Password(<redacted>)"),
            Credential::PrivateKey(_) => write!(f, "PrivateKey(<redacted>)"),
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config: &Config| {
            trace!(
                "loaded config with {} managed host(s)",
                config.managed_hosts.len()
            )
        })
}
