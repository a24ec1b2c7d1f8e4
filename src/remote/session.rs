//! A single monitored host's remote shell session
//!
//! ## State Machine
//!
//! ```text
//! Disconnected --connect() ok--> Connected --disconnect()--> Disconnected
//!      ^                             |
//!      +---- connect() failed -------+ (fatal transport error)
//!
//! any state --retire()--> Retired (terminal)
//! ```
//!
//! Telemetry operations take `&mut self`, so commands on one session are
//! issued and consumed strictly in order. Sharing a session across tasks goes
//! through [`SessionPool`](super::pool::SessionPool), which wraps each one in
//! its own mutex.

use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::remote::parse;
use crate::{HostFacts, HostId, LogRecord, MetricsReport, MetricsSnapshot, ProcessRecord};

use super::error::{SessionError, SessionResult};
use super::transport::{SshTransport, Transport};

/// The fixed diagnostic command battery
mod commands {
    pub const CPU: &str = "top -bn1 | grep 'Cpu(s)'";
    pub const MEMORY: &str = "free -b | awk 'NR==2 {print $2, $3}'";
    pub const DISK: &str = "df -B1 / | awk 'NR==2 {print $2, $3, $5}'";
    pub const NETWORK: &str =
        "awk 'NR>2 && $1 != \"lo:\" {rx += $2; tx += $10} END {print rx+0, tx+0}' /proc/net/dev";
    pub const CONNECTIONS: &str = "ss -tun state established | tail -n +2 | wc -l";
    pub const UPTIME: &str = "cat /proc/uptime";
    pub const OS_RELEASE: &str = "cat /etc/os-release";
    pub const KERNEL: &str = "uname -r";
    pub const CPU_MODEL: &str = "grep -m1 'model name' /proc/cpuinfo";
    pub const CPU_CORES: &str = "nproc";

    pub fn processes(top: usize) -> String {
        format!("ps aux --sort=-%cpu | head -n {}", top + 1)
    }

    pub fn journal(lines: usize) -> String {
        format!("journalctl -n {lines} -o json --no-pager")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// Removed from its pool; connecting again is refused
    Retired,
}

pub struct RemoteSession<T: Transport = SshTransport> {
    host_id: HostId,
    config: ConnectionConfig,
    transport: T,
    state: SessionState,
    command_timeout: Option<Duration>,
}

impl RemoteSession<SshTransport> {
    /// Session over SSH with bounded connect and command waits
    pub fn ssh(
        host_id: HostId,
        config: ConnectionConfig,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        RemoteSession::new(host_id, config, SshTransport::new(connect_timeout))
            .with_command_timeout(command_timeout)
    }
}

impl<T: Transport> RemoteSession<T> {
    pub fn new(host_id: HostId, config: ConnectionConfig, transport: T) -> Self {
        Self {
            host_id,
            config,
            transport,
            state: SessionState::Disconnected,
            command_timeout: None,
        }
    }

    /// Bound every remote command's wait
    pub fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = Some(limit);
        self
    }

    pub fn set_command_timeout(&mut self, limit: Option<Duration>) {
        self.command_timeout = limit;
    }

    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Connect, reporting why it failed
    #[instrument(skip(self), fields(host = %self.config.address()))]
    pub async fn try_connect(&mut self) -> SessionResult<()> {
        match self.state {
            SessionState::Connected => return Ok(()),
            SessionState::Retired => return Err(SessionError::Retired),
            SessionState::Disconnected => {}
        }

        match self.transport.open(&self.config).await {
            Ok(()) => {
                info!("connected");
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!("connection failed: {e}");
                self.state = SessionState::Disconnected;
                Err(SessionError::Connection(e.to_string()))
            }
        }
    }

    /// Connect; a network or authentication failure yields `false`
    pub async fn connect(&mut self) -> bool {
        self.try_connect().await.is_ok()
    }

    /// Return to `Disconnected`. Safe to call repeatedly.
    ///
    /// The state is `Disconnected` afterwards even when closing the transport
    /// reports an error.
    #[instrument(skip(self), fields(host = %self.config.address()))]
    pub async fn disconnect(&mut self) -> SessionResult<()> {
        if !self.is_connected() {
            return Ok(());
        }

        self.state = SessionState::Disconnected;
        debug!("disconnecting");
        self.transport
            .close()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))
    }

    /// Disconnect for good; later connection attempts fail with
    /// [`SessionError::Retired`]
    pub async fn retire(&mut self) -> SessionResult<()> {
        let result = self.disconnect().await;
        self.state = SessionState::Retired;
        result
    }

    pub fn is_retired(&self) -> bool {
        self.state == SessionState::Retired
    }

    fn ensure_connected(&self) -> SessionResult<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    async fn run(&mut self, command: &str) -> SessionResult<String> {
        self.ensure_connected()?;

        let limit = self.command_timeout;
        let exec = self.transport.exec(command);
        let result = match limit {
            Some(limit) => match timeout(limit, exec).await {
                Ok(result) => result,
                Err(_) => return Err(SessionError::Timeout(limit)),
            },
            None => exec.await,
        };

        match result {
            Ok(output) => {
                if !output.is_success() {
                    debug!(
                        "`{command}` exited with {}: {}",
                        output.exit_code,
                        output.stderr_string().trim()
                    );
                }
                trace!("`{command}` -> {} bytes", output.stdout.len());
                Ok(output.stdout_string())
            }
            Err(err) => {
                if err.is_fatal() {
                    warn!("connection lost while running `{command}`: {err}");
                    self.state = SessionState::Disconnected;
                }
                Err(SessionError::command(command, err))
            }
        }
    }

    /// Run a command whose failure only costs its own field
    async fn run_or_empty(&mut self, command: &str) -> String {
        match self.run(command).await {
            Ok(output) => output,
            Err(e) => {
                warn!("{e}; falling back to defaults");
                String::new()
            }
        }
    }

    /// Issue the metric battery and parse it into a snapshot plus host facts
    ///
    /// Each command is parsed independently; a failing or garbled command
    /// zeroes only the fields it feeds.
    #[instrument(skip(self), fields(host = %self.config.address()))]
    pub async fn collect_metrics(&mut self) -> SessionResult<MetricsReport> {
        self.ensure_connected()?;

        let cpu_usage = parse::parse_cpu_usage(&self.run_or_empty(commands::CPU).await);
        let memory = parse::parse_memory(&self.run_or_empty(commands::MEMORY).await);
        let disk = parse::parse_disk(&self.run_or_empty(commands::DISK).await);
        let (network_in, network_out) =
            parse::parse_network(&self.run_or_empty(commands::NETWORK).await);
        let connections = parse::parse_count(&self.run_or_empty(commands::CONNECTIONS).await);
        let uptime = parse::parse_uptime(&self.run_or_empty(commands::UPTIME).await);
        let os = parse::parse_os_release(&self.run_or_empty(commands::OS_RELEASE).await);
        let kernel = self.run_or_empty(commands::KERNEL).await.trim().to_string();
        let cpu_model = parse::parse_cpu_model(&self.run_or_empty(commands::CPU_MODEL).await);
        let cpu_cores = parse::parse_count(&self.run_or_empty(commands::CPU_CORES).await);

        if !self.is_connected() {
            return Err(SessionError::Connection(
                "connection lost while collecting metrics".to_string(),
            ));
        }

        let snapshot = MetricsSnapshot {
            host_id: self.host_id,
            cpu_usage_percent: cpu_usage,
            ram_used_bytes: memory.used_bytes,
            ram_used_percent: memory.used_percent,
            disk_used_bytes: disk.used_bytes,
            disk_used_percent: disk.used_percent,
            network_in_bytes: network_in,
            network_out_bytes: network_out,
            active_connections: connections,
            timestamp: Utc::now(),
        }
        .clamped();

        let facts = HostFacts {
            os,
            kernel,
            cpu_model,
            cpu_cores: u32::try_from(cpu_cores).unwrap_or(u32::MAX),
            ram_total_bytes: memory.total_bytes,
            disk_total_bytes: disk.total_bytes,
            uptime_secs: uptime,
        };

        debug!(
            "cpu {:.1}% ram {:.1}% disk {:.1}%",
            snapshot.cpu_usage_percent, snapshot.ram_used_percent, snapshot.disk_used_percent
        );

        Ok(MetricsReport { snapshot, facts })
    }

    /// Top processes by CPU usage
    #[instrument(skip(self), fields(host = %self.config.address()))]
    pub async fn list_processes(&mut self) -> SessionResult<Vec<ProcessRecord>> {
        let output = self
            .run(&commands::processes(parse::TOP_PROCESSES))
            .await?;
        Ok(parse::parse_process_listing(&output))
    }

    /// The last `lines` structured journal entries
    #[instrument(skip(self), fields(host = %self.config.address()))]
    pub async fn read_logs(&mut self, lines: usize) -> SessionResult<Vec<LogRecord>> {
        self.ensure_connected()?;
        if lines == 0 {
            return Ok(Vec::new());
        }

        let output = self.run(&commands::journal(lines)).await?;
        Ok(parse::parse_journal(&output))
    }
}
