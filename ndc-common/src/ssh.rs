//! SSH transport for diagnostic targets.
//!
//! One [`SshConnection`] owns one OpenSSH session to one target,
//! optionally through a chain of jump hosts. Commands are serialized
//! through an internal lock, a background keepalive task probes session
//! liveness, and `disconnect()` releases everything on every path.
//!
//! The [`Connection`] trait is the seam the collection daemon works
//! against; [`crate::mock`] provides the in-process implementation used
//! by tests.

use crate::errors::{ConnectError, ExecutionError};
use crate::types::{CommandResult, ConnectionState, Route, DEFAULT_SSH_PORT};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default connection establishment timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default command execution timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pause between keepalive probes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default deadline for a single keepalive probe.
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay before reconnect attempt `attempt` (0-based): `base * 2^attempt`,
/// capped at `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32 << attempt.min(31);
    base.saturating_mul(factor).min(cap)
}

// ============================================================================
// Options
// ============================================================================

/// SSH transport options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Command execution timeout.
    pub command_timeout: Duration,
    /// Pause between keepalive probes.
    pub keepalive_interval: Duration,
    /// Deadline for a single keepalive probe.
    pub keepalive_timeout: Duration,
    /// Whether to run the keepalive probe task at all.
    pub keepalive_enabled: bool,
    /// Protocol-level keepalive (`ssh -o ServerAliveInterval`).
    ///
    /// Defaults to `None` (OpenSSH default). The probe task above is the
    /// authoritative liveness signal; this only helps long-idle links.
    pub server_alive_interval: Option<Duration>,
    /// Known hosts policy.
    pub known_hosts: KnownHostsPolicy,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            keepalive_enabled: true,
            server_alive_interval: None,
            known_hosts: KnownHostsPolicy::Add,
        }
    }
}

/// Known hosts policy for SSH connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownHostsPolicy {
    /// Strictly verify known hosts (recommended for production).
    Strict,
    /// Add unknown hosts automatically (for development).
    Add,
    /// Accept all hosts without verification (INSECURE - testing only).
    AcceptAll,
}

// ============================================================================
// Connection seam
// ============================================================================

/// A remote session capable of running diagnostic commands.
///
/// Implementations guarantee:
/// - `execute` calls are serialized; concurrent callers queue in FIFO
///   order and never interleave on the wire.
/// - `disconnect` is idempotent and releases every resource (session,
///   keepalive task) on every exit path.
/// - execution-layer failures come back as error-shaped
///   [`CommandResult`]s, never as torn-down connections.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establish the session. No-op when already connected.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Tear down the session and stop keepalive probing. Idempotent.
    async fn disconnect(&mut self) -> Result<()>;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Whether the session is established and usable.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Run a command and capture its outcome.
    async fn execute(&self, command: &str) -> CommandResult;
}

/// Builds unconnected transports for one route.
///
/// Every call returns a fresh instance dialing the same target through
/// the same jump chain. Workers never share the connections a factory
/// hands out; each worker owns its transport for its whole lifetime.
pub trait ConnectionFactory: Send + Sync {
    /// Build a new, unconnected transport for this factory's route.
    fn create(&self) -> Box<dyn Connection>;
}

// ============================================================================
// OpenSSH-backed implementation
// ============================================================================

pub(crate) fn store_state(state: &RwLock<ConnectionState>, next: ConnectionState) {
    match state.write() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

pub(crate) fn load_state(state: &RwLock<ConnectionState>) -> ConnectionState {
    match state.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// SSH connection to a single diagnostic target.
pub struct SshConnection {
    /// Target plus jump chain.
    route: Route,
    /// Transport options.
    options: SshOptions,
    /// Active session, shared with the keepalive task while connected.
    session: Option<Arc<Session>>,
    /// Lifecycle state, shared with the keepalive task.
    state: Arc<RwLock<ConnectionState>>,
    /// Serializes command execution on this connection.
    exec_lock: Mutex<()>,
    /// Signals the keepalive task to stop.
    keepalive_stop: Option<mpsc::Sender<()>>,
    /// Join handle for the keepalive task.
    keepalive_task: Option<JoinHandle<()>>,
}

impl SshConnection {
    /// Create an unconnected transport for the given route.
    pub fn new(route: Route, options: SshOptions) -> Self {
        Self {
            route,
            options,
            session: None,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            exec_lock: Mutex::new(()),
            keepalive_stop: None,
            keepalive_task: None,
        }
    }

    /// The route this transport dials.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Stop the keepalive task and wait for it to finish.
    ///
    /// Awaiting the join handle is what makes the probe-count freeze
    /// after disconnect absolute: once this returns, the loop has exited
    /// and can never probe again.
    async fn stop_keepalive(&mut self) {
        if let Some(stop) = self.keepalive_stop.take() {
            let _ = stop.send(()).await;
        }
        if let Some(handle) = self.keepalive_task.take() {
            let _ = handle.await;
        }
    }

    /// Close and drop the session, if any.
    async fn close_session(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            match Arc::try_unwrap(session) {
                Ok(session) => session
                    .close()
                    .await
                    .with_context(|| format!("Failed to close session to {}", self.route.target))?,
                Err(_) => {
                    warn!("Session to {} still referenced at close; dropping handle", self.route.target);
                }
            }
        }
        Ok(())
    }

    fn spawn_keepalive(&mut self, session: Arc<Session>) {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let state = Arc::clone(&self.state);
        let probe_interval = self.options.keepalive_interval;
        let probe_timeout = self.options.keepalive_timeout;
        let destination = self.route.target.destination();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {}
                }
                // A stop can land while the tick branch wins the race;
                // re-check before probing.
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                match tokio::time::timeout(probe_timeout, session.check()).await {
                    Ok(Ok(())) => {
                        debug!("Keepalive ok for {}", destination);
                    }
                    Ok(Err(e)) => {
                        warn!("Keepalive probe failed for {}: {}", destination, e);
                        store_state(&state, ConnectionState::Failed);
                        break;
                    }
                    Err(_) => {
                        warn!(
                            "Keepalive probe timed out for {} after {:?}",
                            destination, probe_timeout
                        );
                        store_state(&state, ConnectionState::Failed);
                        break;
                    }
                }
            }
            debug!("Keepalive loop ended for {}", destination);
        });

        self.keepalive_stop = Some(stop_tx);
        self.keepalive_task = Some(handle);
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.is_connected() {
            debug!("Already connected to {}", self.route.target);
            return Ok(());
        }

        // Drop any stale session left behind by a failed keepalive probe
        // before dialing again.
        if self.session.is_some() {
            self.stop_keepalive().await;
            if let Err(e) = self.close_session().await {
                debug!("Stale session close failed: {e:#}");
            }
        }

        store_state(&self.state, ConnectionState::Connecting);
        let destination = self.route.target.destination();
        debug!("Connecting to {} via {}", destination, self.route.describe());

        let known_hosts = match self.options.known_hosts {
            KnownHostsPolicy::Strict => KnownHosts::Strict,
            KnownHostsPolicy::Add => KnownHosts::Add,
            KnownHostsPolicy::AcceptAll => KnownHosts::Accept,
        };

        let mut builder = SessionBuilder::default();
        builder
            .known_hosts_check(known_hosts)
            .connect_timeout(self.options.connect_timeout);

        if self.route.target.port != DEFAULT_SSH_PORT {
            builder.port(self.route.target.port);
        }

        if let Some(interval) = self.options.server_alive_interval {
            builder.server_alive_interval(interval);
        }

        if !self.route.jumps.is_empty() {
            builder.jump_hosts(self.route.jump_destinations());
        }

        if let Some(identity) = &self.route.target.identity_file {
            let identity_path = shellexpand::tilde(identity);
            if Path::new(identity_path.as_ref()).exists() {
                builder.keyfile(identity_path.as_ref());
            } else {
                warn!(
                    "Identity file {} not found; relying on agent auth",
                    identity_path
                );
            }
        }

        match builder.connect(&destination).await {
            Ok(session) => {
                let session = Arc::new(session);
                self.session = Some(Arc::clone(&session));
                store_state(&self.state, ConnectionState::Connected);
                if self.options.keepalive_enabled {
                    self.spawn_keepalive(session);
                }
                info!(
                    "Connected to {} ({} jump hops)",
                    destination,
                    self.route.jumps.len()
                );
                Ok(())
            }
            Err(e) => {
                store_state(&self.state, ConnectionState::Failed);
                let err = ConnectError::classify(
                    &destination,
                    &e.to_string(),
                    self.options.connect_timeout,
                );
                warn!("Connection to {} failed: {}", destination, err);
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.session.is_none() && self.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        debug!("Disconnecting from {}", self.route.target);
        self.stop_keepalive().await;
        let close_result = self.close_session().await;
        store_state(&self.state, ConnectionState::Disconnected);
        if close_result.is_ok() {
            info!("Disconnected from {}", self.route.target);
        }
        close_result
    }

    fn state(&self) -> ConnectionState {
        load_state(&self.state)
    }

    async fn execute(&self, command: &str) -> CommandResult {
        let submitted_at = Utc::now();
        let start = Instant::now();

        // One command at a time on this session; waiters queue in FIFO
        // order behind this lock.
        let _serialized = self.exec_lock.lock().await;

        if !self.is_connected() {
            let mut failure =
                CommandResult::execution_failure(command, ExecutionError::NotConnected.to_string());
            failure.submitted_at = submitted_at;
            return failure;
        }
        let Some(session) = self.session.as_ref() else {
            let mut failure =
                CommandResult::execution_failure(command, ExecutionError::NotConnected.to_string());
            failure.submitted_at = submitted_at;
            return failure;
        };

        debug!("Executing on {}: {}", self.route.target, command);

        let mut child = match session
            .command("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn command on {}: {}", self.route.target, e);
                let err = ExecutionError::Transport {
                    message: e.to_string(),
                };
                let mut failure = CommandResult::execution_failure(command, err.to_string());
                failure.submitted_at = submitted_at;
                failure.total_latency_ms = start.elapsed().as_millis() as u64;
                return failure;
            }
        };

        let send_latency = start.elapsed();
        let read_start = Instant::now();

        let execution_future = async {
            // Read stdout and stderr concurrently to avoid deadlock if one pipe fills.
            let stdout_handle = child.stdout().take();
            let stderr_handle = child.stderr().take();

            let stdout_fut = async {
                if let Some(out) = stdout_handle {
                    let mut reader = BufReader::new(out);
                    let mut buf = String::new();
                    reader.read_to_string(&mut buf).await.map_err(|e| {
                        ExecutionError::Transport {
                            message: format!("stdout read failed: {e}"),
                        }
                    })?;
                    Ok::<String, ExecutionError>(buf)
                } else {
                    Ok(String::new())
                }
            };

            let stderr_fut = async {
                if let Some(err) = stderr_handle {
                    let mut reader = BufReader::new(err);
                    let mut buf = String::new();
                    reader.read_to_string(&mut buf).await.map_err(|e| {
                        ExecutionError::Transport {
                            message: format!("stderr read failed: {e}"),
                        }
                    })?;
                    Ok::<String, ExecutionError>(buf)
                } else {
                    Ok(String::new())
                }
            };

            let (stdout, stderr) = tokio::try_join!(stdout_fut, stderr_fut)?;

            let status = child.wait().await.map_err(|e| ExecutionError::Transport {
                message: format!("wait failed: {e}"),
            })?;

            Ok::<_, ExecutionError>((status, stdout, stderr))
        };

        match tokio::time::timeout(self.options.command_timeout, execution_future).await {
            Ok(Ok((status, stdout, stderr))) => {
                let exit_code = status.code().unwrap_or(-1);
                let total = start.elapsed();
                debug!(
                    "Command completed on {} (exit={}, total={}ms)",
                    self.route.target,
                    exit_code,
                    total.as_millis()
                );
                CommandResult {
                    command: command.to_string(),
                    stdout,
                    stderr,
                    exit_code,
                    submitted_at,
                    send_latency_ms: send_latency.as_millis() as u64,
                    read_latency_ms: read_start.elapsed().as_millis() as u64,
                    total_latency_ms: total.as_millis() as u64,
                }
            }
            Ok(Err(err)) => {
                warn!("Command failed on {}: {}", self.route.target, err);
                let mut failure = CommandResult::execution_failure(command, err.to_string());
                failure.submitted_at = submitted_at;
                failure.send_latency_ms = send_latency.as_millis() as u64;
                failure.total_latency_ms = start.elapsed().as_millis() as u64;
                failure
            }
            Err(_) => {
                // The child handle went down with the timed-out future;
                // the remote process is left to finish on its own.
                warn!(
                    "Command timed out on {} after {:?}",
                    self.route.target, self.options.command_timeout
                );
                let err = ExecutionError::Timeout {
                    timeout: self.options.command_timeout,
                };
                let mut failure = CommandResult::execution_failure(command, err.to_string());
                failure.submitted_at = submitted_at;
                failure.send_latency_ms = send_latency.as_millis() as u64;
                failure.total_latency_ms = start.elapsed().as_millis() as u64;
                failure
            }
        }
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        // The keepalive task holds its own Arc on the session and a stop
        // receiver; aborting covers the case where the owner never called
        // disconnect.
        if let Some(handle) = self.keepalive_task.take() {
            handle.abort();
        }
    }
}

/// Factory producing [`SshConnection`]s for one target route.
#[derive(Debug, Clone)]
pub struct SshConnectionFactory {
    route: Route,
    options: SshOptions,
}

impl SshConnectionFactory {
    /// Factory bound to the given route and transport options.
    pub fn new(route: Route, options: SshOptions) -> Self {
        Self { route, options }
    }
}

impl ConnectionFactory for SshConnectionFactory {
    fn create(&self) -> Box<dyn Connection> {
        Box::new(SshConnection::new(self.route.clone(), self.options.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
