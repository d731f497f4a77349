//! Core types shared between the collection daemon and its tooling.
//!
//! Everything that crosses a module boundary lives here: worker identity,
//! connection routes, command results with latency breakdowns, link flap
//! events, and the sample envelope written to session logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default SSH port when a host does not specify one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default interval between collection cycles.
pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Worker identity
// ============================================================================

/// Unique identifier for a collection worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Create a new worker ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Hosts and routes
// ============================================================================

/// A single SSH endpoint: either the diagnostic target or a jump hop.
///
/// The `secret` field holds password or passphrase material for transports
/// that authenticate interactively. The bundled OpenSSH transport
/// authenticates with `identity_file` or the running agent and never
/// forwards this value. It is excluded from serialized output and redacted
/// from debug formatting so it cannot leak into logs or session files.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Hostname or IP address.
    pub address: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Path to the private key used for authentication. Supports `~`.
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Password or key passphrase. Never serialized, never logged.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl Host {
    /// Create a host with the default port and no credentials.
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            identity_file: None,
            secret: None,
        }
    }

    /// Set a non-default port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the identity file path.
    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Attach secret material.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// `user@address` form used as an SSH destination.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }

    /// `user@address:port` form used in ProxyJump chains.
    pub fn jump_destination(&self) -> String {
        format!("{}@{}:{}", self.username, self.address, self.port)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("identity_file", &self.identity_file)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_SSH_PORT {
            write!(f, "{}@{}", self.username, self.address)
        } else {
            write!(f, "{}@{}:{}", self.username, self.address, self.port)
        }
    }
}

/// A connection route: the diagnostic target plus the ordered jump hops
/// in front of it. The first jump is the entry point reachable from the
/// machine running the daemon; the last jump connects to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Final destination.
    pub target: Host,
    /// Intermediate hops, outermost first. Empty for direct connections.
    #[serde(default)]
    pub jumps: Vec<Host>,
}

impl Route {
    /// Route with no intermediate hops.
    pub fn direct(target: Host) -> Self {
        Self {
            target,
            jumps: Vec::new(),
        }
    }

    /// Route through the given hops, outermost first.
    pub fn via(target: Host, jumps: Vec<Host>) -> Self {
        Self { target, jumps }
    }

    /// ProxyJump destination strings for the hop chain, outermost first.
    pub fn jump_destinations(&self) -> Vec<String> {
        self.jumps.iter().map(Host::jump_destination).collect()
    }

    /// Human-readable path for logging, e.g. `bastion -> lab-gw -> sw03`.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.jumps.iter().map(|h| h.address.clone()).collect();
        parts.push(self.target.address.clone());
        parts.join(" -> ")
    }
}

// ============================================================================
// Worker specification
// ============================================================================

/// Everything a worker needs to collect from one target.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Worker identity, unique within a session.
    pub id: WorkerId,
    /// How to reach the target.
    pub route: Route,
    /// Diagnostic commands executed in order on every cycle.
    pub commands: Vec<String>,
    /// Pause between collection cycles.
    pub interval: Duration,
}

impl WorkerSpec {
    /// Spec with the default interval and no commands.
    pub fn new(id: WorkerId, route: Route) -> Self {
        Self {
            id,
            route,
            commands: Vec::new(),
            interval: DEFAULT_COLLECTION_INTERVAL,
        }
    }

    /// Replace the command list.
    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }

    /// Replace the collection interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

// ============================================================================
// Connection and worker state
// ============================================================================

/// Lifecycle state of a remote connection.
///
/// ```text
///                    connect()
///   Disconnected ----------------> Connecting
///        ^                             |
///        |                   success   |   failure
///        |                      v      v
///        +------------------ Connected  Failed
///             disconnect()      |          ^
///                               +----------+
///                            probe/transport loss
/// ```
///
/// `disconnect()` is valid from every state and always lands in
/// `Disconnected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session established.
    #[default]
    Disconnected,
    /// Session establishment in progress.
    Connecting,
    /// Session live and usable.
    Connected,
    /// Session lost or unusable; a reconnect is required.
    Failed,
}

impl ConnectionState {
    /// Stable string form used in logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable state of a collection worker.
///
/// ```text
///   Connecting --> Collecting <--> Degraded
///       |              |              |
///       |              v              |
///       +---------> Failed <----------+
///                      |
///                      v   (stop requested, any state)
///                   Stopped
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Establishing or re-establishing the connection.
    #[default]
    Connecting,
    /// Connected and producing samples.
    Collecting,
    /// Connected, but recent cycles produced only failed commands.
    Degraded,
    /// Out of reconnect attempts; worker gave up.
    Failed,
    /// Stopped by request.
    Stopped,
}

impl WorkerStatus {
    /// Stable string form used in logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Connecting => "connecting",
            WorkerStatus::Collecting => "collecting",
            WorkerStatus::Degraded => "degraded",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Command results
// ============================================================================

/// Outcome of one remote command, with the latency of each phase.
///
/// `exit_code == -1` with a populated `stderr` marks an execution-layer
/// failure (not connected, timeout, spawn error) rather than a command
/// that ran and failed remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// The command as submitted.
    pub command: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Remote exit code, or -1 when the execution layer failed.
    pub exit_code: i32,
    /// When the command was submitted to the connection.
    pub submitted_at: DateTime<Utc>,
    /// Submission to remote acceptance.
    pub send_latency_ms: u64,
    /// Acceptance to fully read output.
    pub read_latency_ms: u64,
    /// Submission to completion.
    pub total_latency_ms: u64,
}

impl CommandResult {
    /// Whether the command ran and exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether this result marks an execution-layer failure rather than
    /// a remote non-zero exit.
    pub fn is_execution_failure(&self) -> bool {
        self.exit_code == -1 && !self.stderr.is_empty()
    }

    /// Build a result for a command that never ran: not connected,
    /// timed out, or failed to spawn.
    pub fn execution_failure(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
            submitted_at: Utc::now(),
            send_latency_ms: 0,
            read_latency_ms: 0,
            total_latency_ms: 0,
        }
    }
}

// ============================================================================
// Flap events and samples
// ============================================================================

/// A link state transition reported by an external parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlapEvent {
    /// Interface that flapped, e.g. `eth0`.
    pub interface: String,
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,
    /// How long the link was down, when the parser could tell.
    #[serde(default)]
    pub duration_down_ms: Option<u64>,
}

impl FlapEvent {
    /// Flap observed now on the given interface.
    pub fn now(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            timestamp: Utc::now(),
            duration_down_ms: None,
        }
    }
}

/// One collected measurement, written as a JSON line to the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Worker that produced the measurement.
    pub worker_id: WorkerId,
    /// When the sample was recorded.
    pub timestamp: DateTime<Utc>,
    /// The command outcome.
    pub result: CommandResult,
}

impl Sample {
    /// Wrap a command result, stamped now.
    pub fn new(worker_id: WorkerId, result: CommandResult) -> Self {
        Self {
            worker_id,
            timestamp: Utc::now(),
            result,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
