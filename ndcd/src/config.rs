//! Session configuration for the collection daemon.
//!
//! One TOML file describes a whole collection session: where logs go, how
//! the SSH transport behaves, and which targets to sample. Loaded from
//! `--config` or from `~/.config/ndc/session.toml`.
//!
//! # Example Configuration
//!
//! ```toml
//! [session]
//! label = "lab42"
//! log_dir = "~/ndc-logs"
//! max_log_size_bytes = 10485760
//!
//! [ssh]
//! connect_timeout_secs = 10
//! known_hosts = "add"
//!
//! [[targets]]
//! id = "sw03-uplink"
//! address = "10.20.0.3"
//! user = "admin"
//! commands = ["ip -s link show eth0"]
//! interval_secs = 30
//!
//! [[targets.jumps]]
//! address = "bastion.example.net"
//! user = "diag"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ndc_common::ssh::{
    KnownHostsPolicy, SshOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_KEEPALIVE_TIMEOUT,
};
use ndc_common::{Host, Route, WorkerId, WorkerSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::rotation::DEFAULT_MAX_LOG_SIZE_BYTES;

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "ndc";

/// Default session config file name.
const SESSION_FILE_NAME: &str = "session.toml";

// ============================================================================
// Config file structure
// ============================================================================

/// Top-level session configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session-wide settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// SSH transport settings shared by all targets.
    #[serde(default)]
    pub ssh: SshSettings,

    /// Targets to collect from, one worker each.
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

/// Session-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Label prefixed to the session directory name.
    #[serde(default = "default_label")]
    pub label: String,

    /// Root directory for session directories. Supports `~`. Falls back to
    /// the platform data directory when unset.
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Size limit per stream file before a rotate/clear decision.
    #[serde(default = "default_max_log_size")]
    pub max_log_size_bytes: u64,

    /// How long `stop` waits for workers before abandoning them.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Stop collecting after this long; unset means run until interrupted.
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            label: default_label(),
            log_dir: None,
            max_log_size_bytes: default_max_log_size(),
            stop_timeout_secs: default_stop_timeout(),
            duration_secs: None,
        }
    }
}

impl SessionSettings {
    /// Resolve the log root, expanding `~` or falling back to the platform
    /// data directory.
    pub fn log_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.log_dir {
            return Ok(PathBuf::from(shellexpand::tilde(dir).into_owned()));
        }
        let dirs = directories::ProjectDirs::from("com", "ndc", CONFIG_DIR_NAME)
            .context("could not determine platform data directory")?;
        Ok(dirs.data_local_dir().join("sessions"))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}

/// SSH transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// Connection establishment timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Command execution timeout in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Pause between keepalive probes in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Deadline for a single keepalive probe in seconds.
    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    /// Whether the keepalive probe task runs at all.
    #[serde(default = "default_true")]
    pub keepalive_enabled: bool,

    /// Known hosts policy: `strict`, `add`, or `accept-all`.
    #[serde(default = "default_known_hosts")]
    pub known_hosts: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            keepalive_enabled: true,
            known_hosts: default_known_hosts(),
        }
    }
}

impl SshSettings {
    /// Build transport options from the settings.
    ///
    /// An unrecognized `known_hosts` value falls back to `add` with a
    /// warning; `validate` rejects it up front so this only fires for
    /// configs that skipped validation.
    pub fn to_options(&self) -> SshOptions {
        let known_hosts = match parse_known_hosts(&self.known_hosts) {
            Some(policy) => policy,
            None => {
                warn!(
                    "Unknown known_hosts policy {:?}, using \"add\"",
                    self.known_hosts
                );
                KnownHostsPolicy::Add
            }
        };
        SshOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            keepalive_timeout: Duration::from_secs(self.keepalive_timeout_secs),
            keepalive_enabled: self.keepalive_enabled,
            server_alive_interval: None,
            known_hosts,
        }
    }
}

fn parse_known_hosts(value: &str) -> Option<KnownHostsPolicy> {
    match value {
        "strict" => Some(KnownHostsPolicy::Strict),
        "add" => Some(KnownHostsPolicy::Add),
        "accept-all" => Some(KnownHostsPolicy::AcceptAll),
        _ => None,
    }
}

/// One hop in a jump chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopEntry {
    /// Hostname or IP address.
    pub address: String,

    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// SSH username.
    #[serde(default = "default_user")]
    pub user: String,

    /// Path to SSH private key.
    #[serde(default)]
    pub identity_file: Option<String>,
}

impl HopEntry {
    fn to_host(&self) -> Host {
        let mut host = Host::new(&self.address, &self.user).with_port(self.port);
        if let Some(identity) = &self.identity_file {
            host = host.with_identity_file(identity);
        }
        host
    }
}

/// Single target entry in the session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Unique identifier; names the worker and its log stream.
    pub id: String,

    /// Hostname or IP address of the target.
    pub address: String,

    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// SSH username.
    #[serde(default = "default_user")]
    pub user: String,

    /// Path to SSH private key.
    #[serde(default)]
    pub identity_file: Option<String>,

    /// Password or key passphrase for interactive transports. Kept out of
    /// serialized output.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Jump hops between the daemon and the target, outermost first.
    #[serde(default)]
    pub jumps: Vec<HopEntry>,

    /// Diagnostic commands run in order on every cycle.
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,

    /// Seconds between collection cycles.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether this target participates in the session.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TargetEntry {
    fn target_host(&self) -> Host {
        let mut host = Host::new(&self.address, &self.user).with_port(self.port);
        if let Some(identity) = &self.identity_file {
            host = host.with_identity_file(identity);
        }
        if let Some(password) = &self.password {
            host = host.with_secret(password);
        }
        host
    }

    /// The full route to this target, jumps outermost first.
    pub fn route(&self) -> Route {
        Route::via(
            self.target_host(),
            self.jumps.iter().map(HopEntry::to_host).collect(),
        )
    }

    /// Build the worker specification for this target.
    pub fn to_spec(&self) -> WorkerSpec {
        WorkerSpec::new(WorkerId::new(&self.id), self.route())
            .with_commands(self.commands.clone())
            .with_interval(Duration::from_secs(self.interval_secs))
    }
}

// Default value functions
fn default_label() -> String {
    "session".to_string()
}

fn default_max_log_size() -> u64 {
    DEFAULT_MAX_LOG_SIZE_BYTES
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

fn default_keepalive_interval() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL.as_secs()
}

fn default_keepalive_timeout() -> u64 {
    DEFAULT_KEEPALIVE_TIMEOUT.as_secs()
}

fn default_known_hosts() -> String {
    "add".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "admin".to_string()
}

fn default_commands() -> Vec<String> {
    vec!["ip -s link".to_string()]
}

fn default_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Loading and validation
// ============================================================================

impl SessionConfig {
    /// Validate the configuration before a session starts.
    pub fn validate(&self) -> Result<()> {
        if parse_known_hosts(&self.ssh.known_hosts).is_none() {
            bail!(
                "unknown known_hosts policy {:?} (expected strict, add, or accept-all)",
                self.ssh.known_hosts
            );
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if target.id.trim().is_empty() {
                bail!("target with empty id");
            }
            if !seen.insert(target.id.as_str()) {
                bail!("duplicate target id {:?}", target.id);
            }
            if target.address.is_empty() {
                bail!("target {:?} has an empty address", target.id);
            }
            if target.user.is_empty() {
                bail!("target {:?} has an empty user", target.id);
            }
            if target.commands.is_empty() {
                bail!("target {:?} has no commands", target.id);
            }
            if target.interval_secs == 0 {
                bail!("target {:?} has a zero collection interval", target.id);
            }
            for hop in &target.jumps {
                if hop.address.is_empty() {
                    bail!("target {:?} has a jump with an empty address", target.id);
                }
            }
        }
        Ok(())
    }

    /// Worker specifications for every enabled target.
    pub fn specs(&self) -> Vec<WorkerSpec> {
        self.targets
            .iter()
            .filter(|t| t.enabled)
            .map(TargetEntry::to_spec)
            .collect()
    }
}

/// Get the configuration directory path.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "ndc", CONFIG_DIR_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the session config file.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(SESSION_FILE_NAME))
}

/// Default path for the flap event socket.
pub fn default_flap_socket_path() -> PathBuf {
    // Prefer the per-user runtime directory when available.
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.trim().is_empty() {
            return PathBuf::from(runtime_dir).join("ndc-flap.sock");
        }
    }
    std::env::temp_dir().join("ndc-flap.sock")
}

/// Load the session configuration.
///
/// An explicitly given path must exist. When no path is given the default
/// location is tried; a missing default yields an empty configuration so
/// callers can still run `--init-config`.
pub fn load_session_config(path: Option<&Path>) -> Result<SessionConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                bail!("config file not found: {}", p.display());
            }
            p.to_path_buf()
        }
        None => {
            let dir = config_dir().context("could not determine config directory")?;
            let default_path = dir.join(SESSION_FILE_NAME);
            if !default_path.exists() {
                debug!(
                    "Session config not found at {:?}, using defaults",
                    default_path
                );
                return Ok(SessionConfig::default());
            }
            default_path
        }
    };

    info!("Loading session config from {:?}", config_path);
    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read session config from {:?}", config_path))?;

    let config: SessionConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse session config from {:?}", config_path))?;

    config.validate()?;
    info!("Loaded {} target definitions", config.targets.len());
    Ok(config)
}

/// Generate an example session.toml configuration.
pub fn example_session_config() -> String {
    r#"# NDC Session Configuration
# Place this file at ~/.config/ndc/session.toml

[session]
# Prefix for the timestamped session directory
label = "lab42"
# Root directory for session logs (default: platform data dir)
log_dir = "~/ndc-logs"
# Per-stream size limit before rotate/clear (bytes)
max_log_size_bytes = 10485760
# How long shutdown waits for workers (seconds)
stop_timeout_secs = 10

[ssh]
connect_timeout_secs = 10
command_timeout_secs = 300
keepalive_interval_secs = 15
keepalive_timeout_secs = 5
keepalive_enabled = true
# Known hosts policy: strict, add, accept-all
known_hosts = "add"

# One [[targets]] block per device to sample
[[targets]]
id = "sw03-uplink"
address = "10.20.0.3"
user = "admin"
identity_file = "~/.ssh/lab_ed25519"
commands = ["ip -s link show eth0", "ethtool eth0"]
interval_secs = 30

# Hops between this machine and the target, outermost first
[[targets.jumps]]
address = "bastion.example.net"
user = "diag"
identity_file = "~/.ssh/lab_ed25519"

[[targets.jumps]]
address = "10.20.0.1"
user = "diag"

# Direct target, no jumps
[[targets]]
id = "edge-router"
address = "192.168.10.1"
user = "admin"
commands = ["ip -s link"]
interval_secs = 60
enabled = true
"#
    .to_string()
}
