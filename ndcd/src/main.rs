//! Network Diagnostic Collector - Daemon
//!
//! The daemon loads a session configuration, opens one SSH connection per
//! target, and collects diagnostic command output continuously into a
//! timestamped session directory. A Unix socket accepts link flap events
//! from an external link-state parser; each one marks every live log file
//! so the next size-triggered rollover preserves the surrounding evidence.

#![forbid(unsafe_code)]

mod collector;
mod config;
mod events;
mod rotation;
mod session;
mod worker;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ndc_common::ssh::ConnectionFactory;
use ndc_common::{init_logging, FlapEvent, LogConfig, Route, SshConnectionFactory};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use collector::{CollectionManager, FactoryProvider};
use events::EventBus;
use rotation::RotationController;
use session::SessionWriter;
use worker::RetryPolicy;

#[derive(Parser)]
#[command(name = "ndcd")]
#[command(author, version, about = "NDC daemon - continuous remote diagnostics collection")]
struct Cli {
    /// Path to session configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for session logs (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Stop after this many seconds (overrides the config file)
    #[arg(long)]
    duration: Option<u64>,

    /// Path to the Unix socket fed by the link-state parser
    #[arg(long, default_value_os_t = config::default_flap_socket_path())]
    flap_socket: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Write an example session config to the default location and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    if cli.init_config {
        return write_example_config();
    }

    info!("Starting NDC daemon...");

    let mut session_config = config::load_session_config(cli.config.as_deref())?;
    apply_cli_overrides(&mut session_config, &cli);

    let specs = session_config.specs();
    if specs.is_empty() {
        bail!("no enabled targets configured (run with --init-config for an example)");
    }
    info!("Loaded {} enabled target(s)", specs.len());

    let log_root = session_config.session.log_root()?;
    let session_dir = session::create_session_dir(&log_root, &session_config.session.label)?;
    info!("Session directory: {}", session_dir.display());

    let events = EventBus::new(256);
    let ssh_options = session_config.ssh.to_options();
    let factories: FactoryProvider = Box::new(move |route: &Route| -> Box<dyn ConnectionFactory> {
        Box::new(SshConnectionFactory::new(route.clone(), ssh_options.clone()))
    });
    let mut manager = CollectionManager::new(
        factories,
        SessionWriter::new(session_dir),
        RotationController::new(session_config.session.max_log_size_bytes, events.clone()),
        events,
        RetryPolicy::default(),
    );
    manager.start(specs);

    // Remove a stale socket left by a previous run.
    if cli.flap_socket.exists() {
        std::fs::remove_file(&cli.flap_socket)
            .with_context(|| format!("removing stale socket {}", cli.flap_socket.display()))?;
    }
    let listener = UnixListener::bind(&cli.flap_socket)
        .with_context(|| format!("binding flap socket {}", cli.flap_socket.display()))?;
    info!("Listening for flap events on {:?}", cli.flap_socket);

    let flap_tx = manager.flap_sender();
    let deadline =
        tokio::time::Instant::now() + session_config.session.duration().unwrap_or_default();
    let bounded = session_config.session.duration().is_some();
    if bounded {
        info!(
            "Session bounded to {:?}",
            session_config.session.duration().unwrap_or_default()
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupt received, stopping collection");
                break;
            }
            _ = tokio::time::sleep_until(deadline), if bounded => {
                info!("Session duration elapsed");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let flaps = flap_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_flap_stream(stream, flaps).await {
                                warn!("Flap connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
        }
    }

    manager.stop(session_config.session.stop_timeout()).await;

    if cli.flap_socket.exists() {
        let _ = std::fs::remove_file(&cli.flap_socket);
    }

    info!("Daemon stopped");
    Ok(())
}

/// CLI flags win over the config file.
fn apply_cli_overrides(session_config: &mut config::SessionConfig, cli: &Cli) {
    if let Some(dir) = &cli.log_dir {
        session_config.session.log_dir = Some(dir.to_string_lossy().to_string());
    }
    if let Some(secs) = cli.duration {
        session_config.session.duration_secs = Some(secs);
    }
}

/// Write the example session config to the default location.
fn write_example_config() -> Result<()> {
    let path = config::default_config_path().context("could not determine config directory")?;
    if path.exists() {
        bail!("refusing to overwrite existing config at {}", path.display());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    std::fs::write(&path, config::example_session_config())
        .with_context(|| format!("writing example config to {}", path.display()))?;
    println!("Wrote example session config to {}", path.display());
    Ok(())
}

/// Read newline-delimited flap events from one parser connection.
///
/// Malformed lines are logged and skipped; the connection stays open until
/// the parser closes it or the session shuts down.
async fn handle_flap_stream(stream: UnixStream, flaps: mpsc::Sender<FlapEvent>) -> Result<()> {
    let (reader, _writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(()); // Connection closed
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<FlapEvent>(trimmed) {
            Ok(event) => {
                debug!("Flap reported on {}", event.interface);
                if flaps.send(event).await.is_err() {
                    return Ok(()); // Session is shutting down
                }
            }
            Err(e) => {
                warn!("Ignoring malformed flap event: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["ndcd"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.log_dir.is_none());
        assert!(cli.duration.is_none());
        assert!(!cli.verbose);
        assert!(!cli.init_config);
        assert!(cli.flap_socket.ends_with("ndc-flap.sock"));
    }

    #[test]
    fn cli_overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "ndcd",
            "--log-dir",
            "/tmp/ndc-test-logs",
            "--duration",
            "30",
        ])
        .unwrap();
        let mut session_config = config::SessionConfig::default();
        apply_cli_overrides(&mut session_config, &cli);

        assert_eq!(
            session_config.session.log_dir.as_deref(),
            Some("/tmp/ndc-test-logs")
        );
        assert_eq!(session_config.session.duration_secs, Some(30));
    }

    #[test]
    fn absent_cli_flags_leave_config_untouched() {
        let cli = Cli::try_parse_from(["ndcd"]).unwrap();
        let mut session_config = config::SessionConfig::default();
        session_config.session.log_dir = Some("/var/log/ndc".to_string());
        session_config.session.duration_secs = Some(600);
        apply_cli_overrides(&mut session_config, &cli);

        assert_eq!(
            session_config.session.log_dir.as_deref(),
            Some("/var/log/ndc")
        );
        assert_eq!(session_config.session.duration_secs, Some(600));
    }

    #[tokio::test]
    async fn flap_stream_lines_reach_the_channel() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(handle_flap_stream(server, tx));

        let mut first = serde_json::to_string(&FlapEvent::now("eth0")).unwrap();
        first.push('\n');
        client.write_all(first.as_bytes()).await.unwrap();
        client.write_all(b"not json\n").await.unwrap();
        let mut second = serde_json::to_string(&FlapEvent::now("eth1")).unwrap();
        second.push('\n');
        client.write_all(second.as_bytes()).await.unwrap();
        drop(client);

        assert_eq!(rx.recv().await.unwrap().interface, "eth0");
        assert_eq!(rx.recv().await.unwrap().interface, "eth1");
        task.await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_flap_channel_ends_the_stream_quietly() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let task = tokio::spawn(handle_flap_stream(server, tx));

        let mut line = serde_json::to_string(&FlapEvent::now("eth0")).unwrap();
        line.push('\n');
        client.write_all(line.as_bytes()).await.unwrap();

        task.await.unwrap().unwrap();
    }
}
