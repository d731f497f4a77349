//! Mock transport for tests.
//!
//! [`MockConnection`] implements the same [`Connection`] contract as the
//! OpenSSH transport: serialized execution, keepalive probing, idempotent
//! disconnect. Tests script outcomes through [`MockBehavior`] and assert
//! against the recorded invocation log, which captures the phase, the
//! connection instance, and the start/finish window of every call.

use crate::errors::ConnectError;
use crate::ssh::{load_state, store_state, Connection, ConnectionFactory};
use crate::types::{CommandResult, ConnectionState, Host, Route};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst)
}

// ============================================================================
// Invocation log
// ============================================================================

/// Which operation a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Session establishment.
    Connect,
    /// Session teardown.
    Disconnect,
    /// Command execution.
    Execute,
    /// Keepalive probe.
    Probe,
}

/// One recorded call on a mock connection.
#[derive(Debug, Clone)]
pub struct MockInvocation {
    /// Which connection instance the call hit.
    pub connection_id: u64,
    /// What kind of call it was.
    pub phase: Phase,
    /// The command, for `Execute` entries.
    pub command: Option<String>,
    /// When the call entered its critical section.
    pub started_at: Instant,
    /// When the call left its critical section.
    pub finished_at: Instant,
}

type InvocationLog = Arc<StdMutex<Vec<MockInvocation>>>;

fn record(log: &InvocationLog, entry: MockInvocation) {
    if let Ok(mut entries) = log.lock() {
        entries.push(entry);
    }
}

fn snapshot(log: &InvocationLog) -> Vec<MockInvocation> {
    log.lock().map(|entries| entries.clone()).unwrap_or_default()
}

// ============================================================================
// Scripted behavior
// ============================================================================

/// Result scripted for one specific command.
#[derive(Debug, Clone)]
pub struct ScriptedResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Controls what a mock connection does.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Exit code for commands with no scripted result.
    pub default_exit_code: i32,
    /// Stdout for commands with no scripted result.
    pub default_stdout: String,
    /// Stderr for commands with no scripted result.
    pub default_stderr: String,
    /// Fail every connect attempt.
    pub fail_connect: bool,
    /// Fail this many connect attempts, then succeed.
    pub fail_connect_attempts: u32,
    /// Error text injected on connect failures. Classified like real
    /// SSH output, so auth-looking text fails fast in retry loops.
    pub connect_error: String,
    /// Fail every execute with an execution-layer error result.
    pub fail_execute: bool,
    /// Fail this many executes, then succeed.
    pub fail_execute_attempts: u32,
    /// Flip the connection to `Failed` after this many successful
    /// executes, simulating transport loss noticed by keepalive.
    pub drop_connection_after: Option<u32>,
    /// Time spent inside the execution critical section.
    pub execution_delay: Duration,
    /// Time taken by a connect attempt.
    pub connect_delay: Duration,
    /// Per-command scripted results.
    pub command_results: HashMap<String, ScriptedResult>,
    /// Run a keepalive probe loop at this interval while connected.
    pub keepalive_interval: Option<Duration>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            default_exit_code: 0,
            default_stdout: "ok\n".to_string(),
            default_stderr: String::new(),
            fail_connect: false,
            fail_connect_attempts: 0,
            connect_error: "connection reset by peer (injected)".to_string(),
            fail_execute: false,
            fail_execute_attempts: 0,
            drop_connection_after: None,
            execution_delay: Duration::from_millis(10),
            connect_delay: Duration::ZERO,
            command_results: HashMap::new(),
            keepalive_interval: None,
        }
    }
}

impl MockBehavior {
    /// Everything succeeds with the default output.
    pub fn success() -> Self {
        Self::default()
    }

    /// Every connect fails with transport-flavored error text.
    pub fn connection_failure() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    /// Every connect fails with auth-flavored error text, which retry
    /// loops treat as fatal.
    pub fn auth_failure() -> Self {
        Self {
            fail_connect: true,
            connect_error: "permission denied (publickey)".to_string(),
            ..Self::default()
        }
    }

    /// First `attempts` connects fail, later ones succeed.
    pub fn with_connect_failures(mut self, attempts: u32) -> Self {
        self.fail_connect_attempts = attempts;
        self
    }

    /// Every execute yields an error-shaped result.
    pub fn command_failure() -> Self {
        Self {
            fail_execute: true,
            ..Self::default()
        }
    }

    /// First `attempts` executes fail, later ones succeed.
    pub fn with_execute_failures(mut self, attempts: u32) -> Self {
        self.fail_execute_attempts = attempts;
        self
    }

    /// Drop the connection after `executes` successful commands.
    pub fn with_connection_drop_after(mut self, executes: u32) -> Self {
        self.drop_connection_after = Some(executes);
        self
    }

    /// Script the outcome of one command.
    pub fn with_command_result(
        mut self,
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        self.command_results.insert(
            command.into(),
            ScriptedResult {
                exit_code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        );
        self
    }

    /// Replace the default stdout.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.default_stdout = stdout.into();
        self
    }

    /// Set the time spent inside the execution critical section.
    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    /// Enable the keepalive probe loop.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }
}

// ============================================================================
// Mock connection
// ============================================================================

/// In-process stand-in for an SSH connection.
pub struct MockConnection {
    id: u64,
    route: Route,
    behavior: MockBehavior,
    state: Arc<RwLock<ConnectionState>>,
    exec_lock: Mutex<()>,
    invocations: InvocationLog,
    connect_failures_remaining: AtomicU32,
    execute_failures_remaining: AtomicU32,
    executes_completed: AtomicU32,
    probe_count: Arc<AtomicU32>,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    keepalive_stop: Option<mpsc::Sender<()>>,
    keepalive_task: Option<JoinHandle<()>>,
}

impl MockConnection {
    /// Mock with its own private invocation log.
    pub fn new(route: Route, behavior: MockBehavior) -> Self {
        let log = Arc::new(StdMutex::new(Vec::new()));
        Self::with_shared_log(route, behavior, log)
    }

    /// Mock recording into a log shared with other connections,
    /// typically owned by a [`MockConnectionFactory`].
    pub fn with_shared_log(route: Route, behavior: MockBehavior, log: InvocationLog) -> Self {
        let connect_failures = behavior.fail_connect_attempts;
        let execute_failures = behavior.fail_execute_attempts;
        Self {
            id: next_connection_id(),
            route,
            behavior,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            exec_lock: Mutex::new(()),
            invocations: log,
            connect_failures_remaining: AtomicU32::new(connect_failures),
            execute_failures_remaining: AtomicU32::new(execute_failures),
            executes_completed: AtomicU32::new(0),
            probe_count: Arc::new(AtomicU32::new(0)),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            keepalive_stop: None,
            keepalive_task: None,
        }
    }

    /// Unique id of this connection instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The route this mock pretends to dial.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Keepalive probes sent so far.
    pub fn probe_count(&self) -> u32 {
        self.probe_count.load(Ordering::SeqCst)
    }

    /// Connect calls observed, including failed ones.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Disconnect calls observed, including redundant ones.
    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of the invocation log.
    pub fn invocations(&self) -> Vec<MockInvocation> {
        snapshot(&self.invocations)
    }

    /// Start/finish windows of executed commands, in log order.
    pub fn execution_windows(&self) -> Vec<(Instant, Instant)> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.phase == Phase::Execute)
            .map(|inv| (inv.started_at, inv.finished_at))
            .collect()
    }

    fn spawn_keepalive(&mut self, probe_interval: Duration) {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let state = Arc::clone(&self.state);
        let probe_count = Arc::clone(&self.probe_count);
        let log = Arc::clone(&self.invocations);
        let id = self.id;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {}
                }
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                if load_state(&state) != ConnectionState::Connected {
                    break;
                }
                probe_count.fetch_add(1, Ordering::SeqCst);
                let now = Instant::now();
                record(
                    &log,
                    MockInvocation {
                        connection_id: id,
                        phase: Phase::Probe,
                        command: None,
                        started_at: now,
                        finished_at: now,
                    },
                );
            }
        });

        self.keepalive_stop = Some(stop_tx);
        self.keepalive_task = Some(handle);
    }

    async fn stop_keepalive(&mut self) {
        if let Some(stop) = self.keepalive_stop.take() {
            let _ = stop.send(()).await;
        }
        if let Some(handle) = self.keepalive_task.take() {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let started_at = Instant::now();

        if self.is_connected() {
            record(
                &self.invocations,
                MockInvocation {
                    connection_id: self.id,
                    phase: Phase::Connect,
                    command: None,
                    started_at,
                    finished_at: Instant::now(),
                },
            );
            return Ok(());
        }

        store_state(&self.state, ConnectionState::Connecting);
        if !self.behavior.connect_delay.is_zero() {
            tokio::time::sleep(self.behavior.connect_delay).await;
        }

        let transient_failure = self
            .connect_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            })
            .is_ok();

        let outcome = if self.behavior.fail_connect || transient_failure {
            store_state(&self.state, ConnectionState::Failed);
            Err(ConnectError::classify(
                &self.route.target.destination(),
                &self.behavior.connect_error,
                Duration::from_secs(10),
            ))
        } else {
            store_state(&self.state, ConnectionState::Connected);
            // The drop-after counter is per established session.
            self.executes_completed.store(0, Ordering::SeqCst);
            if let Some(probe_interval) = self.behavior.keepalive_interval {
                self.spawn_keepalive(probe_interval);
            }
            Ok(())
        };

        record(
            &self.invocations,
            MockInvocation {
                connection_id: self.id,
                phase: Phase::Connect,
                command: None,
                started_at,
                finished_at: Instant::now(),
            },
        );
        outcome
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let started_at = Instant::now();

        self.stop_keepalive().await;
        store_state(&self.state, ConnectionState::Disconnected);

        record(
            &self.invocations,
            MockInvocation {
                connection_id: self.id,
                phase: Phase::Disconnect,
                command: None,
                started_at,
                finished_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        load_state(&self.state)
    }

    async fn execute(&self, command: &str) -> CommandResult {
        let submitted_at = Utc::now();
        let entry = Instant::now();

        let _serialized = self.exec_lock.lock().await;
        let started_at = Instant::now();

        let result = if !self.is_connected() {
            let mut failure = CommandResult::execution_failure(command, "not connected");
            failure.submitted_at = submitted_at;
            failure
        } else {
            if !self.behavior.execution_delay.is_zero() {
                tokio::time::sleep(self.behavior.execution_delay).await;
            }

            let transient_failure = self
                .execute_failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    current.checked_sub(1)
                })
                .is_ok();

            if self.behavior.fail_execute || transient_failure {
                let mut failure =
                    CommandResult::execution_failure(command, "execution failed (injected)");
                failure.submitted_at = submitted_at;
                failure.total_latency_ms = entry.elapsed().as_millis() as u64;
                failure
            } else {
                let scripted = self.behavior.command_results.get(command);
                let (exit_code, stdout, stderr) = match scripted {
                    Some(result) => (
                        result.exit_code,
                        result.stdout.clone(),
                        result.stderr.clone(),
                    ),
                    None => (
                        self.behavior.default_exit_code,
                        self.behavior.default_stdout.clone(),
                        self.behavior.default_stderr.clone(),
                    ),
                };
                let completed = self.executes_completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(limit) = self.behavior.drop_connection_after {
                    if completed >= limit {
                        store_state(&self.state, ConnectionState::Failed);
                    }
                }

                CommandResult {
                    command: command.to_string(),
                    stdout,
                    stderr,
                    exit_code,
                    submitted_at,
                    send_latency_ms: (started_at - entry).as_millis() as u64,
                    read_latency_ms: started_at.elapsed().as_millis() as u64,
                    total_latency_ms: entry.elapsed().as_millis() as u64,
                }
            }
        };

        record(
            &self.invocations,
            MockInvocation {
                connection_id: self.id,
                phase: Phase::Execute,
                command: Some(command.to_string()),
                started_at,
                finished_at: Instant::now(),
            },
        );
        result
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.keepalive_task.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Mock factory
// ============================================================================

/// Builds [`MockConnection`]s that share one behavior and one log.
///
/// The shared log is how tests observe connections after handing them to
/// workers: every instance records into it with its own id, so per-worker
/// activity stays attributable. [`for_route`](Self::for_route) mints
/// sibling factories for other targets that record into the same log.
#[derive(Clone)]
pub struct MockConnectionFactory {
    route: Route,
    behavior: MockBehavior,
    invocations: InvocationLog,
    built_ids: Arc<StdMutex<Vec<u64>>>,
}

impl MockConnectionFactory {
    /// Factory producing connections with the given behavior, dialing a
    /// placeholder route.
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            route: Route::direct(Host::new("mock-target", "diag")),
            behavior,
            invocations: Arc::new(StdMutex::new(Vec::new())),
            built_ids: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Sibling factory for another route, recording into this factory's
    /// log.
    pub fn for_route(&self, route: Route) -> Self {
        Self {
            route,
            ..self.clone()
        }
    }

    /// How many connections this factory has built.
    pub fn built_count(&self) -> usize {
        self.built_ids.lock().map(|ids| ids.len()).unwrap_or(0)
    }

    /// Instance ids of built connections, in build order.
    pub fn built_ids(&self) -> Vec<u64> {
        self.built_ids
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the shared invocation log.
    pub fn invocations(&self) -> Vec<MockInvocation> {
        snapshot(&self.invocations)
    }

    /// Probe entries recorded for one connection.
    pub fn probe_count_for(&self, connection_id: u64) -> usize {
        self.invocations()
            .iter()
            .filter(|inv| inv.connection_id == connection_id && inv.phase == Phase::Probe)
            .count()
    }

    /// Execution windows across all connections: (connection id, start, finish).
    pub fn execution_windows(&self) -> Vec<(u64, Instant, Instant)> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.phase == Phase::Execute)
            .map(|inv| (inv.connection_id, inv.started_at, inv.finished_at))
            .collect()
    }
}

impl Default for MockConnectionFactory {
    fn default() -> Self {
        Self::new(MockBehavior::default())
    }
}

impl ConnectionFactory for MockConnectionFactory {
    fn create(&self) -> Box<dyn Connection> {
        let conn = MockConnection::with_shared_log(
            self.route.clone(),
            self.behavior.clone(),
            Arc::clone(&self.invocations),
        );
        if let Ok(mut ids) = self.built_ids.lock() {
            ids.push(conn.id());
        }
        Box::new(conn)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_route() -> Route {
        Route::direct(Host::new("sw03", "diag"))
    }

    #[tokio::test]
    async fn default_behavior_connects_and_succeeds() {
        let mut conn = MockConnection::new(test_route(), MockBehavior::success());
        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        let result = conn.execute("ip -s link show eth0").await;
        assert!(result.success());
        assert_eq!(result.stdout, "ok\n");
        assert_eq!(result.command, "ip -s link show eth0");
    }

    #[tokio::test]
    async fn scripted_command_results_override_defaults() {
        let behavior = MockBehavior::success()
            .with_command_result("ethtool eth0", 0, "Speed: 10000Mb/s\n", "")
            .with_command_result("ip link show eth9", 1, "", "Device \"eth9\" does not exist.\n");
        let mut conn = MockConnection::new(test_route(), behavior);
        conn.connect().await.unwrap();

        let ethtool = conn.execute("ethtool eth0").await;
        assert!(ethtool.success());
        assert!(ethtool.stdout.contains("10000Mb/s"));

        let missing = conn.execute("ip link show eth9").await;
        assert_eq!(missing.exit_code, 1);
        assert!(missing.stderr.contains("does not exist"));
        assert!(!missing.is_execution_failure());
    }

    #[tokio::test]
    async fn permanent_connect_failure_reports_failed_state() {
        let mut conn = MockConnection::new(test_route(), MockBehavior::connection_failure());
        let err = conn.connect().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn auth_failure_is_not_retryable() {
        let mut conn = MockConnection::new(test_route(), MockBehavior::auth_failure());
        let err = conn.connect().await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn transient_failures_clear_after_n_attempts() {
        let behavior = MockBehavior::success().with_connect_failures(2);
        let mut conn = MockConnection::new(test_route(), behavior);

        assert!(conn.connect().await.is_err());
        assert!(conn.connect().await.is_err());
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.connect_calls(), 3);
    }

    #[tokio::test]
    async fn execute_before_connect_is_an_error_result() {
        let conn = MockConnection::new(test_route(), MockBehavior::success());
        let result = conn.execute("ip link").await;
        assert!(result.is_execution_failure());
        assert!(result.stderr.contains("not connected"));

        let executes: Vec<_> = conn
            .invocations()
            .into_iter()
            .filter(|inv| inv.phase == Phase::Execute)
            .collect();
        assert_eq!(executes.len(), 1);
    }

    #[tokio::test]
    async fn injected_execute_failure_shapes_result() {
        let mut conn = MockConnection::new(test_route(), MockBehavior::command_failure());
        conn.connect().await.unwrap();
        let result = conn.execute("ip link").await;
        assert!(result.is_execution_failure());
        assert!(result.stderr.contains("injected"));
    }

    #[tokio::test]
    async fn transient_execute_failures_clear_after_n_attempts() {
        let behavior = MockBehavior::success().with_execute_failures(2);
        let mut conn = MockConnection::new(test_route(), behavior);
        conn.connect().await.unwrap();

        assert!(conn.execute("ip link").await.is_execution_failure());
        assert!(conn.execute("ip link").await.is_execution_failure());
        let third = conn.execute("ip link").await;
        assert!(third.success());
        assert_eq!(third.stdout, "ok\n");
    }

    #[tokio::test]
    async fn connection_drops_after_configured_executes() {
        let behavior = MockBehavior::success().with_connection_drop_after(2);
        let mut conn = MockConnection::new(test_route(), behavior);
        conn.connect().await.unwrap();

        assert!(conn.execute("ip link").await.success());
        assert!(conn.execute("ip link").await.success());
        assert_eq!(conn.state(), ConnectionState::Failed);

        let after_drop = conn.execute("ip link").await;
        assert!(after_drop.is_execution_failure());
        assert!(after_drop.stderr.contains("not connected"));
    }

    #[tokio::test]
    async fn concurrent_executes_never_overlap() {
        let behavior = MockBehavior::success().with_execution_delay(Duration::from_millis(20));
        let mut conn = MockConnection::new(test_route(), behavior);
        conn.connect().await.unwrap();
        let conn = Arc::new(conn);

        let (a, b, c) = tokio::join!(
            conn.execute("cmd-a"),
            conn.execute("cmd-b"),
            conn.execute("cmd-c")
        );
        assert!(a.success() && b.success() && c.success());

        let mut windows = conn.execution_windows();
        windows.sort_by_key(|(start, _)| *start);
        assert_eq!(windows.len(), 3);
        for pair in windows.windows(2) {
            let (_, first_end) = pair[0];
            let (second_start, _) = pair[1];
            assert!(
                second_start >= first_end,
                "execution windows overlap: {:?}",
                windows
            );
        }
    }

    #[tokio::test]
    async fn keepalive_probes_freeze_after_disconnect() {
        let behavior = MockBehavior::success().with_keepalive(Duration::from_millis(10));
        let mut conn = MockConnection::new(test_route(), behavior);
        conn.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(conn.probe_count() > 0, "probe loop never ran");

        conn.disconnect().await.unwrap();
        let frozen = conn.probe_count();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(conn.probe_count(), frozen);
    }

    #[tokio::test]
    async fn disconnect_twice_is_harmless() {
        let mut conn = MockConnection::new(test_route(), MockBehavior::success());
        conn.connect().await.unwrap();
        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.disconnect_calls(), 2);
    }

    #[tokio::test]
    async fn factory_builds_distinct_instances_into_shared_log() {
        let factory = MockConnectionFactory::default();
        let mut first = factory.create();
        let mut second = factory
            .for_route(Route::direct(Host::new("sw04", "diag")))
            .create();

        first.connect().await.unwrap();
        second.connect().await.unwrap();
        first.execute("cmd-1").await;
        second.execute("cmd-2").await;

        assert_eq!(factory.built_count(), 2);
        let ids = factory.built_ids();
        assert_ne!(ids[0], ids[1]);

        let windows = factory.execution_windows();
        assert_eq!(windows.len(), 2);
        assert_ne!(windows[0].0, windows[1].0);
    }
}
