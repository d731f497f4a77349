//! Collection workers.
//!
//! One worker owns one connection and drives the sample loop for one
//! target: connect (with bounded exponential backoff), run the configured
//! commands every interval, push samples to the manager, reconnect when the
//! channel drops, and tear the connection down on every exit path. Workers
//! are fully isolated from each other; one giving up never disturbs the
//! rest.

use ndc_common::ssh::{backoff_delay, Connection, ConnectionFactory};
use ndc_common::{Sample, WorkerSpec, WorkerStatus};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::collector::StatusBoard;
use crate::events::EventBus;

/// Consecutive all-failed cycles before a worker reports degraded.
const DEGRADED_THRESHOLD: u32 = 3;

// ============================================================================
// Retry policy
// ============================================================================

/// Reconnect policy: delay `base * 2^attempt` capped at `cap`, at most
/// `max_attempts` tries per connect round.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base, self.cap)
    }
}

// ============================================================================
// Worker
// ============================================================================

enum ConnectOutcome {
    Connected,
    StopRequested,
    GaveUp,
}

/// A single collection worker bound to one target.
///
/// The worker builds its own connection from the factory and never shares
/// it; the transport lives exactly as long as the run loop.
pub struct Worker {
    spec: WorkerSpec,
    connection: Box<dyn Connection>,
    retry: RetryPolicy,
    samples: mpsc::Sender<Sample>,
    stop_rx: mpsc::Receiver<()>,
    board: StatusBoard,
    events: EventBus,
    status: WorkerStatus,
    failed_cycles: u32,
}

impl Worker {
    pub fn new(
        spec: WorkerSpec,
        factory: &dyn ConnectionFactory,
        retry: RetryPolicy,
        samples: mpsc::Sender<Sample>,
        stop_rx: mpsc::Receiver<()>,
        board: StatusBoard,
        events: EventBus,
    ) -> Self {
        let connection = factory.create();
        Self {
            spec,
            connection,
            retry,
            samples,
            stop_rx,
            board,
            events,
            status: WorkerStatus::Connecting,
            failed_cycles: 0,
        }
    }

    /// Run until stopped, out of reconnect attempts, or the sample channel
    /// closes. The connection is torn down before this returns, whatever
    /// the exit path was.
    pub async fn run(mut self) -> WorkerStatus {
        info!(
            "Worker {} starting ({})",
            self.spec.id,
            self.spec.route.describe()
        );
        self.events.emit(
            "worker_started",
            &json!({
                "worker": self.spec.id.as_str(),
                "route": self.spec.route.describe(),
            }),
        );

        let exit = self.run_loop().await;

        if let Err(err) = self.connection.disconnect().await {
            warn!("Worker {}: teardown failed: {:#}", self.spec.id, err);
        }
        self.set_status(exit);

        match exit {
            WorkerStatus::Failed => {
                warn!("Worker {} failed permanently", self.spec.id);
                self.events.emit(
                    "worker_failed",
                    &json!({ "worker": self.spec.id.as_str() }),
                );
            }
            _ => {
                info!("Worker {} stopped", self.spec.id);
                self.events.emit(
                    "worker_stopped",
                    &json!({ "worker": self.spec.id.as_str() }),
                );
            }
        }
        exit
    }

    async fn run_loop(&mut self) -> WorkerStatus {
        loop {
            match self.connect_with_backoff().await {
                ConnectOutcome::Connected => {}
                ConnectOutcome::StopRequested => return WorkerStatus::Stopped,
                ConnectOutcome::GaveUp => return WorkerStatus::Failed,
            }
            self.set_status(WorkerStatus::Collecting);

            loop {
                let mut any_success = false;
                for command in &self.spec.commands {
                    let result = self.connection.execute(command).await;
                    if !result.is_execution_failure() {
                        any_success = true;
                    }
                    let sample = Sample::new(self.spec.id.clone(), result);
                    if self.samples.send(sample).await.is_err() {
                        debug!("Worker {}: sample channel closed", self.spec.id);
                        return WorkerStatus::Stopped;
                    }
                }
                self.note_cycle(any_success);

                if !self.connection.is_connected() {
                    warn!(
                        "Worker {}: connection lost ({}), reconnecting",
                        self.spec.id,
                        self.connection.state()
                    );
                    break;
                }

                tokio::select! {
                    _ = self.stop_rx.recv() => return WorkerStatus::Stopped,
                    _ = tokio::time::sleep(self.spec.interval) => {}
                }
            }
        }
    }

    /// Connect with exponential backoff. A non-retryable error or attempt
    /// exhaustion gives up; a stop request wins over any pending delay.
    async fn connect_with_backoff(&mut self) -> ConnectOutcome {
        self.set_status(WorkerStatus::Connecting);
        for attempt in 0..self.retry.max_attempts {
            if self.stop_requested() {
                return ConnectOutcome::StopRequested;
            }
            if attempt > 0 {
                let delay = self.retry.delay(attempt - 1);
                debug!(
                    "Worker {}: retrying connect in {:?} (attempt {}/{})",
                    self.spec.id,
                    delay,
                    attempt + 1,
                    self.retry.max_attempts
                );
                tokio::select! {
                    _ = self.stop_rx.recv() => return ConnectOutcome::StopRequested,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.connection.connect().await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(
                            "Worker {}: reconnected on attempt {}",
                            self.spec.id,
                            attempt + 1
                        );
                    }
                    return ConnectOutcome::Connected;
                }
                Err(err) if !err.is_retryable() => {
                    warn!("Worker {}: connect rejected: {}", self.spec.id, err);
                    return ConnectOutcome::GaveUp;
                }
                Err(err) => {
                    warn!(
                        "Worker {}: connect attempt {}/{} failed: {}",
                        self.spec.id,
                        attempt + 1,
                        self.retry.max_attempts,
                        err
                    );
                }
            }
        }
        warn!(
            "Worker {}: giving up after {} connect attempts",
            self.spec.id, self.retry.max_attempts
        );
        ConnectOutcome::GaveUp
    }

    /// Non-blocking stop check for paths that never reach a select arm,
    /// such as reconnecting to a target that drops after every cycle.
    fn stop_requested(&mut self) -> bool {
        !matches!(
            self.stop_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        )
    }

    fn note_cycle(&mut self, any_success: bool) {
        if any_success {
            if self.failed_cycles >= DEGRADED_THRESHOLD {
                info!("Worker {}: collection recovered", self.spec.id);
            }
            self.failed_cycles = 0;
            self.set_status(WorkerStatus::Collecting);
        } else {
            self.failed_cycles += 1;
            if self.failed_cycles == DEGRADED_THRESHOLD {
                warn!(
                    "Worker {}: {} consecutive failed cycles",
                    self.spec.id, self.failed_cycles
                );
                self.set_status(WorkerStatus::Degraded);
            }
        }
    }

    fn set_status(&mut self, status: WorkerStatus) {
        if self.status == status {
            return;
        }
        debug!("Worker {}: {} -> {}", self.spec.id, self.status, status);
        self.status = status;
        self.board.set(&self.spec.id, status);
        self.events.emit(
            "connection_state_changed",
            &json!({
                "worker": self.spec.id.as_str(),
                "status": status.as_str(),
                "connection": self.connection.state().as_str(),
            }),
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
