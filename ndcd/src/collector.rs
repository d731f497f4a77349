//! Session orchestration.
//!
//! The [`CollectionManager`] owns a whole collection session: it mints a
//! dedicated connection factory per target, spawns one worker task per
//! target, fans their samples into the session writer, feeds flap events to
//! the rotation controller, and shuts everything down within a bounded
//! timeout. Workers that cannot finish inside the stop window are abandoned
//! with a warning instead of blocking shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ndc_common::ssh::ConnectionFactory;
use ndc_common::{FlapEvent, Route, Sample, WorkerId, WorkerSpec, WorkerStatus};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::EventBus;
use crate::rotation::{LogFileState, RotationController};
use crate::session::SessionWriter;
use crate::worker::{RetryPolicy, Worker};

/// Buffer for the fan-in sample channel shared by all workers.
const SAMPLE_BUFFER: usize = 256;

/// Buffer for the flap intake channel.
const FLAP_BUFFER: usize = 16;

// ============================================================================
// Status board
// ============================================================================

/// Shared map of worker statuses, written by workers and read by status
/// consumers.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<HashMap<WorkerId, WorkerStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &WorkerId, status: WorkerStatus) {
        let mut map = self.inner.lock().expect("status board lock");
        map.insert(id.clone(), status);
    }

    pub fn get(&self, id: &WorkerId) -> Option<WorkerStatus> {
        let map = self.inner.lock().expect("status board lock");
        map.get(id).copied()
    }

    /// All known workers and their statuses, sorted by id.
    pub fn snapshot(&self) -> Vec<(WorkerId, WorkerStatus)> {
        let map = self.inner.lock().expect("status board lock");
        let mut entries: Vec<_> = map.iter().map(|(id, s)| (id.clone(), *s)).collect();
        entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        entries
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Mints the dedicated connection factory for one target route.
pub type FactoryProvider = Box<dyn Fn(&Route) -> Box<dyn ConnectionFactory> + Send + Sync>;

struct WorkerHandle {
    id: WorkerId,
    stop: mpsc::Sender<()>,
    task: JoinHandle<WorkerStatus>,
}

/// Orchestrates one collection session.
pub struct CollectionManager {
    factories: FactoryProvider,
    writer: Arc<SessionWriter>,
    rotation: Arc<RotationController>,
    board: StatusBoard,
    events: EventBus,
    retry: RetryPolicy,
    workers: Vec<WorkerHandle>,
    sample_tx: Option<mpsc::Sender<Sample>>,
    drain: Option<JoinHandle<()>>,
    flap_tx: mpsc::Sender<FlapEvent>,
    flap_task: JoinHandle<()>,
}

impl CollectionManager {
    pub fn new(
        factories: FactoryProvider,
        writer: SessionWriter,
        rotation: RotationController,
        events: EventBus,
        retry: RetryPolicy,
    ) -> Self {
        let rotation = Arc::new(rotation);
        let (flap_tx, mut flap_rx) = mpsc::channel::<FlapEvent>(FLAP_BUFFER);
        let flap_rotation = Arc::clone(&rotation);
        let flap_task = tokio::spawn(async move {
            while let Some(event) = flap_rx.recv().await {
                flap_rotation.broadcast_flap(&event);
            }
            debug!("Flap intake finished");
        });

        Self {
            factories,
            writer: Arc::new(writer),
            rotation,
            board: StatusBoard::new(),
            events,
            retry,
            workers: Vec::new(),
            sample_tx: None,
            drain: None,
            flap_tx,
            flap_task,
        }
    }

    /// Worker status map shared with the spawned workers.
    pub fn board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Sender for flap events from external link-state parsers. Cheap to
    /// clone; every event fans out to all registered log files.
    pub fn flap_sender(&self) -> mpsc::Sender<FlapEvent> {
        self.flap_tx.clone()
    }

    /// Apply a flap event synchronously; returns how many files were marked.
    pub fn handle_flap(&self, event: &FlapEvent) -> usize {
        self.rotation.broadcast_flap(event)
    }

    /// Current worker statuses, sorted by id.
    pub fn status_snapshot(&self) -> Vec<(WorkerId, WorkerStatus)> {
        self.board.snapshot()
    }

    /// Rotation state of every registered log file.
    pub fn log_snapshot(&self) -> Vec<LogFileState> {
        self.rotation.snapshot()
    }

    /// True while any worker task is still running.
    pub fn is_running(&self) -> bool {
        self.workers.iter().any(|w| !w.task.is_finished())
    }

    /// Start one worker per spec. A manager runs a single session; calling
    /// this twice is rejected.
    pub fn start(&mut self, specs: Vec<WorkerSpec>) {
        if !self.workers.is_empty() {
            warn!("Collection already started, ignoring start request");
            return;
        }

        let (sample_tx, sample_rx) = mpsc::channel::<Sample>(SAMPLE_BUFFER);
        self.drain = Some(tokio::spawn(drain_samples(
            sample_rx,
            Arc::clone(&self.writer),
            Arc::clone(&self.rotation),
            self.events.clone(),
        )));

        info!(
            "Starting collection of {} target(s) into {}",
            specs.len(),
            self.writer.dir().display()
        );
        for spec in specs {
            let stream = spec.id.as_str().to_string();
            self.rotation
                .register(stream.as_str(), self.writer.stream_path(&stream));

            let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
            let id = spec.id.clone();
            let factory = (self.factories)(&spec.route);
            let worker = Worker::new(
                spec,
                factory.as_ref(),
                self.retry.clone(),
                sample_tx.clone(),
                stop_rx,
                self.board.clone(),
                self.events.clone(),
            );
            self.workers.push(WorkerHandle {
                id,
                stop: stop_tx,
                task: tokio::spawn(worker.run()),
            });
        }
        self.sample_tx = Some(sample_tx);
    }

    /// Stop every worker, bounded by `timeout`.
    ///
    /// Workers still running when the budget runs out are aborted; their
    /// connections close when the task is dropped. The drain loop is always
    /// allowed to flush the samples already queued.
    pub async fn stop(&mut self, timeout: Duration) {
        // Worker handles must not be awaited a second time.
        if self.sample_tx.is_none() && self.drain.is_none() {
            return;
        }
        info!("Stopping collection (timeout {:?})", timeout);

        // Closing our sender lets the drain finish once the workers are gone.
        self.sample_tx.take();

        for handle in &self.workers {
            let _ = handle.stop.try_send(());
        }

        let deadline = Instant::now() + timeout;
        for handle in &mut self.workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle.task).await {
                Ok(Ok(status)) => {
                    debug!("Worker {} finished as {}", handle.id, status);
                }
                Ok(Err(err)) => {
                    warn!("Worker {} task failed: {}", handle.id, err);
                }
                Err(_) => {
                    warn!(
                        "Worker {} did not stop within the timeout, abandoning it",
                        handle.id
                    );
                    handle.task.abort();
                }
            }
        }

        if let Some(drain) = self.drain.take() {
            if let Err(err) = drain.await {
                warn!("Sample drain task failed: {}", err);
            }
        }

        for handle in &self.workers {
            self.rotation.unregister(handle.id.as_str());
        }
        self.flap_task.abort();
        info!("Collection stopped");
    }
}

/// Fan-in loop: writes every sample to its worker's stream file and feeds
/// the written size to the rotation controller.
async fn drain_samples(
    mut rx: mpsc::Receiver<Sample>,
    writer: Arc<SessionWriter>,
    rotation: Arc<RotationController>,
    events: EventBus,
) {
    while let Some(sample) = rx.recv().await {
        let stream = sample.worker_id.as_str().to_string();
        match writer.append(&stream, &sample).await {
            Ok(bytes) => {
                debug!(
                    "Sample from {} ({} bytes, exit {})",
                    stream, bytes, sample.result.exit_code
                );
                events.emit(
                    "sample_collected",
                    &json!({
                        "worker": stream,
                        "bytes": bytes,
                        "exit_code": sample.result.exit_code,
                    }),
                );
                if let Err(err) = rotation.record_append(&stream, bytes) {
                    warn!("Rotation bookkeeping failed for {}: {}", stream, err);
                }
            }
            Err(err) => {
                warn!("Failed to write sample for {}: {:#}", stream, err);
            }
        }
    }
    debug!("Sample drain finished");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndc_common::{Host, MockBehavior, MockConnectionFactory, Route};
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tracing::info;

    fn setup_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::INFO)
            .try_init();
    }

    fn spec(id: &str) -> WorkerSpec {
        WorkerSpec::new(WorkerId::new(id), Route::direct(Host::new(id, "diag")))
            .with_commands(vec!["ip -s link".to_string()])
            .with_interval(Duration::from_millis(10))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(2),
            cap: Duration::from_millis(50),
            max_attempts: 3,
        }
    }

    struct Rig {
        manager: CollectionManager,
        factory: MockConnectionFactory,
        dir: TempDir,
    }

    fn rig_with(behavior: MockBehavior, max_log_size: u64) -> Rig {
        let dir = TempDir::new().unwrap();
        let events = EventBus::new(8);
        let factory = MockConnectionFactory::new(behavior);
        let template = factory.clone();
        let manager = CollectionManager::new(
            Box::new(move |route: &Route| -> Box<dyn ConnectionFactory> {
                Box::new(template.for_route(route.clone()))
            }),
            SessionWriter::new(dir.path().to_path_buf()),
            RotationController::new(max_log_size, events.clone()),
            events,
            fast_retry(),
        );
        Rig {
            manager,
            factory,
            dir,
        }
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) {
        let stop_at = Instant::now() + deadline;
        loop {
            if check() {
                return;
            }
            assert!(Instant::now() < stop_at, "condition never became true");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn each_worker_gets_its_own_connection() {
        setup_tracing();
        info!("TEST START: each_worker_gets_its_own_connection");

        let mut rig = rig_with(MockBehavior::success(), 1024 * 1024);
        rig.manager
            .start(vec![spec("sw1"), spec("sw2"), spec("sw3")]);

        let board = rig.manager.board();
        wait_until(Duration::from_secs(2), || {
            ["sw1", "sw2", "sw3"]
                .iter()
                .all(|id| board.get(&WorkerId::new(*id)) == Some(WorkerStatus::Collecting))
        })
        .await;

        assert_eq!(rig.factory.built_count(), 3);
        let distinct: HashSet<u64> = rig.factory.built_ids().into_iter().collect();
        assert_eq!(distinct.len(), 3, "workers must never share a connection");

        rig.manager.stop(Duration::from_secs(2)).await;
        assert!(!rig.manager.is_running());
        info!("TEST PASS: each_worker_gets_its_own_connection");
    }

    #[tokio::test]
    async fn samples_land_in_per_worker_stream_files() {
        setup_tracing();
        info!("TEST START: samples_land_in_per_worker_stream_files");

        let behavior = MockBehavior::success()
            .with_command_result("ip -s link", 0, "eth0: 12345 packets\n", "");
        let mut rig = rig_with(behavior, 1024 * 1024);
        rig.manager.start(vec![spec("uplink"), spec("downlink")]);

        let uplink = rig.dir.path().join("uplink.jsonl");
        let downlink = rig.dir.path().join("downlink.jsonl");
        wait_until(Duration::from_secs(2), || {
            let populated = |p: &std::path::Path| {
                std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false)
            };
            populated(&uplink) && populated(&downlink)
        })
        .await;

        rig.manager.stop(Duration::from_secs(2)).await;

        for (path, id) in [(&uplink, "uplink"), (&downlink, "downlink")] {
            let content = std::fs::read_to_string(path).unwrap();
            for line in content.lines() {
                let sample: Sample = serde_json::from_str(line).unwrap();
                assert_eq!(sample.worker_id.as_str(), id);
                assert!(sample.result.stdout.contains("12345 packets"));
            }
        }
        info!("TEST PASS: samples_land_in_per_worker_stream_files");
    }

    #[tokio::test]
    async fn one_failing_target_does_not_disturb_the_rest() {
        setup_tracing();
        info!("TEST START: one_failing_target_does_not_disturb_the_rest");

        let dir = TempDir::new().unwrap();
        let events = EventBus::new(8);
        let healthy = MockConnectionFactory::new(MockBehavior::success());
        let failing = MockConnectionFactory::new(MockBehavior::connection_failure());
        let mut manager = CollectionManager::new(
            Box::new(move |route: &Route| -> Box<dyn ConnectionFactory> {
                if route.target.address == "unreachable" {
                    Box::new(failing.for_route(route.clone()))
                } else {
                    Box::new(healthy.for_route(route.clone()))
                }
            }),
            SessionWriter::new(dir.path().to_path_buf()),
            RotationController::new(1024 * 1024, events.clone()),
            events,
            fast_retry(),
        );

        manager.start(vec![spec("sw1"), spec("unreachable")]);

        let board = manager.board();
        wait_until(Duration::from_secs(2), || {
            board.get(&WorkerId::new("unreachable")) == Some(WorkerStatus::Failed)
                && board.get(&WorkerId::new("sw1")) == Some(WorkerStatus::Collecting)
        })
        .await;

        // The healthy stream keeps filling after its neighbor gave up.
        let stream = dir.path().join("sw1.jsonl");
        let before = std::fs::metadata(&stream).map(|m| m.len()).unwrap_or(0);
        wait_until(Duration::from_secs(2), || {
            std::fs::metadata(&stream)
                .map(|m| m.len() > before)
                .unwrap_or(false)
        })
        .await;

        manager.stop(Duration::from_secs(2)).await;
        assert_eq!(board.get(&WorkerId::new("sw1")), Some(WorkerStatus::Stopped));
        assert_eq!(
            board.get(&WorkerId::new("unreachable")),
            Some(WorkerStatus::Failed)
        );
        info!("TEST PASS: one_failing_target_does_not_disturb_the_rest");
    }

    #[tokio::test]
    async fn flap_event_marks_every_worker_log() {
        setup_tracing();
        info!("TEST START: flap_event_marks_every_worker_log");

        let mut rig = rig_with(MockBehavior::success(), 1024 * 1024);
        rig.manager
            .start(vec![spec("sw1"), spec("sw2"), spec("sw3")]);

        let flaps = rig.manager.flap_sender();
        flaps.send(FlapEvent::now("eth0")).await.unwrap();

        let manager = &rig.manager;
        wait_until(Duration::from_secs(2), || {
            let logs = manager.log_snapshot();
            logs.len() == 3 && logs.iter().all(|l| l.flap_marked)
        })
        .await;

        rig.manager.stop(Duration::from_secs(2)).await;
        info!("TEST PASS: flap_event_marks_every_worker_log");
    }

    #[tokio::test]
    async fn marked_stream_rotates_when_it_crosses_the_limit() {
        setup_tracing();
        info!("TEST START: marked_stream_rotates_when_it_crosses_the_limit");

        // Every sample line is larger than the limit, so each append crosses.
        let mut rig = rig_with(MockBehavior::success(), 64);
        rig.manager.start(vec![spec("uplink")]);

        assert_eq!(rig.manager.handle_flap(&FlapEvent::now("eth0")), 1);

        let backup = rig.dir.path().join("uplink.jsonl_1");
        wait_until(Duration::from_secs(2), || backup.exists()).await;

        rig.manager.stop(Duration::from_secs(2)).await;

        let content = std::fs::read_to_string(&backup).unwrap();
        let first_line = content.lines().next().unwrap();
        let sample: Sample = serde_json::from_str(first_line).unwrap();
        assert_eq!(sample.worker_id.as_str(), "uplink");
        info!("TEST PASS: marked_stream_rotates_when_it_crosses_the_limit");
    }

    #[tokio::test]
    async fn stop_joins_all_workers_within_the_timeout() {
        setup_tracing();
        info!("TEST START: stop_joins_all_workers_within_the_timeout");

        let mut rig = rig_with(MockBehavior::success(), 1024 * 1024);
        rig.manager
            .start(vec![spec("sw1"), spec("sw2"), spec("sw3")]);

        let board = rig.manager.board();
        wait_until(Duration::from_secs(2), || {
            board.get(&WorkerId::new("sw1")) == Some(WorkerStatus::Collecting)
        })
        .await;

        rig.manager.stop(Duration::from_secs(2)).await;
        assert!(!rig.manager.is_running());
        for (_, status) in rig.manager.status_snapshot() {
            assert_eq!(status, WorkerStatus::Stopped);
        }
        info!("TEST PASS: stop_joins_all_workers_within_the_timeout");
    }

    #[tokio::test]
    async fn stop_abandons_workers_stuck_in_execution() {
        setup_tracing();
        info!("TEST START: stop_abandons_workers_stuck_in_execution");

        // Commands take far longer than the stop budget; execution is never
        // interrupted mid-flight, so the worker must be abandoned.
        let behavior = MockBehavior::success().with_execution_delay(Duration::from_secs(30));
        let mut rig = rig_with(behavior, 1024 * 1024);
        rig.manager.start(vec![spec("uplink")]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let begun = Instant::now();
        rig.manager.stop(Duration::from_millis(100)).await;

        assert!(
            begun.elapsed() < Duration::from_secs(5),
            "stop must not wait for the stuck command"
        );
        assert!(!rig.manager.is_running());
        info!("TEST PASS: stop_abandons_workers_stuck_in_execution");
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut rig = rig_with(MockBehavior::success(), 1024 * 1024);
        rig.manager.start(vec![spec("sw1")]);
        rig.manager.start(vec![spec("sw2")]);
        assert_eq!(rig.factory.built_count(), 1);
        rig.manager.stop(Duration::from_secs(2)).await;
    }
}
