//! Flap-aware log rotation.
//!
//! Every session log file registers here. The controller tracks the file's
//! size and a sticky flap mark, and decides what happens when the file
//! reaches its size limit:
//!
//! ```text
//!                         append recorded
//!                               |
//!                    size < limit?  -- yes -->  keep writing
//!                               |
//!                              no
//!                               |
//!                 flap_marked?  -- yes -->  ROTATE: move to <name>_<index>,
//!                               |           index += 1, size = 0, unmark
//!                              no
//!                               |
//!                            CLEAR: truncate in place, size = 0
//! ```
//!
//! A flap event marks every registered file at once, whatever its size. The
//! mark is sticky: a file far below its limit stays marked until it finally
//! crosses the limit, so the data around the flap is preserved instead of
//! being truncated away. Clearing is the default for uneventful streams and
//! keeps disk usage flat.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndc_common::{FlapEvent, RotationError};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::events::EventBus;

/// Default per-file size limit before a rotate/clear decision is taken.
pub const DEFAULT_MAX_LOG_SIZE_BYTES: u64 = 10 * 1024 * 1024;

// ============================================================================
// Per-file state
// ============================================================================

/// Size and flap bookkeeping for one registered log file.
#[derive(Debug, Clone)]
pub struct LogFileState {
    /// Registry key, unique per session (usually the worker id).
    pub name: String,
    /// Where the live file sits on disk.
    pub path: PathBuf,
    /// Bytes written since the last rotation or clear.
    pub current_size_bytes: u64,
    /// Limit at which the rotate/clear decision is taken.
    pub max_size_bytes: u64,
    /// Set by a flap broadcast, reset only by an actual rotation.
    pub flap_marked: bool,
    /// Suffix for the next backup; counts up within the session.
    pub rotation_index: u32,
}

/// What happened to a file when an append was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Below the size limit; the file keeps accumulating.
    Kept,
    /// Limit reached while flap-marked; the file moved to `backup`.
    Rotated { backup: PathBuf },
    /// Limit reached with no flap pending; the file was truncated in place.
    Cleared,
}

fn backup_path(path: &Path, index: u32) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!("_{}", index));
    path.with_file_name(name)
}

// ============================================================================
// Controller
// ============================================================================

/// Registry of live log files plus the rotate-vs-clear policy.
///
/// All methods are synchronous; the registry lock is never held across an
/// await point. Holding it across a whole flap broadcast is what makes the
/// broadcast atomic with respect to registration: a file registering
/// concurrently either sees the mark or registers after the broadcast,
/// never a lost update.
pub struct RotationController {
    max_size_bytes: u64,
    files: Mutex<HashMap<String, LogFileState>>,
    events: EventBus,
}

impl RotationController {
    /// Create a controller applying `max_size_bytes` to every registered file.
    pub fn new(max_size_bytes: u64, events: EventBus) -> Self {
        Self {
            max_size_bytes: max_size_bytes.max(1),
            files: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Register a log file under `name`.
    ///
    /// If the file already exists on disk its current size is picked up, so
    /// appending to a pre-existing stream counts its old bytes toward the
    /// limit. The size check itself only runs on writes. Re-registering a
    /// live name leaves the existing state (index, mark) in place.
    pub fn register(&self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let name = name.into();
        let path = path.into();
        let mut files = self.files.lock().expect("log registry lock");
        if files.contains_key(&name) {
            debug!("Log file {} already registered", name);
            return;
        }
        let existing_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        debug!(
            "Registered log file {} at {} ({} bytes)",
            name,
            path.display(),
            existing_size
        );
        files.insert(
            name.clone(),
            LogFileState {
                name,
                path,
                current_size_bytes: existing_size,
                max_size_bytes: self.max_size_bytes,
                flap_marked: false,
                rotation_index: 1,
            },
        );
    }

    /// Remove `name` from the registry; it stops receiving flap broadcasts.
    pub fn unregister(&self, name: &str) {
        let mut files = self.files.lock().expect("log registry lock");
        if files.remove(name).is_some() {
            debug!("Unregistered log file {}", name);
        }
    }

    /// Record that `bytes` were appended to `name` and apply the size policy.
    ///
    /// The append itself has already happened when this is called, so the
    /// written bytes always count toward the limit and a rotation moves them
    /// into the backup. On a filesystem failure the accumulated size and the
    /// flap mark are left as they are; the next recorded append re-evaluates
    /// the limit and retries the same operation.
    pub fn record_append(&self, name: &str, bytes: u64) -> Result<RotationOutcome, RotationError> {
        let mut files = self.files.lock().expect("log registry lock");
        let state = files.get_mut(name).ok_or_else(|| RotationError::UnknownFile {
            name: name.to_string(),
        })?;

        state.current_size_bytes = state.current_size_bytes.saturating_add(bytes);
        if state.current_size_bytes < state.max_size_bytes {
            return Ok(RotationOutcome::Kept);
        }

        if state.flap_marked {
            self.rotate_locked(state)
        } else {
            self.clear_locked(state)
        }
    }

    /// Mark every registered file; returns how many were marked.
    pub fn broadcast_flap(&self, event: &FlapEvent) -> usize {
        let mut files = self.files.lock().expect("log registry lock");
        for state in files.values_mut() {
            state.flap_marked = true;
        }
        let marked = files.len();
        info!(
            interface = %event.interface,
            marked,
            "Flap broadcast marked {} log file(s) for rotation",
            marked
        );
        self.events.emit(
            "flap_broadcast",
            &json!({
                "interface": event.interface,
                "timestamp": event.timestamp.to_rfc3339(),
                "marked": marked,
            }),
        );
        marked
    }

    /// Copy of the state for `name`, if registered.
    pub fn state_of(&self, name: &str) -> Option<LogFileState> {
        let files = self.files.lock().expect("log registry lock");
        files.get(name).cloned()
    }

    /// Copies of every registered state, in no particular order.
    pub fn snapshot(&self) -> Vec<LogFileState> {
        let files = self.files.lock().expect("log registry lock");
        files.values().cloned().collect()
    }

    fn rotate_locked(&self, state: &mut LogFileState) -> Result<RotationOutcome, RotationError> {
        let backup = backup_path(&state.path, state.rotation_index);
        fs::rename(&state.path, &backup)
            .map_err(|err| RotationError::io("rename", &state.name, err))?;
        if let Err(err) = fs::File::create(&state.path) {
            // The backup is safe; the writer recreates the live file on its
            // next append.
            warn!(
                "Could not recreate {} after rotation: {}",
                state.path.display(),
                err
            );
        }
        state.rotation_index += 1;
        state.current_size_bytes = 0;
        state.flap_marked = false;
        info!(
            "Rotated {} to {} (next index {})",
            state.name,
            backup.display(),
            state.rotation_index
        );
        self.events.emit(
            "log_rotated",
            &json!({
                "file": state.name,
                "backup": backup.display().to_string(),
                "next_index": state.rotation_index,
            }),
        );
        Ok(RotationOutcome::Rotated { backup })
    }

    fn clear_locked(&self, state: &mut LogFileState) -> Result<RotationOutcome, RotationError> {
        fs::File::create(&state.path)
            .map_err(|err| RotationError::io("truncate", &state.name, err))?;
        state.current_size_bytes = 0;
        debug!("Cleared {} in place", state.name);
        self.events.emit(
            "log_cleared",
            &json!({
                "file": state.name,
                "rotation_index": state.rotation_index,
            }),
        );
        Ok(RotationOutcome::Cleared)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const LIMIT: u64 = 20 * 1024;

    fn controller(limit: u64) -> RotationController {
        RotationController::new(limit, EventBus::new(8))
    }

    /// Creates the file with `size` bytes of content and registers it.
    fn seed_file(dir: &TempDir, ctl: &RotationController, name: &str, size: usize) -> PathBuf {
        let path = dir.path().join(format!("{}.jsonl", name));
        fs::write(&path, vec![b'x'; size]).unwrap();
        ctl.register(name, &path);
        path
    }

    #[test]
    fn appends_below_limit_accumulate() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        seed_file(&dir, &ctl, "uplink", 0);

        assert_eq!(ctl.record_append("uplink", 512).unwrap(), RotationOutcome::Kept);
        assert_eq!(ctl.record_append("uplink", 512).unwrap(), RotationOutcome::Kept);

        let state = ctl.state_of("uplink").unwrap();
        assert_eq!(state.current_size_bytes, 1024);
        assert!(!state.flap_marked);
        assert_eq!(state.rotation_index, 1);
    }

    #[test]
    fn unmarked_file_clears_at_limit() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        let path = seed_file(&dir, &ctl, "uplink", LIMIT as usize);

        let outcome = ctl.record_append("uplink", 1).unwrap();
        assert_eq!(outcome, RotationOutcome::Cleared);

        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        let state = ctl.state_of("uplink").unwrap();
        assert_eq!(state.current_size_bytes, 0);
        assert_eq!(state.rotation_index, 1);
        assert!(!backup_path(&path, 1).exists());
    }

    #[test]
    fn marked_file_rotates_at_limit() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        let path = seed_file(&dir, &ctl, "uplink", LIMIT as usize);

        ctl.broadcast_flap(&FlapEvent::now("eth0"));
        let outcome = ctl.record_append("uplink", 1).unwrap();

        let backup = backup_path(&path, 1);
        assert_eq!(
            outcome,
            RotationOutcome::Rotated {
                backup: backup.clone()
            }
        );
        assert!(backup.exists());
        assert_eq!(fs::metadata(&backup).unwrap().len(), LIMIT);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        let state = ctl.state_of("uplink").unwrap();
        assert!(!state.flap_marked);
        assert_eq!(state.current_size_bytes, 0);
        assert_eq!(state.rotation_index, 2);
    }

    #[test]
    fn limit_check_is_at_or_above() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        seed_file(&dir, &ctl, "uplink", (LIMIT - 1) as usize);

        // Landing exactly on the limit already triggers the decision.
        let outcome = ctl.record_append("uplink", 1).unwrap();
        assert_eq!(outcome, RotationOutcome::Cleared);
    }

    #[test]
    fn flap_broadcast_marks_every_registered_file() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        let big = seed_file(&dir, &ctl, "big", 25 * 1024);
        seed_file(&dir, &ctl, "small", 11 * 1024);
        let mid = seed_file(&dir, &ctl, "mid", 18 * 1024);

        let marked = ctl.broadcast_flap(&FlapEvent::now("eth0"));
        assert_eq!(marked, 3);
        for name in ["big", "small", "mid"] {
            assert!(ctl.state_of(name).unwrap().flap_marked, "{} not marked", name);
        }

        // Already over the limit: first write after the flap rotates.
        let outcome = ctl.record_append("big", 16).unwrap();
        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
        assert!(backup_path(&big, 1).exists());

        // Well below the limit: stays marked, no rotation yet.
        assert_eq!(ctl.record_append("small", 16).unwrap(), RotationOutcome::Kept);
        assert!(ctl.state_of("small").unwrap().flap_marked);

        // Crosses the limit later: the pending rotation executes, not a clear.
        let outcome = ctl.record_append("mid", 3 * 1024).unwrap();
        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
        assert!(backup_path(&mid, 1).exists());
    }

    #[test]
    fn sticky_mark_rotates_exactly_once() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        let path = seed_file(&dir, &ctl, "uplink", 0);

        ctl.broadcast_flap(&FlapEvent::now("eth0"));
        for _ in 0..5 {
            assert_eq!(ctl.record_append("uplink", 100).unwrap(), RotationOutcome::Kept);
            assert!(ctl.state_of("uplink").unwrap().flap_marked);
        }

        fs::write(&path, vec![b'x'; LIMIT as usize]).unwrap();
        let outcome = ctl.record_append("uplink", LIMIT).unwrap();
        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
        assert!(!ctl.state_of("uplink").unwrap().flap_marked);

        // Next crossing has no flap pending and clears instead.
        fs::write(&path, vec![b'x'; LIMIT as usize]).unwrap();
        let outcome = ctl.record_append("uplink", LIMIT).unwrap();
        assert_eq!(outcome, RotationOutcome::Cleared);
        assert_eq!(ctl.state_of("uplink").unwrap().rotation_index, 2);
    }

    #[test]
    fn successive_rotations_count_up() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        let path = seed_file(&dir, &ctl, "uplink", 0);

        for expected in 1..=2u32 {
            fs::write(&path, vec![b'x'; LIMIT as usize]).unwrap();
            ctl.broadcast_flap(&FlapEvent::now("eth0"));
            let outcome = ctl.record_append("uplink", LIMIT).unwrap();
            let backup = backup_path(&path, expected);
            assert_eq!(outcome, RotationOutcome::Rotated { backup: backup.clone() });
            assert!(backup.exists());
        }
        assert!(backup_path(&path, 1).exists());
        assert!(backup_path(&path, 2).exists());
    }

    #[test]
    fn unknown_file_is_an_error() {
        let ctl = controller(LIMIT);
        let err = ctl.record_append("ghost", 1).unwrap_err();
        assert!(matches!(err, RotationError::UnknownFile { .. }));
    }

    #[test]
    fn reregistering_live_name_keeps_state() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        let path = seed_file(&dir, &ctl, "uplink", 0);

        ctl.broadcast_flap(&FlapEvent::now("eth0"));
        ctl.register("uplink", &path);
        assert!(ctl.state_of("uplink").unwrap().flap_marked);
    }

    #[test]
    fn unregistered_file_misses_later_broadcasts() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        seed_file(&dir, &ctl, "keep", 0);
        seed_file(&dir, &ctl, "gone", 0);

        ctl.unregister("gone");
        let marked = ctl.broadcast_flap(&FlapEvent::now("eth0"));
        assert_eq!(marked, 1);
        assert!(ctl.state_of("gone").is_none());
        assert!(ctl.state_of("keep").unwrap().flap_marked);
    }

    #[test]
    fn fs_failure_leaves_state_for_retry() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(LIMIT);
        let path = seed_file(&dir, &ctl, "uplink", LIMIT as usize);
        ctl.broadcast_flap(&FlapEvent::now("eth0"));

        // Pull the file out from under the controller so the rename fails.
        fs::remove_file(&path).unwrap();
        let err = ctl.record_append("uplink", 1).unwrap_err();
        assert!(matches!(err, RotationError::Io { operation: "rename", .. }));

        let state = ctl.state_of("uplink").unwrap();
        assert!(state.flap_marked, "mark must survive a failed rotation");
        assert_eq!(state.rotation_index, 1);

        // Once the file is back, the next recorded append retries and rotates.
        fs::write(&path, vec![b'x'; LIMIT as usize]).unwrap();
        let outcome = ctl.record_append("uplink", 1).unwrap();
        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
        assert!(!ctl.state_of("uplink").unwrap().flap_marked);
    }

    #[tokio::test]
    async fn decisions_are_emitted_as_events() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let ctl = RotationController::new(LIMIT, bus);

        let path = dir.path().join("uplink.jsonl");
        fs::write(&path, vec![b'x'; LIMIT as usize]).unwrap();
        ctl.register("uplink", &path);

        ctl.record_append("uplink", 1).unwrap();
        ctl.broadcast_flap(&FlapEvent::now("eth1"));
        fs::write(&path, vec![b'x'; LIMIT as usize]).unwrap();
        ctl.record_append("uplink", LIMIT).unwrap();

        let mut names = Vec::new();
        for _ in 0..3 {
            let msg = rx.try_recv().expect("expected a buffered event");
            let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
            names.push(parsed["event"].as_str().unwrap().to_string());
        }
        assert_eq!(names, ["log_cleared", "flap_broadcast", "log_rotated"]);
    }

    #[test]
    fn backup_path_appends_index_after_extension() {
        let path = PathBuf::from("/tmp/session/uplink.jsonl");
        assert_eq!(
            backup_path(&path, 3),
            PathBuf::from("/tmp/session/uplink.jsonl_3")
        );
    }
}
