//! Event broadcast for daemon observers.
//!
//! Collection activity is surfaced as a stream of JSON lines so that status
//! consumers (CLI followers, tests) can watch the daemon without polling it.
//! Event names currently in use:
//!
//! - `connection_state_changed` on every worker transport transition
//! - `worker_started` / `worker_stopped` / `worker_failed`
//! - `sample_collected` once per successful collection cycle
//! - `flap_broadcast` when a flap notification reaches the log registry
//! - `log_rotated` / `log_cleared` when a log file hits its size limit

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

/// Broadcast channel for daemon events (JSON lines).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// Note: the effective buffer is clamped to at least `DEFAULT_BUFFER` to
    /// avoid frequent lag/drop behavior for bursty event streams.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit a structured event with payload.
    ///
    /// Delivery is best effort: with no live subscribers the event is dropped
    /// silently, and a payload that fails to serialize is logged and skipped.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!("Failed to serialize event {}: {}", event, err),
        }
    }
}
