//! Error taxonomy for the connection, execution, and rotation layers.
//!
//! Connection errors carry a retryability classification so the worker
//! retry loop can fail fast on rejections that will never heal (bad
//! credentials, unknown host keys) and back off on transient transport
//! faults.

use std::time::Duration;
use thiserror::Error;

/// Whether raw SSH error text describes an authentication, host trust,
/// or local configuration rejection. These never succeed on retry.
pub fn is_auth_error_text(message: &str) -> bool {
    let message = message.to_lowercase();

    message.contains("permission denied")
        || message.contains("authentication failed")
        || message.contains("host key verification failed")
        || message.contains("could not resolve hostname")
        || message.contains("no such file or directory")
        || message.contains("identity file")
        || message.contains("keyfile")
        || message.contains("invalid format")
        || message.contains("unknown option")
}

fn is_timeout_error_text(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("timed out") || message.contains("timeout")
}

// ============================================================================
// Connection errors
// ============================================================================

/// Errors raised while establishing a remote session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Authentication, host trust, or local key configuration rejected.
    #[error("authentication failed for {destination}: {message}")]
    Auth {
        destination: String,
        message: String,
    },

    /// Establishment exceeded the connect timeout.
    #[error("connection to {destination} timed out after {timeout:?}")]
    Timeout {
        destination: String,
        timeout: Duration,
    },

    /// Transport-level failure: refused, reset, unreachable, or a
    /// protocol exchange that broke down mid-handshake.
    #[error("connection to {destination} failed: {message}")]
    Protocol {
        destination: String,
        message: String,
    },
}

impl ConnectError {
    /// Classify raw SSH error text into the taxonomy.
    pub fn classify(destination: &str, message: &str, connect_timeout: Duration) -> Self {
        if is_auth_error_text(message) {
            ConnectError::Auth {
                destination: destination.to_string(),
                message: message.to_string(),
            }
        } else if is_timeout_error_text(message) {
            ConnectError::Timeout {
                destination: destination.to_string(),
                timeout: connect_timeout,
            }
        } else {
            ConnectError::Protocol {
                destination: destination.to_string(),
                message: message.to_string(),
            }
        }
    }

    /// Whether a reconnect attempt could plausibly succeed. Auth and
    /// host trust rejections fail fast; the bounded retry ladder caps
    /// everything else.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectError::Auth { .. })
    }
}

// ============================================================================
// Execution errors
// ============================================================================

/// Errors raised while running a command on an established session.
///
/// These never tear the connection down by themselves. The execute path
/// folds them into an error-shaped [`CommandResult`] so a collection
/// cycle always yields a recordable outcome.
///
/// [`CommandResult`]: crate::types::CommandResult
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Command submitted while the connection was not established.
    #[error("not connected")]
    NotConnected,

    /// The command exceeded the execution timeout.
    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Spawning the remote process or reading its output failed.
    #[error("execution failed: {message}")]
    Transport { message: String },
}

// ============================================================================
// Rotation errors
// ============================================================================

/// Errors raised by the log rotation layer.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The named log file was never registered with the controller.
    #[error("unknown log file: {name}")]
    UnknownFile { name: String },

    /// A filesystem operation failed. The file's state is left
    /// untouched so the next write re-evaluates the limit and retries.
    #[error("{operation} failed for {name}: {source}")]
    Io {
        operation: &'static str,
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl RotationError {
    /// Wrap an I/O failure for the given operation and file.
    pub fn io(operation: &'static str, name: impl Into<String>, source: std::io::Error) -> Self {
        RotationError::Io {
            operation,
            name: name.into(),
            source,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_text_is_fail_fast() {
        assert!(is_auth_error_text("Permission denied (publickey)"));
        assert!(is_auth_error_text("Host key verification failed."));
        assert!(is_auth_error_text("ssh: Could not resolve hostname sw99"));
        assert!(!is_auth_error_text("Connection reset by peer"));
        assert!(!is_auth_error_text("kex_exchange_identification: closed"));
    }

    #[test]
    fn classify_auth() {
        let err = ConnectError::classify(
            "diag@sw03",
            "Permission denied (publickey,password)",
            Duration::from_secs(10),
        );
        assert!(matches!(err, ConnectError::Auth { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn classify_timeout() {
        let err = ConnectError::classify(
            "diag@sw03",
            "connect to host sw03 port 22: Connection timed out",
            Duration::from_secs(10),
        );
        assert!(matches!(err, ConnectError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn classify_protocol_default() {
        let err = ConnectError::classify(
            "diag@sw03",
            "Connection reset by peer",
            Duration::from_secs(10),
        );
        assert!(matches!(err, ConnectError::Protocol { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn connect_error_display_names_destination() {
        let err = ConnectError::classify("diag@sw03", "Connection refused", Duration::from_secs(10));
        assert!(err.to_string().contains("diag@sw03"));
    }

    #[test]
    fn execution_error_display() {
        let err = ExecutionError::Timeout {
            timeout: Duration::from_secs(300),
        };
        assert!(err.to_string().contains("timed out"));
        assert_eq!(ExecutionError::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn rotation_error_display_names_operation() {
        let err = RotationError::io(
            "rotate",
            "eth0.jsonl",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        );
        let text = err.to_string();
        assert!(text.contains("rotate"));
        assert!(text.contains("eth0.jsonl"));
    }
}
