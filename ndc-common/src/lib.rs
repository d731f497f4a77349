//! Shared building blocks for the network diagnostics collector.
//!
//! This crate carries everything both the daemon and its tooling need:
//! the data model ([`types`]), the error taxonomy ([`errors`]), the SSH
//! transport and its trait seam ([`ssh`]), the scriptable in-process
//! transport for tests ([`mock`]), and logging setup ([`logging`]).

#![forbid(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod mock;
pub mod ssh;
pub mod types;

// Re-export the common vocabulary so dependents can use `ndc_common::X`.
pub use errors::{is_auth_error_text, ConnectError, ExecutionError, RotationError};
pub use logging::{init_logging, LogConfig, LogFormat, LoggingGuards};
pub use mock::{MockBehavior, MockConnection, MockConnectionFactory, MockInvocation, Phase};
pub use ssh::{
    backoff_delay, Connection, ConnectionFactory, KnownHostsPolicy, SshConnection,
    SshConnectionFactory, SshOptions,
};
pub use types::{
    CommandResult, ConnectionState, FlapEvent, Host, Route, Sample, WorkerId, WorkerSpec,
    WorkerStatus,
};
