//! Error types used by the launcher runtime.
//!
//! This module defines the error enums raised across the crate:
//!
//! - [`StateError`]: reading or writing the persisted launcher state.
//! - [`TransportError`]: IPC socket failures (bind, connect, framing).
//! - [`EnvError`]: malformed supervision environment seen by a child.
//! - [`LauncherError`]: errors that end [`launch`](crate::launch) or [`Runner::run`](crate::Runner::run).
//!
//! All of them provide `as_label` for logs. [`LauncherError`] additionally
//! carries a [`FailureKind`] when the retry budget is exhausted so an operator
//! can tell "never started" apart from "crashed repeatedly".

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the state store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StateError {
    /// The state file does not exist.
    #[error("state file {path} not found")]
    NotFound {
        /// Path that was read.
        path: PathBuf,
    },

    /// The state file exists but does not parse as a launcher state.
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Any other filesystem failure.
    #[error("state file {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl StateError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StateError::NotFound { .. } => "state_not_found",
            StateError::Corrupt { .. } => "state_corrupt",
            StateError::Io { .. } => "state_io",
        }
    }

    /// True for [`StateError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound { .. })
    }
}

/// # Errors produced by the IPC transport.
///
/// Errors on a single peer connection stay local to it; only
/// [`TransportError::Bind`] and [`TransportError::ListenerFailed`] are fatal
/// for a server.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// Instance identifier cannot be used in an endpoint name.
    #[error("invalid instance identifier {id:?}")]
    InvalidInstance {
        /// Rejected identifier.
        id: String,
    },

    /// Listener could not be created.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// Endpoint display name.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Connecting to a server failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint display name.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// No server accepted the connection in time.
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Endpoint display name.
        endpoint: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// Read or write failure on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,

    /// The accept loop died; the server no longer takes connections.
    #[error("listener failed: {reason}")]
    ListenerFailed {
        /// Rendered cause.
        reason: String,
    },
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::InvalidInstance { .. } => "transport_invalid_instance",
            TransportError::Bind { .. } => "transport_bind",
            TransportError::Connect { .. } => "transport_connect",
            TransportError::ConnectTimeout { .. } => "transport_connect_timeout",
            TransportError::Io(_) => "transport_io",
            TransportError::Codec(_) => "transport_codec",
            TransportError::Closed => "transport_closed",
            TransportError::ListenerFailed { .. } => "transport_listener_failed",
        }
    }
}

/// # Errors raised while reading the supervision environment.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvError {
    /// The supervision marker is set but a companion variable is absent.
    #[error("supervised process is missing environment variable {var}")]
    Missing {
        /// Variable name.
        var: &'static str,
    },

    /// A variable is present but unusable.
    #[error("environment variable {var} has invalid value {value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

impl EnvError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EnvError::Missing { .. } => "env_missing",
            EnvError::Invalid { .. } => "env_invalid",
        }
    }
}

/// Classification of the last failed start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The OS refused to execute the target binary.
    NeverStarted {
        /// Rendered spawn error.
        error: String,
    },
    /// The child ran but never confirmed startup within the timeout.
    TimedOut {
        /// The startup timeout that elapsed.
        timeout: Duration,
    },
    /// The child exited before confirming startup.
    Crashed {
        /// Exit status as reported by the OS, if known.
        status: Option<String>,
        /// Error the child reported over IPC before exiting, if any.
        reported: Option<String>,
    },
}

impl FailureKind {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureKind::NeverStarted { .. } => "startup_error",
            FailureKind::TimedOut { .. } => "handshake_timeout",
            FailureKind::Crashed { .. } => "handshake_crash",
        }
    }

    /// Human-readable summary of what happened to the target.
    pub fn describe(&self) -> String {
        match self {
            FailureKind::NeverStarted { error } => format!("never started: {error}"),
            FailureKind::TimedOut { timeout } => {
                format!("never confirmed startup within {timeout:?}")
            }
            FailureKind::Crashed { status, reported } => {
                let mut msg = String::from("crashed before confirming startup");
                if let Some(s) = status {
                    msg.push_str(&format!(" ({s})"));
                }
                if let Some(r) = reported {
                    msg.push_str(&format!(": {r}"));
                }
                msg
            }
        }
    }
}

/// # Errors that terminate the supervisor loop.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LauncherError {
    /// A binary could not be located.
    #[error("failed to start {path}: {source}")]
    Startup {
        /// Binary involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Persisted state could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),

    /// The IPC server failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The supervision environment is partial or malformed.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// The retry budget is exhausted and there is nothing to roll back to.
    #[error(
        "update target {version} {} after {attempts} attempt(s); {detail}",
        last.describe()
    )]
    RollbackUnavailable {
        /// Version that kept failing.
        version: String,
        /// Consecutive failures recorded.
        attempts: u32,
        /// The final failure.
        last: FailureKind,
        /// Why no rollback happened: none configured, or the backup is unusable.
        detail: String,
    },
}

impl LauncherError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            LauncherError::Startup { .. } => "launcher_startup",
            LauncherError::State(e) => e.as_label(),
            LauncherError::Transport(e) => e.as_label(),
            LauncherError::Env(e) => e.as_label(),
            LauncherError::RollbackUnavailable { .. } => "rollback_unavailable",
        }
    }

    /// True when the error means retries ran out with no backup to fall back to.
    pub fn is_rollback_unavailable(&self) -> bool {
        matches!(self, LauncherError::RollbackUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_unavailable_message_names_the_failure() {
        let never = LauncherError::RollbackUnavailable {
            version: "2.0".into(),
            attempts: 3,
            last: FailureKind::NeverStarted {
                error: "permission denied".into(),
            },
            detail: "no rollback configured (backup_binary_path is empty)".into(),
        };
        let crashed = LauncherError::RollbackUnavailable {
            version: "2.0".into(),
            attempts: 3,
            last: FailureKind::Crashed {
                status: Some("exit status: 1".into()),
                reported: None,
            },
            detail: "backup unusable: /opt/v1/app does not exist".into(),
        };

        let never = never.to_string();
        let crashed = crashed.to_string();
        assert!(never.contains("never started"), "{never}");
        assert!(crashed.contains("crashed before confirming"), "{crashed}");
        assert!(never.contains("no rollback configured"));
        assert!(crashed.contains("after 3 attempt(s)"));
        assert!(crashed.contains("backup unusable"), "{crashed}");
        assert!(!crashed.contains("no rollback configured"));
    }

    #[test]
    fn labels_are_stable() {
        let err = LauncherError::State(StateError::NotFound {
            path: PathBuf::from("x"),
        });
        assert_eq!(err.as_label(), "state_not_found");
        assert_eq!(
            FailureKind::TimedOut {
                timeout: Duration::from_secs(1)
            }
            .as_label(),
            "handshake_timeout"
        );
    }
}
