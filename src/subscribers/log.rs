//! # LogWriter: events rendered through `tracing`
//!
//! Turns each [`Event`] into one structured `tracing` record. Failures and
//! rollbacks log at `warn`, grace overruns and subscriber panics at `error`,
//! the rest at `info` (peer traffic at `debug`).
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  child spawned version="2.0" pid=4242 attempt=1
//! WARN  handshake timed out version="2.0" attempt=1 failures=1 timeout_ms=60000
//! INFO  backoff scheduled version="2.0" delay_ms=1000 failures=1
//! WARN  rollback performed version="1.0" abandoned="2.0"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let version = e.version.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ChildSpawned => info!(
                version,
                path = e.path.as_deref().unwrap_or("-"),
                pid = e.pid,
                attempt = e.attempt,
                "child spawned"
            ),
            EventKind::SpawnFailed => warn!(version, attempt = e.attempt, reason, "spawn failed"),
            EventKind::HandshakeSucceeded => {
                info!(version, pid = e.pid, attempt = e.attempt, "handshake succeeded")
            }
            EventKind::HandshakeCrashed => warn!(
                version,
                attempt = e.attempt,
                failures = e.failures,
                reason,
                "child crashed before confirming startup"
            ),
            EventKind::HandshakeTimedOut => warn!(
                version,
                attempt = e.attempt,
                failures = e.failures,
                timeout_ms = e.timeout_ms,
                "handshake timed out"
            ),
            EventKind::ChildExited => info!(version, status = reason, "child exited"),
            EventKind::BackoffScheduled => info!(
                version,
                delay_ms = e.delay_ms,
                failures = e.failures,
                "backoff scheduled"
            ),
            EventKind::RollbackPerformed => {
                warn!(version, abandoned = reason, "rollback performed")
            }
            EventKind::TargetReloaded => info!(
                version,
                path = e.path.as_deref().unwrap_or("-"),
                "target changed, restarting"
            ),
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::StoppedWithinGrace => info!(version, "child stopped within grace"),
            EventKind::GraceExceeded => {
                error!(version, grace_ms = e.timeout_ms, "grace exceeded, child killed")
            }
            EventKind::PeerConnected => debug!(peer = e.peer, "ipc peer connected"),
            EventKind::PeerDisconnected => debug!(peer = e.peer, "ipc peer disconnected"),
            EventKind::SubscriberOverflow => warn!(reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => error!(reason, "subscriber panicked"),
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
