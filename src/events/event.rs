//! # Runtime events emitted by the runner and its IPC server.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Child lifecycle**: spawn, handshake outcome, exit
//! - **Recovery**: backoff, rollback, hot-swap to a new target
//! - **Shutdown**: graceful stop and its outcome
//! - **Peers / subscribers**: IPC connections and subscriber health
//!
//! The [`Event`] struct carries the metadata relevant to each kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use launchvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::HandshakeTimedOut)
//!     .with_version("2.0")
//!     .with_attempt(2)
//!     .with_timeout(Duration::from_secs(60));
//!
//! assert_eq!(ev.kind, EventKind::HandshakeTimedOut);
//! assert_eq!(ev.version.as_deref(), Some("2.0"));
//! assert_eq!(ev.timeout_ms, Some(60_000));
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (subscriber name and panic message)
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason`
    SubscriberOverflow,

    // === Child lifecycle ===
    /// Child process started.
    ///
    /// Sets: `version`, `path`, `pid`, `attempt`
    ChildSpawned,

    /// The OS refused to start the child.
    ///
    /// Sets: `version`, `path`, `attempt`, `reason`
    SpawnFailed,

    /// Child confirmed startup.
    ///
    /// Sets: `version`, `pid`, `attempt`
    HandshakeSucceeded,

    /// Child exited before confirming startup.
    ///
    /// Sets: `version`, `attempt`, `failures`, `reason`
    HandshakeCrashed,

    /// Child did not confirm within the startup timeout and was killed.
    ///
    /// Sets: `version`, `attempt`, `failures`, `timeout_ms`
    HandshakeTimedOut,

    /// Supervised child exited after a successful handshake.
    ///
    /// Sets: `version`, `reason` (exit status)
    ChildExited,

    // === Recovery ===
    /// Next attempt scheduled after a failure.
    ///
    /// Sets: `version`, `attempt`, `delay_ms`, `failures`
    BackoffScheduled,

    /// Active and backup were swapped after the retry budget ran out.
    ///
    /// Sets: `version` (new active), `reason` (abandoned version)
    RollbackPerformed,

    /// State changed while the child ran; switching to the new target.
    ///
    /// Sets: `version` (new target), `path`
    TargetReloaded,

    // === Shutdown ===
    /// Cancellation observed (parent request or OS signal).
    ShutdownRequested,

    /// Child exited within the grace window after the shutdown broadcast.
    ///
    /// Sets: `version`
    StoppedWithinGrace,

    /// Grace window elapsed; the child was killed.
    ///
    /// Sets: `version`, `timeout_ms` (grace)
    GraceExceeded,

    // === Peers ===
    /// IPC peer connected.
    ///
    /// Sets: `peer`
    PeerConnected,

    /// IPC peer disconnected.
    ///
    /// Sets: `peer`
    PeerDisconnected,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Target version involved.
    pub version: Option<Arc<str>>,
    /// Target binary involved.
    pub path: Option<Arc<str>>,
    /// Child process id.
    pub pid: Option<u32>,
    /// Spawn attempt within the current runner (starting from 1).
    pub attempt: Option<u32>,
    /// Persisted consecutive failure count after this event.
    pub failures: Option<u32>,
    /// IPC connection id.
    pub peer: Option<u64>,
    /// Timeout or grace in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Backoff delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, exit status, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            version: None,
            path: None,
            pid: None,
            attempt: None,
            failures: None,
            peer: None,
            timeout_ms: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a version.
    #[inline]
    pub fn with_version(mut self, version: impl Into<Arc<str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attaches a binary path.
    #[inline]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string().into());
        self
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches the failure counter.
    #[inline]
    pub fn with_failures(mut self, n: u32) -> Self {
        self.failures = Some(n);
        self
    }

    /// Attaches an IPC connection id.
    #[inline]
    pub fn with_peer(mut self, id: u64) -> Self {
        self.peer = Some(id);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::ChildSpawned);
        let b = Event::new(EventKind::ChildExited);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn durations_saturate() {
        let ev = Event::new(EventKind::BackoffScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
