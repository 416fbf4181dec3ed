//! # Startup handshake.
//!
//! After a spawn the runner waits for exactly one of:
//!
//! ```text
//!   StartupSuccess over IPC ──► Success
//!   child exit notification ──► Crashed   (StartupFailed text attached if one arrived)
//!   startup_timeout elapsed ──► TimedOut  (caller kills the child)
//!   runner token cancelled  ──► Cancelled
//! ```
//!
//! One timer covers the whole wait; `StartupFailed` does not end it, the
//! process exit does.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::child::{ChildExit, ChildProcess};

/// Handshake-relevant messages forwarded from the IPC handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HandshakeSignal {
    Ready { version: String, pid: u32 },
    Failed { error: String },
}

/// Result of [`await_handshake`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The child confirmed startup.
    Success { version: String, pid: u32 },
    /// The child exited first.
    Crashed {
        exit: ChildExit,
        reported: Option<String>,
    },
    /// Nothing happened within the timeout.
    TimedOut,
    /// The runner was cancelled while waiting.
    Cancelled,
}

/// Races the startup timeout against handshake signals, child exit and cancellation.
pub(crate) async fn await_handshake(
    signals: &mut mpsc::UnboundedReceiver<HandshakeSignal>,
    child: &mut ChildProcess,
    timeout: Duration,
    token: &CancellationToken,
) -> HandshakeOutcome {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut reported = None;
    let mut signals_open = true;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return HandshakeOutcome::Cancelled,
            sig = signals.recv(), if signals_open => match sig {
                Some(HandshakeSignal::Ready { version, pid }) => {
                    if child.pid().is_some_and(|p| p != pid) {
                        debug!(reported = pid, spawned = ?child.pid(), "startup reported by a different pid");
                    }
                    return HandshakeOutcome::Success { version, pid };
                }
                Some(HandshakeSignal::Failed { error }) => {
                    debug!(%error, "child reported startup failure");
                    reported = Some(error);
                }
                None => signals_open = false,
            },
            exit = child.wait() => return HandshakeOutcome::Crashed { exit, reported },
            _ = &mut deadline => return HandshakeOutcome::TimedOut,
        }
    }
}
