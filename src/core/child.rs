//! # Owned handle to a spawned child process.
//!
//! A [`ChildProcess`] never touches the OS child directly. An exit-watcher task
//! owns the `tokio::process::Child` and reports the exit once through a oneshot:
//!
//! ```text
//!   ChildProcess ── kill_tx (oneshot) ──►  exit watcher ──► child.wait()
//!        ▲                                      │
//!        └───────── exit_rx (oneshot) ◄─────────┘  ChildExit
//! ```
//!
//! - The exit notification is created fresh for every spawn, observed at most
//!   once and cached afterwards, so [`ChildProcess::wait`] can be called from
//!   several select loops in sequence (handshake, supervising, grace).
//! - [`ChildProcess::kill`] sends at most one kill request per handle.
//! - Dropping the handle kills the child.

use std::fmt;
use std::io;
use std::process::ExitStatus;

use tokio::process::Child;
use tokio::sync::oneshot;
use tracing::debug;

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildExit {
    /// Exited with status zero.
    pub success: bool,
    /// Exit code, when the platform reports one (none when killed by a signal).
    pub code: Option<i32>,
    /// Human-readable status.
    pub description: String,
}

impl ChildExit {
    fn from_wait(res: io::Result<ExitStatus>) -> Self {
        match res {
            Ok(status) => Self {
                success: status.success(),
                code: status.code(),
                description: status.to_string(),
            },
            Err(e) => Self::unknown(format!("wait failed: {e}")),
        }
    }

    fn unknown(description: String) -> Self {
        Self {
            success: false,
            code: None,
            description,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Handle to a running (or exited) child.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Option<u32>,
    exit_rx: Option<oneshot::Receiver<ChildExit>>,
    exit: Option<ChildExit>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ChildProcess {
    /// Takes ownership of `child` and starts its exit watcher.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_child(mut child: Child) -> Self {
        let pid = child.id();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let res = tokio::select! {
                res = child.wait() => res,
                _ = &mut kill_rx => {
                    // explicit kill or handle dropped
                    if let Err(e) = child.start_kill() {
                        debug!(?pid, error = %e, "kill failed; child already gone");
                    }
                    child.wait().await
                }
            };
            let _ = exit_tx.send(ChildExit::from_wait(res));
        });

        Self {
            pid,
            exit_rx: Some(exit_rx),
            exit: None,
            kill_tx: Some(kill_tx),
        }
    }

    /// OS process id, if the child was running when the handle was created.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the child to exit. Cancel-safe; returns the cached exit once seen.
    pub async fn wait(&mut self) -> ChildExit {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }
        let exit = match self.exit_rx.as_mut() {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| ChildExit::unknown("exit watcher vanished".to_string())),
            None => ChildExit::unknown("exit watcher vanished".to_string()),
        };
        self.exit_rx = None;
        self.exit = Some(exit.clone());
        exit
    }

    /// Exit status if the child has already exited.
    pub fn try_exit(&mut self) -> Option<ChildExit> {
        if self.exit.is_none() {
            if let Some(rx) = self.exit_rx.as_mut() {
                match rx.try_recv() {
                    Ok(exit) => {
                        self.exit = Some(exit);
                        self.exit_rx = None;
                    }
                    Err(oneshot::error::TryRecvError::Empty) => {}
                    Err(oneshot::error::TryRecvError::Closed) => {
                        self.exit = Some(ChildExit::unknown("exit watcher vanished".to_string()));
                        self.exit_rx = None;
                    }
                }
            }
        }
        self.exit.clone()
    }

    /// True until the exit has been observed.
    pub fn is_running(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Requests a forced kill. Returns `false` when a kill was already requested
    /// or the child is known to have exited.
    pub fn kill(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.kill_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}
