//! # launchvisor
//!
//! **Launchvisor** lets a long-running service replace its own binary.
//!
//! The first binary started (the *entry binary*) reads a small state file.
//! When the state names a different version, the entry binary turns into a
//! supervisor: it starts the target as a child, waits for a startup
//! handshake over local IPC, retries with backoff, and rolls back to the
//! backup binary when the new version keeps failing. When the version
//! matches, [`launch`] tells the caller to run its business logic directly.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                     launcher-state.json
//!                             │ load / save
//!                             ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Runner (supervisor process)                                      │
//! │  - State (active / backup binary, failure_count)                  │
//! │  - Bus (broadcast events) ──► SubscriberSet ──► Subscribe impls   │
//! │  - Server (Unix socket / named pipe) ◄── RunnerHandler            │
//! └──────┬─────────────────────────────────────────────────▲──────────┘
//!        │ Spawn + SupervisionEnv                          │ StartupSuccess
//!        ▼                                                 │ StartupFailed
//! ┌──────────────────────────┐        Client ──────────────┘ Heartbeat
//! │  target binary (child)   │────────────── Supervised ◄─── Shutdown
//! └──────────────────────────┘
//! ```
//!
//! ### Bootstrap
//! ```text
//! main ──► launch(opts)
//!            ├─ supervised child?   ──► RunNormally { Some(env) } ──► Supervised::connect
//!            ├─ state says "me"     ──► RunNormally { None }
//!            └─ state says "other"  ──► Runner::run ──► Supervised
//! ```
//!
//! ## Features
//! | Area              | Description                                                | Key types / traits                          |
//! |-------------------|------------------------------------------------------------|---------------------------------------------|
//! | **Bootstrap**     | Decide between normal start and launcher mode.             | [`launch`], [`LaunchOptions`]               |
//! | **Supervision**   | Handshake, retry, rollback, hot-swap, graceful stop.       | [`Runner`], [`RunnerConfig`]                |
//! | **State**         | Persisted active/backup binary description.                | [`State`], [`check`]                        |
//! | **IPC**           | Length-prefixed JSON over a local socket.                  | [`ipc::Server`], [`ipc::Client`]            |
//! | **Child side**    | Report readiness and observe shutdown requests.            | [`Supervised`], [`SupervisionEnv`]          |
//! | **Subscriber API**| Hook into supervisor events.                               | [`Subscribe`], [`Event`]                    |
//! | **Policies**      | Retry delay between failed attempts.                       | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Errors**        | Typed errors per layer.                                    | [`LauncherError`], [`StateError`]           |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use launchvisor::{LaunchDecision, LaunchOptions, Supervised, launch};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opts = LaunchOptions::new("/var/lib/app", "1.9");
//!     match launch(opts).await? {
//!         LaunchDecision::Supervised => return Ok(()),
//!         LaunchDecision::RunNormally { supervision } => {
//!             let agent = match supervision {
//!                 Some(env) => Some(Supervised::connect(&env, Duration::from_secs(5)).await?),
//!                 None => None,
//!             };
//!             if let Some(agent) = &agent {
//!                 agent.report_ready("1.9").await?;
//!             }
//!             // business logic ...
//!         }
//!     }
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod launch;
mod policies;
mod state;
mod subscribers;
mod supervised;

pub mod ipc;
pub mod protocol;

// ---- Public re-exports ----

pub use config::RunnerConfig;
pub use core::{
    ChildExit, ChildProcess, CommandSpawner, DEFAULT_INSTANCE_ID, ENV_INSTANCE_ID, ENV_SUPERVISED,
    ENV_SUPERVISOR_EXE, ENV_SUPERVISOR_PID, EntryBinary, HandshakeOutcome, LaunchTarget, Runner,
    RunnerBuilder, Spawn, SupervisionEnv, wait_for_shutdown_signal,
};
pub use error::{EnvError, FailureKind, LauncherError, StateError, TransportError};
pub use events::{Bus, Event, EventKind};
pub use launch::{LaunchDecision, LaunchOptions, launch};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use state::{
    CheckResult, STATE_FILE_NAME, State, check, load, resolve_binary_path, save, state_path,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use supervised::Supervised;

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
