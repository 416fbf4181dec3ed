//! Runtime core: the supervisor loop and everything it drives.
//!
//! - [`runner`]: control loop, retry/rollback, hot-swap, graceful stop;
//! - [`handshake`]: bounded wait for the child's startup confirmation;
//! - [`child`]: owned child handle with a single-use exit notification;
//! - [`spawn`]: the `Spawn` seam and the default `CommandSpawner`;
//! - [`env`]: supervision environment handed to the child;
//! - [`shutdown`]: OS termination signals.

mod child;
mod env;
mod handshake;
mod runner;
mod shutdown;
mod spawn;

pub use child::{ChildExit, ChildProcess};
pub use env::{
    ENV_INSTANCE_ID, ENV_SUPERVISED, ENV_SUPERVISOR_EXE, ENV_SUPERVISOR_PID, SupervisionEnv,
};
pub use handshake::HandshakeOutcome;
pub use runner::{DEFAULT_INSTANCE_ID, EntryBinary, Runner, RunnerBuilder};
pub use shutdown::wait_for_shutdown_signal;
pub use spawn::{CommandSpawner, LaunchTarget, Spawn};
