//! Persisted launcher state and the start-up decision built on it.
//!
//! ## Contents
//! - [`State`], [`load`], [`save`] the durable JSON record (`launcher-state.json`)
//! - [`check`], [`CheckResult`] decides normal start vs. launcher mode
//!
//! ## Quick wiring
//! ```text
//! process start ──► check(app_data, version, exe)
//!                     ├─ should_be_launcher = false ──► run business logic
//!                     └─ should_be_launcher = true  ──► Runner::builder(..).build().run()
//! ```
//!
//! The store performs no locking; the runner's control loop is the only writer
//! inside the supervisor, and the supervised child writes only to request a new
//! target.

mod checker;
mod store;

pub use checker::{CheckResult, check, resolve_binary_path};
pub use store::{STATE_FILE_NAME, State, load, save, state_path};
