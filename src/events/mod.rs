//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the runner control loop, the runner's IPC handler,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the runner's subscriber listener (fans out to
//!   `SubscriberSet`) and any receiver from `Runner::subscribe()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
