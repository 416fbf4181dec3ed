//! # Event subscribers
//!
//! ```text
//! Runner / IPC handler ── publish ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                              │
//!                                      ┌───────────────────────┼─────────────┐
//!                                      ▼                       ▼             ▼
//!                                  LogWriter                Metrics        Custom
//! ```
//!
//! - [`Subscribe`] extension trait
//! - [`SubscriberSet`] per-subscriber queues with overflow and panic isolation
//! - [`LogWriter`] (feature `logging`) renders events through `tracing`

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
