//! Retry timing.
//!
//! - [`BackoffPolicy`] delay between consecutive failed launches of one target
//! - [`JitterPolicy`] randomization on top of that delay
//!
//! Whether to retry at all is decided by the persisted `max_retries` and the
//! presence of a backup, not by these policies.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
