//! # Runner configuration.
//!
//! [`RunnerConfig`] holds the supervisor-side knobs that are not part of the
//! persisted state: shutdown grace, retry backoff, event bus sizing and OS
//! signal handling. Startup timeout and retry budget live in
//! [`State`](crate::State) because the supervised child may rewrite them.
//!
//! ## Sentinel values
//! - `grace = 0s` → no wait; the child is killed right after the shutdown broadcast
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use launchvisor::{BackoffPolicy, RunnerConfig};
//!
//! let mut cfg = RunnerConfig::default();
//! cfg.grace = Duration::from_secs(3);
//! cfg.backoff = BackoffPolicy::immediate();
//! cfg.handle_os_signals = false;
//!
//! assert_eq!(cfg.grace_period_seconds(), 3);
//! ```

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Supervisor-side configuration for a [`Runner`](crate::Runner).
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// How long a child gets to exit after `Shutdown` before it is killed.
    pub grace: Duration,

    /// Delay between failed attempts of the same target.
    pub backoff: BackoffPolicy,

    /// Capacity of the event bus ring buffer (min 1; clamped by the bus).
    ///
    /// Receivers lagging by more than this skip older events.
    pub bus_capacity: usize,

    /// Translate SIGINT/SIGTERM/SIGQUIT (Ctrl-C on Windows) into cancellation.
    ///
    /// Disable when embedding the runner in a process that owns signal handling
    /// and cancels through [`Runner::cancellation_token`](crate::Runner::cancellation_token).
    pub handle_os_signals: bool,

    /// `reason` sent in the `Shutdown` broadcast.
    pub shutdown_reason: String,
}

impl RunnerConfig {
    /// Grace window as whole seconds, the unit carried on the wire.
    #[inline]
    pub fn grace_period_seconds(&self) -> u64 {
        self.grace.as_secs()
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RunnerConfig {
    /// - `grace = 10s`
    /// - `backoff = BackoffPolicy::default()` (1s doubling up to 30s)
    /// - `bus_capacity = 1024`
    /// - `handle_os_signals = true`
    /// - `shutdown_reason = "supervisor shutdown"`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            bus_capacity: 1024,
            handle_os_signals: true,
            shutdown_reason: "supervisor shutdown".to_string(),
        }
    }
}
