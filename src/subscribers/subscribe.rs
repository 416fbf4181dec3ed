//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for observing the launcher runtime.
//! Each subscriber is driven by a dedicated worker loop fed by a bounded queue
//! owned by the [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching); they never block the runner
//!   loop nor other subscribers.
//! - Each subscriber declares its queue capacity via [`Subscribe::queue_capacity`].
//!   On overflow, events for that subscriber are dropped and a
//!   `SubscriberOverflow` event is published.
//!
//! ## Example
//! ```rust
//! use launchvisor::{Event, EventKind, Subscribe};
//!
//! struct Rollbacks;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for Rollbacks {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::RollbackPerformed {
//!             // page someone
//!         }
//!     }
//!     fn name(&self) -> &'static str { "rollbacks" }
//!     fn queue_capacity(&self) -> usize { 64 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
