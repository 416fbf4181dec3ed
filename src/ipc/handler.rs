//! # Server-side message handler.
//!
//! [`MessageHandler`] is the single dispatch target shared by every peer
//! connection of a [`Server`](crate::ipc::Server). Each connection runs its own
//! receive loop; the handler is called from those loops concurrently.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ipc::Connection;
use crate::protocol::Message;

/// Contract for consumers of server-side messages.
///
/// Implementations must not block the async runtime. Long work belongs in a
/// separate task fed by a channel.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one decoded message from `conn`.
    async fn on_message(&self, conn: &Arc<Connection>, msg: Message);

    /// A peer connected.
    async fn on_connect(&self, _conn: &Arc<Connection>) {}

    /// A peer disconnected (hangup, I/O error, or server stop).
    async fn on_disconnect(&self, _conn: &Arc<Connection>) {}
}
