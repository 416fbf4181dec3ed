//! Wire protocol between the supervisor and its child.
//!
//! ## Contents
//! - [`MessageType`], [`Message`] the envelope
//! - [`StartupSuccess`], [`StartupFailed`], [`Shutdown`] typed payloads
//! - [`codec`] framing (length prefix + JSON body)
//!
//! ## Conversation
//! ```text
//! child                                supervisor
//!   │ ── StartupSuccess{version,pid} ──► │   handshake complete
//!   │ ── StartupFailed{error} ─────────► │   recorded, exit decides
//!   │ ◄─ Heartbeat ───────────────────── │
//!   │ ── HeartbeatAck ─────────────────► │
//!   │ ◄─ Shutdown{reason,grace} ──────── │
//!   │ ── ShutdownAck ──────────────────► │   exit ends the wait
//! ```
//!
//! Delivery is fire-and-forget. There are no correlation ids.

pub mod codec;
mod message;

pub use message::{Message, MessageType, Shutdown, StartupFailed, StartupSuccess};
