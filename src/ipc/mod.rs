//! Local IPC transport between a supervisor and its children.
//!
//! ## Contents
//! - [`Endpoint`] per-instance socket / pipe naming
//! - [`Connection`] framed, send-serialized stream
//! - [`Server`] accept loop, per-peer receive loops, broadcast
//! - [`Client`] single connection with a reader task
//! - [`MessageHandler`] server-side dispatch target
//!
//! Unix uses domain sockets, Windows uses named pipes; both sit behind the same
//! `Server` / `Client` API.

mod client;
mod connection;
mod endpoint;
mod handler;
mod server;

pub use client::{Client, ClientBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use connection::{CLOSE_FLUSH_TIMEOUT, Connection};
pub use endpoint::Endpoint;
pub use handler::MessageHandler;
pub use server::Server;
