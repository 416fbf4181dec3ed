//! # Message envelope and payloads.
//!
//! A [`Message`] is a closed [`MessageType`] tag plus an opaque JSON payload.
//! Typed payloads are extracted on demand with [`Message::payload`].
//!
//! ## Example
//! ```rust
//! use launchvisor::protocol::{Message, MessageType, StartupSuccess};
//!
//! let msg = Message::startup_success("2.0", 4242);
//! assert_eq!(msg.kind, MessageType::StartupSuccess);
//!
//! let body: StartupSuccess = msg.payload().unwrap();
//! assert_eq!(body.version, "2.0");
//! assert_eq!(body.pid, 4242);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Closed set of message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Child confirms it started (completes the handshake).
    StartupSuccess,
    /// Child reports it could not start.
    StartupFailed,
    /// Supervisor asks the child to stop.
    Shutdown,
    /// Child acknowledges a shutdown request.
    ShutdownAck,
    /// Liveness check; the receiver answers with [`MessageType::HeartbeatAck`].
    Heartbeat,
    /// Answer to [`MessageType::Heartbeat`].
    HeartbeatAck,
    /// Deprecated; accepted and ignored.
    UpdateRequest,
}

/// Payload of [`MessageType::StartupSuccess`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupSuccess {
    /// Version the child is running.
    pub version: String,
    /// OS process id of the child.
    pub pid: u32,
}

/// Payload of [`MessageType::StartupFailed`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupFailed {
    /// Why start-up failed.
    pub error: String,
}

/// Payload of [`MessageType::Shutdown`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {
    /// Why the supervisor is stopping.
    pub reason: String,
    /// How long the child has before it is killed.
    pub grace_period_seconds: u64,
}

/// Wire envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Kind-specific body (`null` for bodiless kinds).
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    /// Creates a message without a body.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            payload: Value::Null,
        }
    }

    /// Builds a [`MessageType::StartupSuccess`] message.
    pub fn startup_success(version: impl Into<String>, pid: u32) -> Self {
        Self {
            kind: MessageType::StartupSuccess,
            payload: serde_json::json!({ "version": version.into(), "pid": pid }),
        }
    }

    /// Builds a [`MessageType::StartupFailed`] message.
    pub fn startup_failed(error: impl Into<String>) -> Self {
        Self {
            kind: MessageType::StartupFailed,
            payload: serde_json::json!({ "error": error.into() }),
        }
    }

    /// Builds a [`MessageType::Shutdown`] message.
    pub fn shutdown(reason: impl Into<String>, grace_period_seconds: u64) -> Self {
        Self {
            kind: MessageType::Shutdown,
            payload: serde_json::json!({
                "reason": reason.into(),
                "grace_period_seconds": grace_period_seconds,
            }),
        }
    }

    /// Decodes the payload into `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(T::deserialize(&self.payload)?)
    }
}
