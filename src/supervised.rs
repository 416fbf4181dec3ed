//! # Child-side agent.
//!
//! A binary started by a [`Runner`](crate::Runner) finds its supervisor through
//! [`SupervisionEnv`] and talks to it through [`Supervised`]:
//!
//! ```text
//!   supervised binary                           supervisor
//!   ─────────────────                           ──────────
//!   Supervised::connect(env) ─── connect ─────► Server
//!   report_ready(version)    ─── StartupSuccess ► handshake done
//!                            ◄── Heartbeat ───── (answered automatically)
//!                            ◄── Shutdown ────── graceful stop
//!   shutdown_token() fires   ─── ShutdownAck ──►
//! ```
//!
//! The shutdown token also fires when the supervisor goes away.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::SupervisionEnv;
use crate::error::TransportError;
use crate::ipc::{Client, Endpoint};
use crate::protocol::{Message, MessageType, Shutdown};

/// Connection from a supervised child to its supervisor.
pub struct Supervised {
    client: Arc<Client>,
    shutdown: CancellationToken,
    request: Arc<OnceLock<Shutdown>>,
    inbox: JoinHandle<()>,
}

impl Supervised {
    /// Connects to the supervisor named by `env`.
    pub async fn connect(env: &SupervisionEnv, timeout: Duration) -> Result<Self, TransportError> {
        Self::connect_endpoint(env.endpoint()?, timeout).await
    }

    /// Connects to an explicit endpoint.
    pub async fn connect_endpoint(
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let shutdown = CancellationToken::new();
        let on_gone = shutdown.clone();
        let client = Arc::new(
            Client::builder(endpoint)
                .connect_timeout(timeout)
                .on_disconnect(move || on_gone.cancel())
                .connect()
                .await?,
        );

        let request = Arc::new(OnceLock::new());
        let inbox = tokio::spawn(serve_inbox(
            Arc::clone(&client),
            shutdown.clone(),
            Arc::clone(&request),
        ));

        Ok(Self {
            client,
            shutdown,
            request,
            inbox,
        })
    }

    /// Confirms startup; completes the supervisor's handshake.
    pub async fn report_ready(&self, version: &str) -> Result<(), TransportError> {
        self.client
            .send(&Message::startup_success(version, std::process::id()))
            .await
    }

    /// Reports a startup failure. The supervisor still waits for the exit.
    pub async fn report_failed(&self, error: &str) -> Result<(), TransportError> {
        self.client.send(&Message::startup_failed(error)).await
    }

    /// Sends a liveness check; the supervisor answers with `HeartbeatAck`.
    pub async fn heartbeat(&self) -> Result<(), TransportError> {
        self.client.send(&Message::new(MessageType::Heartbeat)).await
    }

    /// Fires on `Shutdown` from the supervisor or on disconnect.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The `Shutdown` request, once one arrived.
    pub fn shutdown_request(&self) -> Option<&Shutdown> {
        self.request.get()
    }

    /// True while the supervisor connection is open.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.client.close().await;
    }
}

impl Drop for Supervised {
    fn drop(&mut self) {
        self.inbox.abort();
    }
}

async fn serve_inbox(
    client: Arc<Client>,
    shutdown: CancellationToken,
    request: Arc<OnceLock<Shutdown>>,
) {
    while let Some(msg) = client.receive().await {
        match msg.kind {
            MessageType::Heartbeat => {
                if let Err(e) = client.send(&Message::new(MessageType::HeartbeatAck)).await {
                    debug!(error = %e, "heartbeat ack failed");
                }
            }
            MessageType::Shutdown => {
                let req = msg.payload::<Shutdown>().unwrap_or_else(|e| {
                    warn!(error = %e, "malformed shutdown payload");
                    Shutdown {
                        reason: String::new(),
                        grace_period_seconds: 0,
                    }
                });
                info!(
                    reason = %req.reason,
                    grace_s = req.grace_period_seconds,
                    "supervisor requested shutdown"
                );
                let _ = request.set(req);
                if let Err(e) = client.send(&Message::new(MessageType::ShutdownAck)).await {
                    debug!(error = %e, "shutdown ack failed");
                }
                shutdown.cancel();
            }
            MessageType::HeartbeatAck => {}
            other => debug!(kind = ?other, "ignoring message from supervisor"),
        }
    }
    shutdown.cancel();
}
