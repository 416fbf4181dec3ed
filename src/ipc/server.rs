//! # IPC server: accept loop, per-peer receive loops, broadcast.
//!
//! ## Architecture
//! ```text
//! Server::start(endpoint, handler)
//!   └─► accept loop ──► Connection #1 ──► receive loop ──► handler.on_message()
//!                   ──► Connection #2 ──► receive loop ──► handler.on_message()
//!                   ──► ...
//!
//! broadcast(msg) ──► send to every open connection (last error wins)
//! stop()         ──► cancel root token ─► accept loop exits, every connection closes
//! ```
//!
//! ## Rules
//! - a failure on one peer closes that peer only
//! - a failure of the listener is fatal and surfaces through [`Server::failed`]
//! - `stop()` is idempotent
//! - on Unix a stale socket file is removed before binding, unless a live
//!   server still answers on it

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::ipc::connection::{BoxedStream, Connection};
use crate::ipc::{Endpoint, MessageHandler};
use crate::protocol::Message;

type ConnectionMap = Arc<Mutex<HashMap<u64, Arc<Connection>>>>;

/// Listening side of the IPC channel.
pub struct Server {
    endpoint: Endpoint,
    connections: ConnectionMap,
    token: CancellationToken,
    failure: Arc<OnceLock<String>>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Binds `endpoint` and starts accepting connections.
    ///
    /// # Errors
    /// [`TransportError::Bind`] if the endpoint cannot be bound (including when
    /// another live server already owns it).
    pub async fn start(
        endpoint: Endpoint,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, TransportError> {
        let listener = Listener::bind(&endpoint)?;
        info!(endpoint = %endpoint, "ipc server listening");

        let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));
        let token = CancellationToken::new();
        let failure = Arc::new(OnceLock::new());

        let handle = tokio::spawn(accept_loop(
            listener,
            handler,
            Arc::clone(&connections),
            token.clone(),
            Arc::clone(&failure),
        ));

        Ok(Self {
            endpoint,
            connections,
            token,
            failure,
            accept: Mutex::new(Some(handle)),
        })
    }

    /// Endpoint this server is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of currently open peer connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Sends `msg` to every open connection.
    ///
    /// Best effort: every peer is attempted; the last error encountered is
    /// returned. Some peers may have received the message even on error.
    pub async fn broadcast(&self, msg: &Message) -> Result<(), TransportError> {
        let peers: Vec<Arc<Connection>> =
            self.connections.lock().await.values().cloned().collect();

        let mut last = None;
        for peer in peers {
            if let Err(e) = peer.send(msg).await {
                warn!(conn = peer.id(), error = %e, "broadcast to peer failed");
                last = Some(e);
            }
        }
        last.map_or(Ok(()), Err)
    }

    /// Resolves when the accept loop died with an error.
    ///
    /// Never resolves for a server that was stopped normally.
    pub async fn failed(&self) -> TransportError {
        self.token.cancelled().await;
        match self.failure.get() {
            Some(reason) => TransportError::ListenerFailed {
                reason: reason.clone(),
            },
            None => std::future::pending().await,
        }
    }

    /// Closes the listener and every connection. Idempotent.
    pub async fn stop(&self) {
        self.token.cancel();
        if let Some(handle) = self.accept.lock().await.take() {
            let _ = handle.await;
            debug!(endpoint = %self.endpoint, "ipc server stopped");
        }
        let peers: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .await
            .drain()
            .map(|(_, c)| c)
            .collect();
        for peer in peers {
            peer.close().await;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn accept_loop(
    mut listener: Listener,
    handler: Arc<dyn MessageHandler>,
    connections: ConnectionMap,
    token: CancellationToken,
    failure: Arc<OnceLock<String>>,
) {
    let next_id = AtomicU64::new(1);
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            res = listener.accept() => res,
        };
        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "ipc listener failed");
                let _ = failure.set(e.to_string());
                token.cancel();
                break;
            }
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let (conn, mut reader) = Connection::new(id, stream, &token);
        connections.lock().await.insert(id, Arc::clone(&conn));

        let handler = Arc::clone(&handler);
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            debug!(conn = id, "peer connected");
            handler.on_connect(&conn).await;
            while let Some(msg) = reader.next_message(&conn).await {
                handler.on_message(&conn, msg).await;
            }
            connections.lock().await.remove(&id);
            conn.close().await;
            handler.on_disconnect(&conn).await;
            debug!(conn = id, "peer disconnected");
        });
    }
}

#[cfg(unix)]
struct Listener {
    inner: tokio::net::UnixListener,
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl Listener {
    fn bind(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let path = endpoint.path().to_path_buf();
        let bind_err = |source: io::Error| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_err)?;
        }
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another server is listening",
                )));
            }
            std::fs::remove_file(&path).map_err(bind_err)?;
            debug!(path = %path.display(), "removed stale socket file");
        }

        let inner = tokio::net::UnixListener::bind(&path).map_err(bind_err)?;
        Ok(Self { inner, path })
    }

    async fn accept(&mut self) -> io::Result<BoxedStream> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(Box::new(stream))
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(windows)]
struct Listener {
    name: String,
    next: tokio::net::windows::named_pipe::NamedPipeServer,
}

#[cfg(windows)]
impl Listener {
    fn bind(endpoint: &Endpoint) -> Result<Self, TransportError> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let name = endpoint.pipe_name().to_string();
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&name)
            .map_err(|source| TransportError::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;
        Ok(Self { name, next })
    }

    async fn accept(&mut self) -> io::Result<BoxedStream> {
        use tokio::net::windows::named_pipe::ServerOptions;

        self.next.connect().await?;
        let fresh = ServerOptions::new().create(&self.name)?;
        let connected = std::mem::replace(&mut self.next, fresh);
        Ok(Box::new(connected))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ipc::Client;
    use crate::protocol::MessageType;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Recorder {
        tx: mpsc::UnboundedSender<(u64, Message)>,
        events: mpsc::UnboundedSender<&'static str>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, conn: &Arc<Connection>, msg: Message) {
            if msg.kind == MessageType::Heartbeat {
                let _ = conn.send(&Message::new(MessageType::HeartbeatAck)).await;
            }
            let _ = self.tx.send((conn.id(), msg));
        }
        async fn on_connect(&self, _conn: &Arc<Connection>) {
            let _ = self.events.send("connect");
        }
        async fn on_disconnect(&self, _conn: &Arc<Connection>) {
            let _ = self.events.send("disconnect");
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        endpoint: Endpoint,
        server: Server,
        rx: mpsc::UnboundedReceiver<(u64, Message)>,
        events: mpsc::UnboundedReceiver<&'static str>,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::in_dir(dir.path(), "test").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let (etx, events) = mpsc::unbounded_channel();
        let server = Server::start(endpoint.clone(), Arc::new(Recorder { tx, events: etx }))
            .await
            .unwrap();
        Harness {
            _dir: dir,
            endpoint,
            server,
            rx,
            events,
        }
    }

    const T: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn dispatches_and_broadcasts_to_many_peers() {
        let mut h = harness().await;
        let c1 = Client::connect(&h.endpoint, T).await.unwrap();
        let c2 = Client::connect(&h.endpoint, T).await.unwrap();

        c1.send(&Message::startup_success("2.0", 1)).await.unwrap();
        let (_, msg) = h.rx.recv().await.unwrap();
        assert_eq!(msg.kind, MessageType::StartupSuccess);

        for _ in 0..2 {
            assert_eq!(h.events.recv().await, Some("connect"));
        }
        assert_eq!(h.server.connection_count().await, 2);

        h.server.broadcast(&Message::shutdown("bye", 5)).await.unwrap();
        assert_eq!(c1.receive().await.unwrap().kind, MessageType::Shutdown);
        assert_eq!(c2.receive().await.unwrap().kind, MessageType::Shutdown);
    }

    #[tokio::test]
    async fn heartbeat_round_trip() {
        let h = harness().await;
        let c = Client::connect(&h.endpoint, T).await.unwrap();
        c.send(&Message::new(MessageType::Heartbeat)).await.unwrap();
        assert_eq!(c.receive().await.unwrap().kind, MessageType::HeartbeatAck);
    }

    #[tokio::test]
    async fn peer_reconnect_is_accepted() {
        let mut h = harness().await;
        let first = Client::connect(&h.endpoint, T).await.unwrap();
        first.close().await;
        drop(first);

        assert_eq!(h.events.recv().await, Some("connect"));
        assert_eq!(h.events.recv().await, Some("disconnect"));

        let second = Client::connect(&h.endpoint, T).await.unwrap();
        second.send(&Message::new(MessageType::UpdateRequest)).await.unwrap();
        let (_, msg) = h.rx.recv().await.unwrap();
        assert_eq!(msg.kind, MessageType::UpdateRequest);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_disconnects_peers() {
        let h = harness().await;
        let c = Client::connect(&h.endpoint, T).await.unwrap();
        h.server.stop().await;
        h.server.stop().await;

        assert!(c.receive().await.is_none());
        assert!(!h.endpoint.path().exists());
        assert!(Client::connect(&h.endpoint, T).await.is_err());
    }

    #[tokio::test]
    async fn refuses_to_steal_a_live_endpoint() {
        let h = harness().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let (etx, _erx) = mpsc::unbounded_channel();
        let second = Server::start(h.endpoint.clone(), Arc::new(Recorder { tx, events: etx })).await;
        assert!(matches!(second, Err(TransportError::Bind { .. })));
    }

    #[tokio::test]
    async fn broadcast_without_peers_is_ok() {
        let h = harness().await;
        h.server
            .broadcast(&Message::new(MessageType::Heartbeat))
            .await
            .unwrap();
    }
}
