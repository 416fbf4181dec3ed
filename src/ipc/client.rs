//! # IPC client.
//!
//! A [`Client`] holds exactly one [`Connection`] to a server. Incoming messages
//! are queued by a reader task and handed out by [`Client::receive`].
//!
//! Connecting is bounded by a timeout and fails fast when nobody listens;
//! reconnecting is the caller's business.
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use launchvisor::ipc::{Client, Endpoint};
//! use launchvisor::protocol::Message;
//!
//! # async fn demo() -> Result<(), launchvisor::TransportError> {
//! let endpoint = Endpoint::for_instance("main")?;
//! let client = Client::builder(endpoint)
//!     .connect_timeout(Duration::from_secs(2))
//!     .on_disconnect(|| eprintln!("supervisor went away"))
//!     .connect()
//!     .await?;
//! client.send(&Message::startup_success("2.0", std::process::id())).await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;
use crate::ipc::Endpoint;
use crate::ipc::connection::{BoxedStream, Connection};
use crate::protocol::Message;

/// Default bound for [`ClientBuilder::connect`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type DisconnectHook = Box<dyn FnOnce() + Send + 'static>;

/// Configures and opens a [`Client`].
pub struct ClientBuilder {
    endpoint: Endpoint,
    connect_timeout: Duration,
    on_disconnect: Option<DisconnectHook>,
}

impl ClientBuilder {
    /// Bound on the connect attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Called once when the connection ends for any reason.
    pub fn on_disconnect(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    /// Connects and starts the reader task.
    pub async fn connect(self) -> Result<Client, TransportError> {
        let stream = match tokio::time::timeout(self.connect_timeout, dial(&self.endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    endpoint: self.endpoint.to_string(),
                    source,
                });
            }
            Err(_elapsed) => {
                return Err(TransportError::ConnectTimeout {
                    endpoint: self.endpoint.to_string(),
                    timeout: self.connect_timeout,
                });
            }
        };

        let root = CancellationToken::new();
        let (conn, mut reader) = Connection::new(0, stream, &root);
        let (tx, rx) = mpsc::unbounded_channel();

        let task_conn = Arc::clone(&conn);
        let hook = self.on_disconnect;
        tokio::spawn(async move {
            while let Some(msg) = reader.next_message(&task_conn).await {
                if tx.send(msg).is_err() {
                    break;
                }
            }
            task_conn.close().await;
            debug!("ipc client disconnected");
            if let Some(hook) = hook {
                hook();
            }
        });

        Ok(Client {
            conn,
            inbox: Mutex::new(rx),
        })
    }
}

/// Connecting side of the IPC channel.
pub struct Client {
    conn: Arc<Connection>,
    inbox: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl Client {
    /// Starts configuring a client for `endpoint`.
    pub fn builder(endpoint: Endpoint) -> ClientBuilder {
        ClientBuilder {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            on_disconnect: None,
        }
    }

    /// Connects with default options and the given timeout.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, TransportError> {
        Self::builder(endpoint.clone())
            .connect_timeout(timeout)
            .connect()
            .await
    }

    /// Sends one message.
    pub async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        self.conn.send(msg).await
    }

    /// Waits for the next message; `None` once disconnected and drained.
    pub async fn receive(&self) -> Option<Message> {
        self.inbox.lock().await.recv().await
    }

    /// True until the connection ends.
    pub fn is_connected(&self) -> bool {
        !self.conn.is_closed()
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        self.conn.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("conn", &self.conn.id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.conn.close_token().cancel();
    }
}

#[cfg(unix)]
async fn dial(endpoint: &Endpoint) -> io::Result<BoxedStream> {
    let stream = tokio::net::UnixStream::connect(endpoint.path()).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
async fn dial(endpoint: &Endpoint) -> io::Result<BoxedStream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;
    loop {
        match ClientOptions::new().open(endpoint.pipe_name()) {
            Ok(client) => return Ok(Box::new(client)),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
