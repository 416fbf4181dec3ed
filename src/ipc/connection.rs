//! # Framed connection.
//!
//! A [`Connection`] owns one stream exclusively and exposes whole-message
//! `send`. The read half lives in a [`ConnectionReader`] driven by exactly one
//! receive loop (server per-peer task or client reader task).
//!
//! ## Rules
//! - `send` holds an async mutex for the whole frame; concurrent senders never
//!   interleave bytes
//! - a malformed frame body is logged and skipped; framing stays in sync
//! - closing cancels the connection token, which ends the receive loop and
//!   aborts any send stuck on a peer that stopped reading
//! - the final flush on close is bounded by [`CLOSE_FLUSH_TIMEOUT`]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::{Message, codec};

/// Upper bound on flushing buffered frames when a connection closes.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Byte stream usable as a connection transport.
pub(crate) trait IoStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> IoStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub(crate) type BoxedStream = Box<dyn IoStream>;

/// One end of an IPC link.
pub struct Connection {
    id: u64,
    writer: Mutex<FramedWrite<WriteHalf<BoxedStream>, LengthDelimitedCodec>>,
    closed: CancellationToken,
}

/// Read half of a [`Connection`].
pub(crate) struct ConnectionReader {
    id: u64,
    frames: FramedRead<ReadHalf<BoxedStream>, LengthDelimitedCodec>,
}

impl Connection {
    /// Wraps `stream`; the connection is closed when `parent` is cancelled.
    pub(crate) fn new(
        id: u64,
        stream: BoxedStream,
        parent: &CancellationToken,
    ) -> (Arc<Self>, ConnectionReader) {
        let (rd, wr) = tokio::io::split(stream);
        let conn = Arc::new(Self {
            id,
            writer: Mutex::new(FramedWrite::new(wr, codec::frame_codec())),
            closed: parent.child_token(),
        });
        let reader = ConnectionReader {
            id,
            frames: FramedRead::new(rd, codec::frame_codec()),
        };
        (conn, reader)
    }

    /// Identifier unique within the owning server or client.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sends one message.
    ///
    /// # Errors
    /// [`TransportError::Closed`] after [`close`](Self::close); I/O errors otherwise.
    pub async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let frame = codec::encode(msg)?;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            res = async {
                let mut writer = self.writer.lock().await;
                writer.send(frame).await
            } => res.map_err(TransportError::from),
        }
    }

    /// Closes the connection. Idempotent.
    ///
    /// Pending sends fail with [`TransportError::Closed`]; the final flush
    /// gives up after [`CLOSE_FLUSH_TIMEOUT`].
    pub async fn close(&self) {
        self.closed.cancel();
        let flush = async {
            let mut writer = self.writer.lock().await;
            SinkExt::<Bytes>::close(&mut *writer).await
        };
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = self.id, error = %e, "close after peer hangup"),
            Err(_) => debug!(conn = self.id, "peer not draining; dropped unflushed frames"),
        }
    }

    /// True once closed locally or by the owning server.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.closed
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionReader {
    /// Next decoded message, or `None` once the peer hung up, the stream
    /// failed, or `conn` was closed.
    pub(crate) async fn next_message(&mut self, conn: &Connection) -> Option<Message> {
        loop {
            let frame = tokio::select! {
                _ = conn.close_token().cancelled() => return None,
                frame = self.frames.next() => frame,
            };
            match frame {
                None => return None,
                Some(Err(e)) => {
                    debug!(conn = self.id, error = %e, "receive failed");
                    return None;
                }
                Some(Ok(body)) => match codec::decode(&body) {
                    Ok(msg) => return Some(msg),
                    Err(e) => {
                        warn!(conn = self.id, error = %e, "dropping malformed frame");
                    }
                },
            }
        }
    }
}
