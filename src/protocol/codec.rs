//! # Framing for the IPC stream.
//!
//! ```text
//! +----------------------------+---------------------------------+
//! | Length (4 bytes, BE)       | JSON {"type": .., "payload": ..}|
//! +----------------------------+---------------------------------+
//! ```
//!
//! Framing and decoding are split: the stream is cut into frames by
//! [`LengthDelimitedCodec`], and each frame body is parsed separately. A body
//! that fails to parse is dropped without desynchronizing the stream.

use bytes::Bytes;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::TransportError;
use crate::protocol::Message;

/// Largest accepted frame body (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Builds the length-prefix codec used on both ends of a connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// Serializes a message into a frame body.
pub fn encode(msg: &Message) -> Result<Bytes, TransportError> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

/// Parses a frame body.
pub fn decode(frame: &[u8]) -> Result<Message, TransportError> {
    Ok(serde_json::from_slice(frame)?)
}
