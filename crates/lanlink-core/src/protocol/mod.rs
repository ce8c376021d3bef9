//! LanLink wire protocol implementation.
//!
//! Messages travel over TCP as length-prefixed JSON envelopes.
//!
//! ## Frame Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     LanLink Frame                       │
//! ├──────────────┬──────────────┬───────────────────────────┤
//! │    Magic     │   Version    │       Content Size        │
//! │   4 bytes    │   4 bytes    │         4 bytes           │
//! ├──────────────┴──────────────┴───────────────────────────┤
//! │                 Content (JSON envelope)                 │
//! │                  (content size bytes)                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! - Magic: `0x4C4E4150` ("LANP"), big-endian
//! - Version: `1`, big-endian
//! - Content size: envelope length in bytes, big-endian
//!
//! ## Envelope
//!
//! ```json
//! {
//!   "type": 1,
//!   "messageId": "uuid",
//!   "senderId": "uuid",
//!   "timestamp": "2024-05-01T12:00:00.000000Z",
//!   "content": { "receiverId": "uuid", "text": "hi" }
//! }
//! ```
//!
//! A frame that fails validation decodes to [`NetworkMessage::invalid`]
//! instead of an error; a stream whose buffered header has the wrong magic or
//! version is discarded entirely by [`FrameBuffer`].

mod message;

pub use message::{
    ChatPayload, Content, FileDataPayload, IdentityPayload, MessageType, NetworkMessage,
    UserStatusPayload,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::{PROTOCOL_MAGIC, PROTOCOL_VERSION};

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Maximum content size (16 MB)
pub const MAX_CONTENT_SIZE: usize = 16 * 1024 * 1024;

/// A protocol frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol magic
    pub magic: u32,
    /// Protocol version
    pub version: u32,
    /// Length of the content that follows
    pub content_size: u32,
}

impl MessageHeader {
    /// Header for content of the given length.
    #[must_use]
    pub const fn new(content_size: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            content_size,
        }
    }

    /// Encode the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..8].copy_from_slice(&self.version.to_be_bytes());
        buf[8..12].copy_from_slice(&self.content_size.to_be_bytes());
        buf
    }

    /// Read a header from the front of `buf` without validating it.
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
    #[must_use]
    pub fn peek(buf: &[u8]) -> Option<Self> {
        let word = |at: usize| -> Option<u32> {
            buf.get(at..at + 4)
                .and_then(|b| b.try_into().ok())
                .map(u32::from_be_bytes)
        };

        Some(Self {
            magic: word(0)?,
            version: word(4)?,
            content_size: word(8)?,
        })
    }

    /// Check magic, version and size limits.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first check that failed.
    pub fn validate(&self) -> Result<()> {
        if self.magic != PROTOCOL_MAGIC {
            return Err(Error::InvalidMagic(self.magic));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        if self.content_size as usize > MAX_CONTENT_SIZE {
            return Err(Error::ProtocolError(format!(
                "content too large: {} bytes",
                self.content_size
            )));
        }
        Ok(())
    }

    /// Total length of the frame this header announces.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        HEADER_SIZE + self.content_size as usize
    }
}

/// JSON envelope as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    message_type: MessageType,
    message_id: Uuid,
    sender_id: Uuid,
    timestamp: DateTime<Utc>,
    content: serde_json::Value,
}

/// Encode a message as one complete frame.
///
/// # Errors
///
/// Returns an error if the content cannot be serialized or is too large.
pub fn serialize(message: &NetworkMessage) -> Result<Vec<u8>> {
    let envelope = Envelope {
        message_type: message.message_type(),
        message_id: message.message_id(),
        sender_id: message.sender_id(),
        timestamp: message.timestamp(),
        content: message.content().to_value()?,
    };

    let content = serde_json::to_vec(&envelope)?;
    if content.len() > MAX_CONTENT_SIZE {
        return Err(Error::ProtocolError(format!(
            "content too large: {} bytes",
            content.len()
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let header = MessageHeader::new(content.len() as u32);

    let mut frame = Vec::with_capacity(HEADER_SIZE + content.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&content);
    Ok(frame)
}

/// Decode exactly one complete frame, reporting why it is invalid.
///
/// # Errors
///
/// Returns an error if the header is missing or invalid, the content is
/// truncated, or the envelope does not match its declared type.
pub fn try_deserialize(bytes: &[u8]) -> Result<NetworkMessage> {
    let header = MessageHeader::peek(bytes)
        .ok_or_else(|| Error::ProtocolError(format!("frame too short: {} bytes", bytes.len())))?;
    header.validate()?;

    let content = bytes
        .get(HEADER_SIZE..header.frame_len())
        .ok_or_else(|| Error::ProtocolError("truncated frame content".to_string()))?;

    let envelope: Envelope = serde_json::from_slice(content)?;
    let content = Content::from_value(envelope.message_type, envelope.content)?;

    Ok(NetworkMessage::from_parts(
        envelope.message_id,
        envelope.sender_id,
        envelope.timestamp,
        content,
    ))
}

/// Decode exactly one complete frame.
///
/// Invalid frames yield [`NetworkMessage::invalid`], which callers ignore.
#[must_use]
pub fn deserialize(bytes: &[u8]) -> NetworkMessage {
    try_deserialize(bytes).unwrap_or_else(|e| {
        tracing::debug!("Dropping invalid frame: {}", e);
        NetworkMessage::invalid()
    })
}

/// Serialize a message and write it to a stream.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub async fn write_message<W>(writer: &mut W, message: &NetworkMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = serialize(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Incremental reassembly of frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and drain every complete frame, in order.
    ///
    /// A partial frame stays buffered until more bytes arrive. A header with
    /// bad magic, version or size discards the whole buffer.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<NetworkMessage> {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        while let Some(header) = MessageHeader::peek(&self.buffer) {
            if let Err(e) = header.validate() {
                tracing::debug!(
                    discarded = self.buffer.len(),
                    "Clearing receive buffer: {}",
                    e
                );
                self.buffer.clear();
                break;
            }

            let frame_len = header.frame_len();
            if self.buffer.len() < frame_len {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
            messages.push(deserialize(&frame));
        }

        messages
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
