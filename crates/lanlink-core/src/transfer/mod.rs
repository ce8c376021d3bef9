//! File transfer engine for LanLink.
//!
//! A transfer starts with a [`FileTransferRequest`] from the sender and a
//! [`FileTransferResponse`] from the receiver. Once accepted, each side runs a
//! [`FileTransferSession`]; the sender streams fixed-size blocks as `FileData`
//! messages and the receiver writes them to disk in index order.
//!
//! The [`FileTransferManager`] owns all sessions on one node, applies the
//! contact policy to incoming requests and records finished transfers.
//!
//! ## Transfer Flow
//!
//! ```text
//! Sender                                    Receiver
//!   │                                         │
//!   │─────── FileTransferRequest ────────────▶│  blacklist: auto-reject
//!   │                                         │  whitelist: auto-accept
//!   │◀────── FileTransferResponse ────────────│  otherwise: ask the user
//!   │        (accepted, sessionId)            │
//!   │                                         │
//!   │─────── FileData (block 0) ─────────────▶│
//!   │             ... 10 ms apart ...         │
//!   │─────── FileData (block N) ─────────────▶│
//!   │                                         │
//! ```

mod manager;
mod request;
mod session;

pub use manager::{FileTransferManager, TransferEvent};
pub use request::{FileTransferRequest, FileTransferResponse};
pub use session::FileTransferSession;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TransferConfig;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Created, not yet started
    Pending,
    /// Moving blocks
    Transferring,
    /// Halted by the user; blocks are buffered, not written
    Paused,
    /// All bytes moved
    Completed,
    /// Stopped by an I/O error
    Failed,
    /// Stopped by the user
    Cancelled,
}

impl TransferStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Paused => write!(f, "Paused"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Which side of a transfer a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Reading a local file and sending it
    Send,
    /// Receiving and writing a file
    Receive,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "Sent"),
            Self::Receive => write!(f, "Received"),
        }
    }
}

/// What a session wants from its owner after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum NextStep {
    /// Nothing to do until the next external input
    Idle,
    /// Call `pump` again after the delay
    PumpAfter(Duration),
}

/// Tuning for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Size of one block in bytes
    pub block_size: usize,
    /// Delay between outbound blocks
    pub send_interval: Duration,
    /// Cap on blocks buffered ahead of the next one to write
    pub max_buffered_blocks: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            block_size: crate::DEFAULT_BLOCK_SIZE,
            send_interval: crate::DEFAULT_SEND_INTERVAL,
            max_buffered_blocks: crate::MAX_BUFFERED_BLOCKS,
        }
    }
}

impl From<&TransferConfig> for SessionOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            block_size: config.block_size.max(1),
            send_interval: config.send_interval,
            max_buffered_blocks: crate::MAX_BUFFERED_BLOCKS,
        }
    }
}

/// Events posted by a session to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A block to transmit (sender only)
    DataBlock {
        /// Session id
        session_id: Uuid,
        /// Block index
        block_index: u64,
        /// Block bytes
        data: Vec<u8>,
    },
    /// Bytes moved so far
    Progress {
        /// Session id
        session_id: Uuid,
        /// Bytes read or written
        bytes_transferred: u64,
        /// Total file size
        total_bytes: u64,
    },
    /// Status transition
    StatusChanged {
        /// Session id
        session_id: Uuid,
        /// New status
        status: TransferStatus,
    },
    /// I/O failure; always followed by `Completed { success: false }`
    Error {
        /// Session id
        session_id: Uuid,
        /// Error description
        message: String,
    },
    /// Terminal signal
    Completed {
        /// Session id
        session_id: Uuid,
        /// Whether every byte was moved
        success: bool,
    },
}

/// Format a byte count as a human-readable size.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Transferring.is_terminal());
        assert!(!TransferStatus::Paused.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_session_options_from_config() {
        let config = TransferConfig {
            block_size: 0,
            send_interval: Duration::from_millis(3),
        };
        let options = SessionOptions::from(&config);
        assert_eq!(options.block_size, 1);
        assert_eq!(options.send_interval, Duration::from_millis(3));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(8192), "8.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024 / 2), "1.5 MB");
    }
}
