//! Error types for LanLink.
//!
//! Frame-level protocol problems and unknown ids are handled where they occur
//! and never reach callers; this type covers the failures that do.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use uuid::Uuid;

/// A specialized `Result` type for LanLink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for LanLink.
#[derive(Error, Debug)]
pub enum Error {
    /// Unable to bind a local socket (E001)
    #[error("unable to bind {addr}: {source}")]
    BindFailed {
        /// The address that could not be bound
        addr: SocketAddr,
        /// Underlying socket error
        source: io::Error,
    },

    /// Not connected to a peer
    #[error("not connected")]
    NotConnected,

    /// The peer is on the local blacklist (E004)
    #[error("peer {0} is blacklisted, transfer not sent")]
    PeerBlocked(Uuid),

    /// Cannot read file: permission denied (E005)
    #[error("cannot read file '{0}': permission denied")]
    PermissionDenied(String),

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid user input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Frame did not start with the protocol magic
    #[error("invalid frame magic: {0:#010x}")]
    InvalidMagic(u32),

    /// Unsupported protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Contact store error
    #[error("contact store error: {0}")]
    ContactStoreError(String),

    /// History store error
    #[error("history store error: {0}")]
    HistoryError(String),

    /// Message store error
    #[error("message store error: {0}")]
    MessageStoreError(String),

    /// The recipient does not take text messages right now
    #[error("user {0} does not want to be disturbed, message not sent")]
    RecipientBusy(Uuid),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Get the error code for user-facing display.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::BindFailed { .. } => Some("E001"),
            Self::PeerBlocked(_) => Some("E004"),
            Self::PermissionDenied(_) => Some("E005"),
            _ => None,
        }
    }

    /// Check if this error is recoverable (can retry).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::BindFailed { .. } | Self::NotConnected | Self::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
