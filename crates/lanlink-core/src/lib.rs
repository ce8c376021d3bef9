//! # LanLink Core Library
//!
//! `lanlink-core` is the networking and file-transfer engine behind LanLink,
//! a peer-to-peer messaging and file sharing tool for a single LAN.
//!
//! ## Features
//!
//! - **Presence discovery**: UDP broadcast announcements with timeout-based liveness
//! - **Framed messaging**: length-prefixed JSON envelopes over TCP
//! - **Resilient client**: heartbeats and flat-delay auto-reconnect
//! - **Chunked transfers**: pausable, cancelable block streaming with out-of-order buffering
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`connection`] - TCP client and multi-client server
//! - [`contacts`] - Contact book with blacklist/whitelist policy
//! - [`discovery`] - Peer discovery over UDP broadcast
//! - [`history`] - Transfer history persistence
//! - [`identity`] - Local user identity and presence state
//! - [`message`] - Application-level conversation messages
//! - [`protocol`] - Wire protocol framing and typed message content
//! - [`transfer`] - File transfer sessions and their manager
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanlink_core::connection::Server;
//! use lanlink_core::discovery::{DiscoveryConfig, DiscoveryService};
//!
//! let (server, mut server_events) = Server::start(lanlink_core::DEFAULT_TCP_PORT).await?;
//! let (discovery, mut peers) = DiscoveryService::new(identity, DiscoveryConfig::default());
//! discovery.start(lanlink_core::DEFAULT_DISCOVERY_PORT).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod connection;
pub mod contacts;
pub mod discovery;
pub mod error;
pub mod history;
pub mod identity;
pub mod message;
pub mod protocol;
pub mod transfer;

use std::time::Duration;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire frame magic: "LANP"
pub const PROTOCOL_MAGIC: u32 = 0x4C4E_4150;

/// Wire protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Default TCP service port
pub const DEFAULT_TCP_PORT: u16 = 8888;

/// Default UDP discovery port
pub const DEFAULT_DISCOVERY_PORT: u16 = 8889;

/// Interval between client heartbeats and discovery broadcasts
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long a peer may stay silent before it is considered gone
pub const DEFAULT_USER_TIMEOUT: Duration = Duration::from_secs(15);

/// Flat delay between client reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default file block size (8 KB)
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Most out-of-order blocks a receiving session holds in memory
pub const MAX_BUFFERED_BLOCKS: usize = 1024;

/// Delay between consecutive outbound blocks of one session
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(10);
