//! Transfer history tracking for LanLink.
//!
//! This module provides persistent storage for finished transfers.
//!
//! ## Features
//!
//! - Records completed, failed and cancelled transfers (sent and received)
//! - Respects `max_entries` limit from configuration
//! - Persists history to a JSON file
//!
//! The transfer manager only appends and clears; reading is for the CLI.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::error::{Error, Result};
use crate::transfer::{FileTransferSession, TransferDirection};

/// Write-only persistence used by the transfer manager.
pub trait HistorySink: Send {
    /// Store one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn append(&mut self, record: TransferRecord) -> Result<()>;

    /// Remove every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    fn clear_all(&mut self) -> Result<()>;
}

/// A single finished transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Session id
    pub session_id: Uuid,
    /// Sending user
    pub sender_id: Uuid,
    /// Receiving user
    pub receiver_id: Uuid,
    /// File name
    pub file_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// When the record was made
    pub timestamp: DateTime<Utc>,
    /// Whether every byte arrived
    pub success: bool,
    /// Which side recorded it
    pub direction: TransferDirection,
}

impl TransferRecord {
    /// Record the outcome of `session`.
    #[must_use]
    pub fn from_session(session: &FileTransferSession, success: bool) -> Self {
        Self {
            session_id: session.session_id(),
            sender_id: session.sender_id(),
            receiver_id: session.receiver_id(),
            file_name: session.file_name().to_string(),
            file_size: session.file_size(),
            timestamp: Utc::now(),
            success,
            direction: session.direction(),
        }
    }

    /// The other party of the transfer.
    #[must_use]
    pub const fn peer_id(&self) -> Uuid {
        match self.direction {
            TransferDirection::Send => self.receiver_id,
            TransferDirection::Receive => self.sender_id,
        }
    }

    /// Timestamp formatted for display.
    #[must_use]
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

/// Serializable wrapper for the history database.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryDatabase {
    /// Version of the history database format
    version: u32,
    /// Records, newest first
    entries: Vec<TransferRecord>,
}

/// Transfer history store.
#[derive(Debug)]
pub struct HistoryStore {
    /// Path to the history database file
    path: PathBuf,
    /// Records (newest first)
    entries: Vec<TransferRecord>,
    /// Configuration settings
    config: HistoryConfig,
}

impl HistoryStore {
    /// Load the history store from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be loaded.
    pub fn load(config: HistoryConfig) -> Result<Self> {
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("history.json"));
        Self::load_from(path, config)
    }

    /// Load from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: PathBuf, config: HistoryConfig) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
                config,
            });
        }

        let file = fs::File::open(&path).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to open history store at {}: {}",
                path.display(),
                e
            ))
        })?;

        let reader = BufReader::new(file);
        let db: HistoryDatabase = serde_json::from_reader(reader).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to parse history store at {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            path,
            entries: db.entries,
            config,
        })
    }

    /// Get the default history store path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        crate::config::Config::data_dir().map(|dir| dir.join("history.json"))
    }

    /// Save the history store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::HistoryError(format!(
                    "Failed to create history store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = HistoryDatabase {
            version: 1,
            entries: self.entries.clone(),
        };

        let file = fs::File::create(&self.path).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to create history store at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &db).map_err(|e| {
            Error::HistoryError(format!(
                "Failed to write history store at {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Add a record at the front, pruning beyond `max_entries`.
    ///
    /// Does nothing when history is disabled or incognito.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn add(&mut self, record: TransferRecord) -> Result<()> {
        if !self.config.enabled || self.config.incognito {
            return Ok(());
        }

        self.entries.insert(0, record);
        self.entries.truncate(self.config.max_entries);
        self.save()
    }

    /// List records, newest first.
    #[must_use]
    pub fn list(&self, limit: Option<usize>) -> &[TransferRecord] {
        limit.map_or_else(
            || &self.entries[..],
            |n| &self.entries[..n.min(self.entries.len())],
        )
    }

    /// Get a record by session id.
    #[must_use]
    pub fn find_by_session(&self, session_id: &Uuid) -> Option<&TransferRecord> {
        self.entries.iter().find(|e| &e.session_id == session_id)
    }

    /// Get the total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    /// Get the path to the history store file.
    #[must_use]
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl HistorySink for HistoryStore {
    fn append(&mut self, record: TransferRecord) -> Result<()> {
        self.add(record)
    }

    fn clear_all(&mut self) -> Result<()> {
        self.clear()
    }
}
