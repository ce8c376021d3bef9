//! Per-contact conversation history.
//!
//! Messages are grouped by the other party: sent messages under their
//! receiver, received ones under their sender. In incognito mode nothing is
//! written and switching it on wipes what was stored.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Message, MessageSink};
use crate::error::{Error, Result};

/// Serializable wrapper for the message database.
#[derive(Debug, Serialize, Deserialize)]
struct MessageDatabase {
    /// Version of the message database format
    version: u32,
    /// Conversations by contact id, oldest message first
    conversations: BTreeMap<Uuid, Vec<Message>>,
}

/// Conversation store.
#[derive(Debug)]
pub struct MessageStore {
    /// Path to the message database file
    path: PathBuf,
    conversations: BTreeMap<Uuid, Vec<Message>>,
    incognito: bool,
}

impl MessageStore {
    /// Load the message store from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be loaded.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("messages.json"));
        Self::load_from(path)
    }

    /// Load from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                conversations: BTreeMap::new(),
                incognito: false,
            });
        }

        let file = fs::File::open(&path).map_err(|e| {
            Error::MessageStoreError(format!(
                "Failed to open message store at {}: {}",
                path.display(),
                e
            ))
        })?;

        let reader = BufReader::new(file);
        let db: MessageDatabase = serde_json::from_reader(reader).map_err(|e| {
            Error::MessageStoreError(format!(
                "Failed to parse message store at {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            path,
            conversations: db.conversations,
            incognito: false,
        })
    }

    /// Get the default message store path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        crate::config::Config::data_dir().map(|dir| dir.join("messages.json"))
    }

    /// Save the message store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::MessageStoreError(format!(
                    "Failed to create message store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = MessageDatabase {
            version: 1,
            conversations: self.conversations.clone(),
        };

        let file = fs::File::create(&self.path).map_err(|e| {
            Error::MessageStoreError(format!(
                "Failed to create message store at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &db).map_err(|e| {
            Error::MessageStoreError(format!(
                "Failed to write message store at {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Switch incognito mode. Turning it on erases every conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn set_incognito(&mut self, enabled: bool) -> Result<()> {
        let was = self.incognito;
        self.incognito = enabled;
        if enabled && !was {
            tracing::info!("Incognito mode on, clearing message history");
            return self.clear();
        }
        Ok(())
    }

    /// Whether messages are being kept.
    #[must_use]
    pub const fn is_incognito(&self) -> bool {
        self.incognito
    }

    /// Append `message` to the conversation with `contact`.
    ///
    /// Does nothing in incognito mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn add(&mut self, contact: Uuid, message: Message) -> Result<()> {
        if self.incognito {
            return Ok(());
        }
        self.conversations.entry(contact).or_default().push(message);
        self.save()
    }

    /// Keep a message this user sent. Own messages count as read.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn record_sent(&mut self, mut message: Message) -> Result<()> {
        message.read = true;
        self.add(message.receiver_id, message)
    }

    /// Keep a message another user sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn record_received(&mut self, message: Message) -> Result<()> {
        self.add(message.sender_id, message)
    }

    /// Messages exchanged with `contact`, oldest first.
    #[must_use]
    pub fn conversation(&self, contact: &Uuid) -> &[Message] {
        self.conversations.get(contact).map(Vec::as_slice).unwrap_or_default()
    }

    /// Contacts with a conversation, most recent activity first.
    #[must_use]
    pub fn contacts(&self) -> Vec<Uuid> {
        let mut latest: Vec<_> = self
            .conversations
            .iter()
            .filter_map(|(id, messages)| messages.last().map(|m| (m.timestamp, *id)))
            .collect();
        latest.sort_by(|a, b| b.cmp(a));
        latest.into_iter().map(|(_, id)| id).collect()
    }

    /// Unread messages across every conversation.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.conversations
            .values()
            .flatten()
            .filter(|m| !m.read)
            .count()
    }

    /// Unread messages from `contact`.
    #[must_use]
    pub fn unread_count_for(&self, contact: &Uuid) -> usize {
        self.conversation(contact).iter().filter(|m| !m.read).count()
    }

    /// Mark one message read. Returns `false` for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn mark_as_read(&mut self, message_id: &Uuid) -> Result<bool> {
        let Some(message) = self
            .conversations
            .values_mut()
            .flatten()
            .find(|m| &m.message_id == message_id)
        else {
            return Ok(false);
        };
        if !message.read {
            message.read = true;
            self.save()?;
        }
        Ok(true)
    }

    /// Mark the whole conversation with `contact` read; returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn mark_conversation_read(&mut self, contact: &Uuid) -> Result<usize> {
        let mut changed = 0;
        if let Some(messages) = self.conversations.get_mut(contact) {
            for message in messages.iter_mut().filter(|m| !m.read) {
                message.read = true;
                changed += 1;
            }
        }
        if changed > 0 {
            self.save()?;
        }
        Ok(changed)
    }

    /// Forget the conversation with `contact`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn clear_conversation(&mut self, contact: &Uuid) -> Result<bool> {
        if self.conversations.remove(contact).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Forget every conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn clear(&mut self) -> Result<()> {
        self.conversations.clear();
        self.save()
    }

    /// Total stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.values().map(Vec::len).sum()
    }

    /// Check if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.values().all(Vec::is_empty)
    }

    /// Get the path to the message store file.
    #[must_use]
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }
}

/// Notices from the transfer engine land in the conversation with their receiver.
impl MessageSink for MessageStore {
    fn receive_message(&mut self, message: Message) {
        if let Err(e) = self.add(message.receiver_id, message) {
            tracing::warn!("Failed to store message: {}", e);
        }
    }
}
