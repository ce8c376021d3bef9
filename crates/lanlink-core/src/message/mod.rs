//! Conversation messages delivered to the application.
//!
//! The transfer engine only ever writes to the conversation path, through a
//! [`MessageSink`]. Chat text and notices are kept per contact in a
//! [`MessageStore`].

mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::UserState;
use crate::protocol::{Content, NetworkMessage};

pub use store::MessageStore;

/// Kind of conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Text typed by a user
    Text,
    /// Notice generated locally
    System,
    /// Notice about a file transfer
    FileTransferNotification,
    /// Notice about a peer's presence change
    UserStatusChange,
}

/// One entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id
    pub message_id: Uuid,
    /// Author
    pub sender_id: Uuid,
    /// Conversation partner
    pub receiver_id: Uuid,
    /// Body text
    pub content: String,
    /// Entry kind
    pub kind: MessageKind,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Whether the user has seen it
    pub read: bool,
}

impl Message {
    /// Create an unread message stamped now.
    #[must_use]
    pub fn new(
        sender_id: Uuid,
        receiver_id: Uuid,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content: content.into(),
            kind,
            timestamp: Utc::now(),
            read: false,
        }
    }

    /// A system notice in the conversation between `sender_id` and `receiver_id`.
    #[must_use]
    pub fn system(sender_id: Uuid, receiver_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(sender_id, receiver_id, content, MessageKind::System)
    }

    /// Text typed by `sender_id` for `receiver_id`.
    #[must_use]
    pub fn text(sender_id: Uuid, receiver_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(sender_id, receiver_id, content, MessageKind::Text)
    }

    /// The conversation entry carried by a chat frame.
    ///
    /// Keeps the frame's id and timestamp. Returns `None` for other content.
    #[must_use]
    pub fn from_network(message: &NetworkMessage) -> Option<Self> {
        let Content::ChatMessage(chat) = message.content() else {
            return None;
        };
        Some(Self {
            message_id: message.message_id(),
            sender_id: message.sender_id(),
            receiver_id: chat.receiver_id,
            content: chat.text.clone(),
            kind: MessageKind::Text,
            timestamp: message.timestamp(),
            read: false,
        })
    }

    /// Timestamp formatted for display.
    #[must_use]
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// The chat frame for this entry.
    #[must_use]
    pub fn to_network(&self) -> NetworkMessage {
        NetworkMessage::chat(self.sender_id, self.receiver_id, self.content.clone())
    }
}

/// Check that `message` may go to a receiver last seen in `receiver_state`.
///
/// Text is held back from users in do-not-disturb; notices always pass.
///
/// # Errors
///
/// Returns `Error::RecipientBusy` for text to a do-not-disturb receiver.
pub fn ensure_deliverable(message: &Message, receiver_state: UserState) -> Result<()> {
    if message.kind == MessageKind::Text && receiver_state == UserState::DoNotDisturb {
        return Err(Error::RecipientBusy(message.receiver_id));
    }
    Ok(())
}

/// Destination for messages the core injects into conversations.
pub trait MessageSink: Send {
    /// Deliver one message.
    fn receive_message(&mut self, message: Message);
}

impl MessageSink for mpsc::UnboundedSender<Message> {
    fn receive_message(&mut self, message: Message) {
        if self.send(message).is_err() {
            tracing::debug!("Message path closed, dropping message");
        }
    }
}
