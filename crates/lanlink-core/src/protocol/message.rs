//! Typed network messages.
//!
//! Every frame carries one [`NetworkMessage`]. Its content is a tagged union
//! keyed by [`MessageType`], with one payload schema per type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::identity::{UserIdentity, UserState};
use crate::transfer::{FileTransferRequest, FileTransferResponse};

/// Network message types, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum MessageType {
    /// Presence state change
    UserStatus = 0,
    /// Chat text
    ChatMessage = 1,
    /// Offer to send a file
    FileTransferRequest = 2,
    /// Accept/reject of an offer
    FileTransferResponse = 3,
    /// One block of file data
    FileData = 4,
    /// Connection self-identification
    UserDiscovery = 5,
    /// Keep-alive
    Heartbeat = 6,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::UserStatus),
            1 => Some(Self::ChatMessage),
            2 => Some(Self::FileTransferRequest),
            3 => Some(Self::FileTransferResponse),
            4 => Some(Self::FileData),
            5 => Some(Self::UserDiscovery),
            6 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        kind as Self
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_byte(value).ok_or_else(|| format!("unknown message type: {value}"))
    }
}

/// UserStatus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusPayload {
    /// Whose state changed
    pub user_id: Uuid,
    /// The new state
    pub state: UserState,
}

/// ChatMessage payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Intended recipient
    pub receiver_id: Uuid,
    /// Message text
    pub text: String,
}

/// FileData payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDataPayload {
    /// Session the block belongs to
    pub session_id: Uuid,
    /// Zero-based block index
    pub block_index: u64,
    /// Raw block bytes (base64 on the wire)
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// UserDiscovery payload, sent by a client right after it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPayload {
    /// Sender's user id
    pub uuid: Uuid,
    /// Sender's nickname
    pub nickname: String,
    /// Sender's host description
    pub device_info: String,
}

impl From<&UserIdentity> for IdentityPayload {
    fn from(identity: &UserIdentity) -> Self {
        Self {
            uuid: identity.uuid,
            nickname: identity.nickname.clone(),
            device_info: identity.device_info.clone(),
        }
    }
}

/// Message content, one variant per [`MessageType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Presence state change
    UserStatus(UserStatusPayload),
    /// Chat text
    ChatMessage(ChatPayload),
    /// Offer to send a file
    FileTransferRequest(FileTransferRequest),
    /// Accept/reject of an offer
    FileTransferResponse(FileTransferResponse),
    /// One block of file data
    FileData(FileDataPayload),
    /// Connection self-identification
    UserDiscovery(IdentityPayload),
    /// Keep-alive, no payload
    Heartbeat,
}

impl Content {
    /// The message type this content is sent as.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::UserStatus(_) => MessageType::UserStatus,
            Self::ChatMessage(_) => MessageType::ChatMessage,
            Self::FileTransferRequest(_) => MessageType::FileTransferRequest,
            Self::FileTransferResponse(_) => MessageType::FileTransferResponse,
            Self::FileData(_) => MessageType::FileData,
            Self::UserDiscovery(_) => MessageType::UserDiscovery,
            Self::Heartbeat => MessageType::Heartbeat,
        }
    }

    /// Encode the payload as a JSON value.
    pub(crate) fn to_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::UserStatus(p) => serde_json::to_value(p)?,
            Self::ChatMessage(p) => serde_json::to_value(p)?,
            Self::FileTransferRequest(p) => serde_json::to_value(p)?,
            Self::FileTransferResponse(p) => serde_json::to_value(p)?,
            Self::FileData(p) => serde_json::to_value(p)?,
            Self::UserDiscovery(p) => serde_json::to_value(p)?,
            Self::Heartbeat => serde_json::Value::Object(serde_json::Map::new()),
        };
        Ok(value)
    }

    /// Decode the payload schema selected by `kind`.
    pub(crate) fn from_value(kind: MessageType, value: serde_json::Value) -> Result<Self> {
        let content = match kind {
            MessageType::UserStatus => Self::UserStatus(serde_json::from_value(value)?),
            MessageType::ChatMessage => Self::ChatMessage(serde_json::from_value(value)?),
            MessageType::FileTransferRequest => {
                Self::FileTransferRequest(serde_json::from_value(value)?)
            }
            MessageType::FileTransferResponse => {
                Self::FileTransferResponse(serde_json::from_value(value)?)
            }
            MessageType::FileData => Self::FileData(serde_json::from_value(value)?),
            MessageType::UserDiscovery => Self::UserDiscovery(serde_json::from_value(value)?),
            MessageType::Heartbeat => Self::Heartbeat,
        };
        Ok(content)
    }
}

/// One application message; immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    message_id: Uuid,
    sender_id: Uuid,
    timestamp: DateTime<Utc>,
    content: Content,
}

impl NetworkMessage {
    /// Build a message with a fresh id and the current time.
    #[must_use]
    pub fn new(sender_id: Uuid, content: Content) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            sender_id,
            timestamp: Utc::now(),
            content,
        }
    }

    /// Reassemble a message from decoded parts.
    pub(crate) fn from_parts(
        message_id: Uuid,
        sender_id: Uuid,
        timestamp: DateTime<Utc>,
        content: Content,
    ) -> Self {
        Self {
            message_id,
            sender_id,
            timestamp,
            content,
        }
    }

    /// Placeholder returned for frames that failed validation.
    ///
    /// A heartbeat with a nil sender; receivers ignore it.
    #[must_use]
    pub fn invalid() -> Self {
        Self::new(Uuid::nil(), Content::Heartbeat)
    }

    /// Whether this is the placeholder for a dropped frame.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.sender_id.is_nil() && matches!(self.content, Content::Heartbeat)
    }

    /// UserStatus message.
    #[must_use]
    pub fn user_status(sender_id: Uuid, user_id: Uuid, state: UserState) -> Self {
        Self::new(
            sender_id,
            Content::UserStatus(UserStatusPayload { user_id, state }),
        )
    }

    /// ChatMessage message.
    #[must_use]
    pub fn chat(sender_id: Uuid, receiver_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(
            sender_id,
            Content::ChatMessage(ChatPayload {
                receiver_id,
                text: text.into(),
            }),
        )
    }

    /// FileTransferRequest message.
    #[must_use]
    pub fn file_transfer_request(sender_id: Uuid, request: FileTransferRequest) -> Self {
        Self::new(sender_id, Content::FileTransferRequest(request))
    }

    /// FileTransferResponse message.
    #[must_use]
    pub fn file_transfer_response(sender_id: Uuid, response: FileTransferResponse) -> Self {
        Self::new(sender_id, Content::FileTransferResponse(response))
    }

    /// FileData message.
    #[must_use]
    pub fn file_data(sender_id: Uuid, session_id: Uuid, block_index: u64, data: Vec<u8>) -> Self {
        Self::new(
            sender_id,
            Content::FileData(FileDataPayload {
                session_id,
                block_index,
                data,
            }),
        )
    }

    /// UserDiscovery identification message.
    #[must_use]
    pub fn user_discovery(identity: &UserIdentity) -> Self {
        Self::new(identity.uuid, Content::UserDiscovery(identity.into()))
    }

    /// Heartbeat message.
    #[must_use]
    pub fn heartbeat(sender_id: Uuid) -> Self {
        Self::new(sender_id, Content::Heartbeat)
    }

    /// Message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.content.message_type()
    }

    /// Unique message id.
    #[must_use]
    pub const fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Sender's user id (nil when unknown).
    #[must_use]
    pub const fn sender_id(&self) -> Uuid {
        self.sender_id
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Typed content.
    #[must_use]
    pub const fn content(&self) -> &Content {
        &self.content
    }

    /// Take the content out of the message.
    #[must_use]
    pub fn into_content(self) -> Content {
        self.content
    }
}

mod base64_bytes {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_values() {
        assert_eq!(u8::from(MessageType::UserStatus), 0);
        assert_eq!(u8::from(MessageType::FileData), 4);
        assert_eq!(u8::from(MessageType::Heartbeat), 6);
        assert_eq!(MessageType::from_byte(3), Some(MessageType::FileTransferResponse));
        assert_eq!(MessageType::from_byte(7), None);
    }

    #[test]
    fn test_constructors_stamp_fresh_ids() {
        let sender = Uuid::new_v4();
        let a = NetworkMessage::heartbeat(sender);
        let b = NetworkMessage::heartbeat(sender);

        assert_ne!(a.message_id(), b.message_id());
        assert_eq!(a.sender_id(), sender);
        assert_eq!(a.message_type(), MessageType::Heartbeat);
        assert!(!a.is_invalid());
    }

    #[test]
    fn test_invalid_placeholder() {
        let msg = NetworkMessage::invalid();
        assert!(msg.is_invalid());
        assert!(msg.sender_id().is_nil());
        assert_eq!(msg.message_type(), MessageType::Heartbeat);
    }

    #[test]
    fn test_file_data_is_base64_on_the_wire() {
        let payload = FileDataPayload {
            session_id: Uuid::nil(),
            block_index: 2,
            data: b"hello".to_vec(),
        };

        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["data"], "aGVsbG8=");
        assert_eq!(value["blockIndex"], 2);

        let decoded: FileDataPayload = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded.data, b"hello");
    }

    #[test]
    fn test_content_rejects_mismatched_schema() {
        let value = serde_json::json!({ "text": "no receiver" });
        assert!(Content::from_value(MessageType::ChatMessage, value).is_err());

        let value = serde_json::json!({ "anything": true });
        let content = Content::from_value(MessageType::Heartbeat, value).expect("heartbeat");
        assert_eq!(content, Content::Heartbeat);
    }

    #[test]
    fn test_identity_payload_from_identity() {
        let identity = UserIdentity::new(Uuid::new_v4(), "Dana");
        let msg = NetworkMessage::user_discovery(&identity);

        assert_eq!(msg.sender_id(), identity.uuid);
        match msg.content() {
            Content::UserDiscovery(p) => {
                assert_eq!(p.uuid, identity.uuid);
                assert_eq!(p.nickname, "Dana");
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }
}
