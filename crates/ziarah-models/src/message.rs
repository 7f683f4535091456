use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content every soft-deleted message carries in place of its original text.
pub const DELETED_CONTENT: &str = "🚫 This message has been deleted";

/// Upper bound on chat content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    #[default]
    Text,
    Sos,
    Info,
    Deleted,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Sos => "SOS",
            Self::Info => "INFO",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "SOS" => Some(Self::Sos),
            "INFO" => Some(Self::Info),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A group chat message. The id is assigned by the gateway when the message
/// is created and stays the same through broadcast, persistence and deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        group_id: Uuid,
        sender_id: Uuid,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            sender_id,
            content: content.into(),
            message_type,
            // Storage keeps microseconds; trim here so every copy compares equal.
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.message_type == MessageType::Deleted
    }

    /// Terminal representation: id, sender and timestamp are preserved.
    pub fn into_deleted(mut self) -> Self {
        self.content = DELETED_CONTENT.to_string();
        self.message_type = MessageType::Deleted;
        self
    }
}

/// Frame a client sends over the chat socket.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: Option<MessageType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_uses_uppercase_wire_names() {
        let json = serde_json::to_string(&MessageType::Sos).unwrap();
        assert_eq!(json, "\"SOS\"");
        let parsed: MessageType = serde_json::from_str("\"DELETED\"").unwrap();
        assert_eq!(parsed, MessageType::Deleted);
        assert_eq!(MessageType::parse(" info "), Some(MessageType::Info));
        assert_eq!(MessageType::parse("VIDEO"), None);
    }

    #[test]
    fn chat_message_serializes_type_field() {
        let msg = ChatMessage::new(Uuid::new_v4(), Uuid::new_v4(), "hi", MessageType::Text);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "TEXT");
        assert_eq!(value["content"], "hi");
        assert_eq!(value["id"], msg.id.to_string());
    }

    #[test]
    fn into_deleted_keeps_identity() {
        let msg = ChatMessage::new(Uuid::new_v4(), Uuid::new_v4(), "secret", MessageType::Sos);
        let deleted = msg.clone().into_deleted();
        assert_eq!(deleted.id, msg.id);
        assert_eq!(deleted.sender_id, msg.sender_id);
        assert_eq!(deleted.created_at, msg.created_at);
        assert_eq!(deleted.content, DELETED_CONTENT);
        assert!(deleted.is_deleted());
    }

    #[test]
    fn payload_type_is_optional() {
        let payload: MessagePayload = serde_json::from_str(r#"{"content":"hello"}"#).unwrap();
        assert_eq!(payload.message_type, None);
        let payload: MessagePayload =
            serde_json::from_str(r#"{"content":"help","type":"SOS"}"#).unwrap();
        assert_eq!(payload.message_type, Some(MessageType::Sos));
    }
}
