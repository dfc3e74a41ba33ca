use crate::types::{Message, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Server-to-client events, discriminated by the `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    NewMessage {
        message: Message,
    },
    MessageEdited {
        message: Message,
    },
    MessageDeleted {
        message_id: MessageId,
    },
    ChatDeleted {
        other_user_id: UserId,
    },
    UserStatus {
        user_id: UserId,
        online: bool,
    },
    Typing {
        user_id: UserId,
    },
    StopTyping {
        user_id: UserId,
    },
    /// The server failed to persist something this session sent.
    Error {
        #[serde(default)]
        error: String,
    },
    /// Any tag this client does not know about.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::NewMessage { .. } => "new_message",
            InboundEvent::MessageEdited { .. } => "message_edited",
            InboundEvent::MessageDeleted { .. } => "message_deleted",
            InboundEvent::ChatDeleted { .. } => "chat_deleted",
            InboundEvent::UserStatus { .. } => "user_status",
            InboundEvent::Typing { .. } => "typing",
            InboundEvent::StopTyping { .. } => "stop_typing",
            InboundEvent::Error { .. } => "error",
            InboundEvent::Unknown => "unknown",
        }
    }
}

/// Client-to-server frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    SendMessage {
        receiver_id: UserId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<u64>,
    },
    Typing {
        receiver_id: UserId,
    },
    StopTyping {
        receiver_id: UserId,
    },
}

impl OutboundFrame {
    pub fn to_text(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
