//! Direct messages and their identifiers.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Message identifier, tagged by origin.
///
/// `Local` ids are assigned to optimistic messages before the server has
/// confirmed them. They are wall-clock milliseconds, so they are also
/// numerically far above any server id, but reconciliation only ever looks
/// at the tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    Server(u64),
    Local(u64),
}

impl MessageId {
    pub fn value(self) -> u64 {
        match self {
            MessageId::Server(v) | MessageId::Local(v) => v,
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, MessageId::Local(_))
    }

    pub fn server(self) -> Option<u64> {
        match self {
            MessageId::Server(v) => Some(v),
            MessageId::Local(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(v) => write!(f, "{}", v),
            MessageId::Local(v) => write!(f, "local-{}", v),
        }
    }
}

// Only server ids ever appear on the wire.
impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.value())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(MessageId::Server)
    }
}

/// The viewer's relationship to a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerRole {
    Sender,
    Receiver,
    Outsider,
}

/// Scope of a delete request, sent as `delete_for`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Hide for the requesting user only.
    Me,
    /// Remove for both participants.
    All,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub deleted_for_sender: bool,
    #[serde(default)]
    pub deleted_for_receiver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<u64>,
    /// Snapshot of the reply target, kept for display after the target is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Box<Message>>,
}

impl Message {
    pub fn role_of(&self, viewer: UserId) -> ViewerRole {
        if self.sender_id == viewer {
            ViewerRole::Sender
        } else if self.receiver_id == viewer {
            ViewerRole::Receiver
        } else {
            ViewerRole::Outsider
        }
    }

    /// Whether the flag for `viewer`'s role hides this message from them.
    pub fn is_hidden_for(&self, viewer: UserId) -> bool {
        match self.role_of(viewer) {
            ViewerRole::Sender => self.deleted_for_sender,
            ViewerRole::Receiver => self.deleted_for_receiver,
            ViewerRole::Outsider => false,
        }
    }

    /// Set the hide flag for `viewer`'s role. Returns false for outsiders.
    pub fn hide_for(&mut self, viewer: UserId) -> bool {
        match self.role_of(viewer) {
            ViewerRole::Sender => self.deleted_for_sender = true,
            ViewerRole::Receiver => self.deleted_for_receiver = true,
            ViewerRole::Outsider => return false,
        }
        true
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == user
    }

    /// True when the message was exchanged between `a` and `b`, in either direction.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// The other participant from `viewer`'s point of view.
    pub fn peer_of(&self, viewer: UserId) -> UserId {
        if self.sender_id == viewer {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    /// Whether `self` is the server echo of the optimistic `local` entry.
    pub fn echoes(&self, local: &Message) -> bool {
        local.id.is_local()
            && !self.id.is_local()
            && local.content == self.content
            && local.sender_id == self.sender_id
            && local.receiver_id == self.receiver_id
    }
}

/// A message the user is about to send.
#[derive(Clone, Debug, PartialEq)]
pub struct Draft {
    pub receiver_id: UserId,
    pub content: String,
    pub reply_to: Option<u64>,
}

impl Draft {
    pub fn new(receiver_id: UserId, content: impl Into<String>) -> Self {
        Self {
            receiver_id,
            content: content.into(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, id: u64) -> Self {
        self.reply_to = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        serde_json::from_str(
            r#"{
                "id": 42,
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-01T10:00:00Z",
                "content": "hello",
                "sender_id": 1,
                "receiver_id": 2,
                "is_read": false,
                "sender": {"id": 1, "username": "alice"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_wire_message_parses_as_server_id() {
        let msg = sample();
        assert_eq!(msg.id, MessageId::Server(42));
        assert!(!msg.deleted_for_sender);
        assert!(msg.reply_to.is_none());
    }

    #[test]
    fn test_hidden_only_for_flagged_role() {
        let mut msg = sample();
        assert!(msg.hide_for(UserId(1)));
        assert!(msg.is_hidden_for(UserId(1)));
        assert!(!msg.is_hidden_for(UserId(2)));
        assert!(!msg.hide_for(UserId(99)));
    }

    #[test]
    fn test_peer_and_between() {
        let msg = sample();
        assert_eq!(msg.peer_of(UserId(1)), UserId(2));
        assert_eq!(msg.peer_of(UserId(2)), UserId(1));
        assert!(msg.is_between(UserId(2), UserId(1)));
        assert!(!msg.is_between(UserId(1), UserId(3)));
    }

    #[test]
    fn test_echo_requires_local_origin() {
        let server = sample();
        let mut local = sample();
        local.id = MessageId::Local(1_700_000_000_000);
        assert!(server.echoes(&local));
        assert!(!server.echoes(&server));
        local.content = "hello!".into();
        assert!(!server.echoes(&local));
    }

    #[test]
    fn test_delete_scope_wire_names() {
        assert_eq!(serde_json::to_string(&DeleteScope::Me).unwrap(), "\"me\"");
        assert_eq!(serde_json::to_string(&DeleteScope::All).unwrap(), "\"all\"");
    }
}
