use crate::types::{Message, UserId, UserSummary};
use serde::{Deserialize, Serialize};

/// One row of the conversation list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub user: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// Locally synthesized entry for a peer the server has no history with yet.
    pub fn placeholder(user: UserSummary) -> Self {
        Self {
            user,
            last_message: None,
            unread_count: 0,
        }
    }

    pub fn peer_id(&self) -> UserId {
        self.user.id
    }

    pub fn is_placeholder(&self) -> bool {
        self.last_message.is_none()
    }
}
