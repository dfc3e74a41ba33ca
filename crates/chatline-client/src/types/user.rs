//! Users and the authenticated identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id)
    }
}

/// Peer summary as returned by the conversation list and user search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, alias = "image_url", skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub online: bool,
}

impl UserSummary {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            avatar: None,
            online: false,
        }
    }

    /// Stand-in for a peer we only know by id (e.g. first message from a stranger).
    pub fn placeholder(id: UserId) -> Self {
        Self::new(id, format!("user-{}", id))
    }
}

/// The authenticated user plus the bearer credential used for every request.
#[derive(Clone)]
pub struct Identity {
    pub user: UserSummary,
    pub token: String,
}

impl Identity {
    pub fn new(user: UserSummary, token: impl Into<String>) -> Self {
        Self {
            user,
            token: token.into(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user", &self.user.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_alias() {
        let user: UserSummary = serde_json::from_str(
            r#"{"id": 7, "username": "bob", "email": "b@x.io", "image_url": "/img/7.png"}"#,
        )
        .unwrap();
        assert_eq!(user.id, UserId(7));
        assert_eq!(user.avatar.as_deref(), Some("/img/7.png"));
        assert!(!user.online);
    }

    #[test]
    fn test_identity_debug_hides_token() {
        let identity = Identity::new(UserSummary::new(1, "alice"), "secret-token");
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("secret-token"));
    }
}
