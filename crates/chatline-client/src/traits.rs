use crate::error::Result;
use crate::types::{Conversation, DeleteScope, Message, UserId, UserSummary};
use async_trait::async_trait;

/// REST collaborators consumed by the client core.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// Profile of the authenticated user.
    async fn me(&self) -> Result<UserSummary>;
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;
    /// History with `peer`, already filtered by the server for the caller.
    async fn fetch_history(&self, peer: UserId) -> Result<Vec<Message>>;
    async fn mark_read(&self, message_id: u64) -> Result<()>;
    async fn edit_message(&self, message_id: u64, content: &str) -> Result<Message>;
    async fn delete_message(&self, message_id: u64, scope: DeleteScope) -> Result<()>;
    async fn delete_conversation(&self, peer: UserId, scope: DeleteScope) -> Result<()>;
    async fn search_users(&self, fragment: &str) -> Result<Vec<UserSummary>>;
}

/// Both halves of an open socket.
///
/// `inbound` yields raw text frames and closes when the socket does; an
/// `Err` item reports why before the channel ends.
pub struct Link {
    pub outbound: tokio::sync::mpsc::Sender<String>,
    pub inbound: async_channel::Receiver<Result<String>>,
}

/// Abstraction for opening the persistent connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `url`. Credential rejection must map to `ChatError::Auth`.
    async fn open(&self, url: &url::Url) -> Result<Link>;
}
