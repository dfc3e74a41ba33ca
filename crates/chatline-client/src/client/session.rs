//! The session object: owns every component for one signed-in user, routes
//! inbound events in arrival order and exposes the user's actions.

use crate::client::config::ClientConfig;
use crate::client::connection::{ConnectionManager, ConnectionState, EventStream};
use crate::client::notice::{notice_channel, Notice, NoticeKind, NoticeSink};
use crate::error::{ChatError, Result};
use crate::protocol::{InboundEvent, OutboundFrame};
use crate::scheduler::RequestSlot;
use crate::state::{
    ConversationIndex, DeletionCoordinator, MessageStore, PresenceTypingTracker, Reconciled,
};
use crate::traits::{ChatApi, Connector};
use crate::types::{
    Conversation, DeleteScope, Draft, Identity, Message, MessageId, UserId, UserSummary,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::AbortHandle;

struct Inner {
    config: ClientConfig,
    identity: Identity,
    api: Arc<dyn ChatApi>,
    connection: ConnectionManager,
    store: Arc<Mutex<MessageStore>>,
    index: ConversationIndex,
    presence: PresenceTypingTracker,
    deletion: DeletionCoordinator,
    history: RequestSlot,
    search: RequestSlot,
    router: Mutex<Option<AbortHandle>>,
    notices: NoticeSink,
    notices_rx: async_channel::Receiver<Notice>,
}

/// A signed-in chat session.
///
/// Cheap to clone; all clones share the same state. Call [`ChatClient::teardown`]
/// (or [`ChatClient::logout`]) to stop the background tasks.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    /// Build a session for `identity` without connecting.
    pub fn new(
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        identity: Identity,
    ) -> Self {
        let viewer = identity.user_id();
        let (notices, notices_rx) = notice_channel(64);

        let connection = ConnectionManager::new(connector, config.clone());
        connection.set_notice_sink(notices.clone());

        let store = Arc::new(Mutex::new(MessageStore::new(viewer)));
        let index = ConversationIndex::new(api.clone(), viewer);
        let presence = PresenceTypingTracker::new(connection.clone(), &config);
        let deletion = DeletionCoordinator::new(
            api.clone(),
            store.clone(),
            index.clone(),
            notices.clone(),
            config.index_refresh_delay(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                identity,
                api,
                connection,
                store,
                index,
                presence,
                deletion,
                history: RequestSlot::new(),
                search: RequestSlot::new(),
                router: Mutex::new(None),
                notices,
                notices_rx,
            }),
        }
    }

    /// Build, connect, start routing events and load the conversation list.
    pub async fn start(
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        identity: Identity,
    ) -> Result<Self> {
        let client = Self::new(api, connector, config, identity);
        client.run().await?;
        Ok(client)
    }

    /// Connect and spawn the event router.
    pub async fn run(&self) -> Result<()> {
        self.inner.index.resume();
        self.spawn_router(self.inner.connection.events());
        if let Err(e) = self
            .inner
            .connection
            .connect(self.inner.identity.clone())
            .await
        {
            self.teardown();
            return Err(e);
        }
        tracing::info!("[Session] Started for user {}", self.viewer());
        self.inner.index.request_refresh();
        Ok(())
    }

    fn spawn_router(&self, events: EventStream) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ChatClient { inner }.handle_event(event);
            }
            tracing::debug!("[Session] Router stopped");
        });
        if let Some(previous) = self.inner.router.lock().replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    pub fn viewer(&self) -> UserId {
        self.inner.identity.user_id()
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn index(&self) -> &ConversationIndex {
        &self.inner.index
    }

    pub fn presence(&self) -> &PresenceTypingTracker {
        &self.inner.presence
    }

    /// Read access to the active conversation.
    pub fn with_store<R>(&self, f: impl FnOnce(&MessageStore) -> R) -> R {
        f(&self.inner.store.lock())
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.inner.store.lock().active_peer()
    }

    /// The rendered sequence of the active conversation.
    pub fn visible_messages(&self) -> Vec<Message> {
        self.inner
            .store
            .lock()
            .visible()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.index.conversations()
    }

    pub fn notices(&self) -> async_channel::Receiver<Notice> {
        self.inner.notices_rx.clone()
    }

    /// Dispatch one inbound event. Called by the router in arrival order.
    pub fn handle_event(&self, event: InboundEvent) {
        tracing::debug!("[Session] Handling {}", event.kind());
        match event {
            InboundEvent::NewMessage { message } => self.on_new_message(message),
            InboundEvent::MessageEdited { message } => {
                self.inner.store.lock().apply_edit(message);
                self.inner.index.request_refresh();
            }
            InboundEvent::MessageDeleted { message_id } => {
                self.inner.deletion.on_message_deleted(message_id);
                self.inner.index.request_refresh();
            }
            InboundEvent::ChatDeleted { other_user_id } => {
                self.inner.deletion.on_chat_deleted(other_user_id);
            }
            InboundEvent::UserStatus { user_id, online } => {
                self.inner.presence.on_user_status(user_id, online);
                self.inner.index.set_online(user_id, online);
            }
            InboundEvent::Typing { user_id } => self.inner.presence.on_typing(user_id),
            InboundEvent::StopTyping { user_id } => self.inner.presence.on_stop_typing(user_id),
            InboundEvent::Error { error } => {
                self.inner.notices.raise(Notice::new(NoticeKind::Server, error));
            }
            InboundEvent::Unknown => {}
        }
    }

    fn on_new_message(&self, message: Message) {
        let viewer = self.viewer();
        let (active, outcome) = {
            let mut store = self.inner.store.lock();
            let active = store.active_peer();
            let outcome = store.reconcile(message.clone());
            if outcome == Reconciled::Appended && message.receiver_id == viewer {
                if let Some(id) = message.id.server() {
                    store.mark_read_locally(&[id]);
                }
            }
            (active, outcome)
        };

        if outcome == Reconciled::Duplicate {
            self.inner.index.request_refresh();
            return;
        }
        if outcome == Reconciled::Appended && message.receiver_id == viewer {
            if let Some(id) = message.id.server() {
                self.send_read_receipts(vec![id]);
            }
        }
        self.inner.index.upsert_from_activity(&message, active);
    }

    fn send_read_receipts(&self, ids: Vec<u64>) {
        if ids.is_empty() {
            return;
        }
        let api = self.inner.api.clone();
        tokio::spawn(async move {
            for id in ids {
                if let Err(e) = api.mark_read(id).await {
                    tracing::warn!("[Session] Read receipt for {} failed: {}", id, e);
                }
            }
        });
    }

    /// Make `peer` the active conversation and load its history.
    ///
    /// Opening another conversation before this returns makes this call
    /// resolve to `ChatError::Superseded` without touching the store.
    pub async fn open_conversation(&self, peer: UserSummary) -> Result<()> {
        let peer_id = peer.id;
        if self.inner.presence.local_typing().is_some_and(|p| p != peer_id) {
            self.inner.presence.stop_typing();
        }

        let token = self.inner.history.issue();
        self.inner.store.lock().open(peer_id);
        self.inner.index.ensure(peer);
        self.inner.index.mark_read(peer_id);

        let result = self.inner.api.fetch_history(peer_id).await;
        if !self.inner.history.is_current(token) {
            return Err(ChatError::Superseded);
        }
        let history = match result {
            Ok(history) => history,
            Err(e) => {
                self.inner
                    .notices
                    .raise_error(NoticeKind::RequestFailed, &e);
                return Err(e);
            }
        };

        let unread = {
            let mut store = self.inner.store.lock();
            if !store.load_history(peer_id, history) {
                return Err(ChatError::Superseded);
            }
            let unread = store.unread_incoming();
            store.mark_read_locally(&unread);
            unread
        };
        tracing::debug!(
            "[Session] Opened conversation with {} ({} unread)",
            peer_id,
            unread.len()
        );
        self.send_read_receipts(unread);
        Ok(())
    }

    pub fn close_conversation(&self) {
        self.inner.history.invalidate();
        self.inner.presence.stop_typing();
        self.inner.store.lock().close();
    }

    fn validate_content<'a>(&self, content: &'a str) -> Result<&'a str> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatError::validation("message is empty"));
        }
        if trimmed.len() > self.inner.config.max_content_bytes {
            return Err(ChatError::validation(format!(
                "message exceeds {} bytes",
                self.inner.config.max_content_bytes
            )));
        }
        Ok(trimmed)
    }

    /// Send a message to the active conversation, optionally as a reply.
    ///
    /// The message appears immediately under a local id, which is returned.
    /// If the frame cannot be handed to the connection the entry is removed
    /// again and a notice is raised.
    pub async fn send_message(&self, content: &str, reply_to: Option<MessageId>) -> Result<MessageId> {
        let content = self.validate_content(content)?;
        let viewer = self.viewer();

        let (peer, local_id, reply_to_id) = {
            let mut store = self.inner.store.lock();
            let peer = store
                .active_peer()
                .ok_or_else(|| ChatError::validation("no conversation is open"))?;

            let reply_to_id = match reply_to {
                None => None,
                Some(target) => {
                    let Some(server_id) = target.server() else {
                        return Err(ChatError::validation("cannot reply to an unconfirmed message"));
                    };
                    match store.get(target) {
                        Some(m) if !m.is_hidden_for(viewer) => Some(server_id),
                        _ => {
                            return Err(ChatError::validation(
                                "cannot reply to a deleted message",
                            ))
                        }
                    }
                }
            };

            let mut draft = Draft::new(peer, content);
            draft.reply_to = reply_to_id;
            let local_id = store.append_optimistic(&draft)?;
            (peer, local_id, reply_to_id)
        };

        self.inner.presence.stop_typing();

        let frame = OutboundFrame::SendMessage {
            receiver_id: peer,
            content: content.to_string(),
            reply_to_id,
        };
        if let Err(e) = self.inner.connection.send(&frame) {
            tracing::warn!("[Session] Send failed: {}", e);
            self.inner.store.lock().discard_optimistic(local_id);
            self.inner
                .notices
                .raise(Notice::new(NoticeKind::SendFailed, e.to_string()));
            return Err(e);
        }
        Ok(local_id)
    }

    /// Edit one of the viewer's confirmed messages.
    ///
    /// The new content is shown right away and rolled back if the server refuses.
    pub async fn edit_message(&self, id: MessageId, content: &str) -> Result<()> {
        let content = self.validate_content(content)?;
        let Some(server_id) = id.server() else {
            return Err(ChatError::validation("cannot edit an unconfirmed message"));
        };

        let previous = {
            let mut store = self.inner.store.lock();
            let viewer = store.viewer();
            match store.get(id) {
                Some(m) if m.sender_id == viewer && !m.is_hidden_for(viewer) => {}
                Some(_) => {
                    return Err(ChatError::validation("only your own messages can be edited"))
                }
                None => return Err(ChatError::validation("message is not in this conversation")),
            }
            store.set_content(id, content)
        };

        match self.inner.api.edit_message(server_id, content).await {
            Ok(edited) => {
                self.inner.store.lock().apply_edit(edited);
                self.inner.index.request_refresh();
                Ok(())
            }
            Err(e) => {
                {
                    let mut store = self.inner.store.lock();
                    let still_ours = store.get(id).is_some_and(|m| m.content == content);
                    if let (true, Some(previous)) = (still_ours, previous) {
                        store.set_content(id, &previous);
                    }
                }
                tracing::warn!("[Session] Edit of {} rolled back: {}", id, e);
                self.inner
                    .notices
                    .raise_error(NoticeKind::RequestFailed, &e);
                Err(e)
            }
        }
    }

    pub async fn delete_message(&self, id: MessageId, scope: DeleteScope) -> Result<()> {
        self.inner.deletion.delete_message(id, scope).await
    }

    pub async fn delete_conversation(&self, peer: UserId, scope: DeleteScope) -> Result<()> {
        self.inner.deletion.delete_conversation(peer, scope).await
    }

    /// A keystroke in the active conversation.
    pub fn typing(&self) {
        if let Some(peer) = self.active_peer() {
            self.inner.presence.mark_typing(peer);
        }
    }

    /// Search users by name. Short fragments return nothing without a request.
    pub async fn search_users(&self, fragment: &str) -> Result<Vec<UserSummary>> {
        let fragment = fragment.trim();
        if fragment.chars().count() < self.inner.config.search_min_chars {
            self.inner.search.invalidate();
            return Ok(Vec::new());
        }

        let token = self.inner.search.issue();
        let result = self.inner.api.search_users(fragment).await;
        if !self.inner.search.is_current(token) {
            return Err(ChatError::Superseded);
        }
        let viewer = self.viewer();
        Ok(result?.into_iter().filter(|u| u.id != viewer).collect())
    }

    /// Stop every background task, timer and outstanding request.
    pub fn teardown(&self) {
        if let Some(router) = self.inner.router.lock().take() {
            router.abort();
        }
        self.inner.connection.teardown();
        self.inner.presence.teardown();
        self.inner.index.teardown();
        self.inner.deletion.teardown();
        self.inner.history.invalidate();
        self.inner.search.invalidate();
        self.inner.store.lock().close();
    }

    pub fn logout(&self) {
        tracing::info!("[Session] Logging out user {}", self.viewer());
        self.teardown();
    }
}
