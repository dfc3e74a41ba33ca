//! Two-tier deletes: hide for the viewer only, or remove for both participants.
//!
//! Local state changes only after the server accepted the request. Each
//! target (a message or a conversation) has its own request slot, so when
//! the user deletes the same target twice only the newest response is applied.

use crate::client::{NoticeKind, NoticeSink};
use crate::error::{ChatError, Result};
use crate::scheduler::RequestSlot;
use crate::state::{ConversationIndex, MessageStore};
use crate::traits::ChatApi;
use crate::types::{DeleteScope, MessageId, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Target {
    Message(u64),
    Conversation(UserId),
}

pub struct DeletionCoordinator {
    api: Arc<dyn ChatApi>,
    store: Arc<Mutex<MessageStore>>,
    index: ConversationIndex,
    notices: NoticeSink,
    refresh_delay: Duration,
    slots: Mutex<HashMap<Target, Arc<RequestSlot>>>,
}

impl DeletionCoordinator {
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: Arc<Mutex<MessageStore>>,
        index: ConversationIndex,
        notices: NoticeSink,
        refresh_delay: Duration,
    ) -> Self {
        Self {
            api,
            store,
            index,
            notices,
            refresh_delay,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, target: Target) -> Arc<RequestSlot> {
        self.slots
            .lock()
            .entry(target)
            .or_insert_with(|| Arc::new(RequestSlot::new()))
            .clone()
    }

    /// Run `request` under `target`'s slot. Stale responses become `Superseded`;
    /// failures raise a notice.
    async fn guarded<F>(&self, target: Target, request: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let slot = self.slot(target);
        let token = slot.issue();
        let result = request.await;

        if !slot.is_current(token) {
            tracing::debug!("[Delete] Dropping stale response for {:?}", target);
            return Err(ChatError::Superseded);
        }
        self.slots.lock().remove(&target);

        if let Err(e) = &result {
            tracing::warn!("[Delete] {:?} failed: {}", target, e);
            self.notices.raise_error(NoticeKind::RequestFailed, e);
        }
        result
    }

    pub async fn delete_message(&self, id: MessageId, scope: DeleteScope) -> Result<()> {
        let Some(server_id) = id.server() else {
            return Err(ChatError::validation("message is not confirmed yet"));
        };
        if scope == DeleteScope::All {
            let store = self.store.lock();
            let viewer = store.viewer();
            if let Some(message) = store.get(id) {
                if message.sender_id != viewer {
                    return Err(ChatError::validation(
                        "only the sender can delete a message for everyone",
                    ));
                }
            }
        }

        self.guarded(
            Target::Message(server_id),
            self.api.delete_message(server_id, scope),
        )
        .await?;

        {
            let mut store = self.store.lock();
            match scope {
                DeleteScope::Me => {
                    store.hide_for_viewer(id);
                }
                DeleteScope::All => {
                    store.apply_delete(id);
                }
            }
        }
        tracing::info!("[Delete] Message {} deleted ({:?})", id, scope);
        self.index.request_refresh();
        Ok(())
    }

    pub async fn delete_conversation(&self, peer: UserId, scope: DeleteScope) -> Result<()> {
        self.guarded(
            Target::Conversation(peer),
            self.api.delete_conversation(peer, scope),
        )
        .await?;

        self.forget_conversation(peer);
        tracing::info!("[Delete] Conversation with {} deleted ({:?})", peer, scope);
        Ok(())
    }

    /// A `message_deleted` push. Already-removed ids are a no-op.
    pub fn on_message_deleted(&self, id: MessageId) -> bool {
        self.store.lock().apply_delete(id).is_some()
    }

    /// A `chat_deleted` push.
    pub fn on_chat_deleted(&self, peer: UserId) {
        self.forget_conversation(peer);
    }

    fn forget_conversation(&self, peer: UserId) {
        self.index.remove(peer);
        {
            let mut store = self.store.lock();
            if store.is_showing(peer) {
                store.close();
            }
        }
        self.index.schedule_refresh(self.refresh_delay);
    }

    /// Invalidate every outstanding request.
    pub fn teardown(&self) {
        for (_, slot) in self.slots.lock().drain() {
            slot.invalidate();
        }
    }
}
