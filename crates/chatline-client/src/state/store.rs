//! Ordered message collection for the active conversation.
//!
//! Three sources feed the store: the REST history baseline, optimistic local
//! sends, and socket pushes. The collection is ordered by arrival except for
//! the baseline, which is sorted by creation time. A server id appears at
//! most once, and an optimistic entry is replaced in place by its echo.

use crate::client::now_millis;
use crate::error::{ChatError, Result};
use crate::types::{Draft, Message, MessageId, UserId};
use chrono::Utc;
use std::collections::HashSet;

/// What `reconcile` did with a pushed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// An optimistic entry at `position` became the confirmed message.
    Replaced { position: usize },
    Appended,
    /// A message with the same server id was already present.
    Duplicate,
    /// Not part of the active conversation.
    Ignored,
}

#[derive(Debug)]
pub struct MessageStore {
    viewer: UserId,
    peer: Option<UserId>,
    messages: Vec<Message>,
    last_local: u64,
}

impl MessageStore {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            peer: None,
            messages: Vec::new(),
            last_local: 0,
        }
    }

    pub fn viewer(&self) -> UserId {
        self.viewer
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.peer
    }

    pub fn is_showing(&self, peer: UserId) -> bool {
        self.peer == Some(peer)
    }

    /// Make `peer` the active conversation. Switching peers empties the store.
    pub fn open(&mut self, peer: UserId) {
        if self.peer != Some(peer) {
            self.messages.clear();
            self.peer = Some(peer);
            tracing::debug!("[Store] Active conversation is now {}", peer);
        }
    }

    pub fn close(&mut self) {
        self.peer = None;
        self.messages.clear();
    }

    /// Install the REST baseline for `peer`.
    ///
    /// The baseline may predate pushes already folded in, so confirmed
    /// messages it does not contain are kept and merged by creation time.
    /// Pending optimistic entries stay at the tail.
    /// Returns false (and changes nothing) if `peer` is no longer active.
    pub fn load_history(&mut self, peer: UserId, history: Vec<Message>) -> bool {
        if self.peer != Some(peer) {
            tracing::debug!("[Store] Dropping history for inactive peer {}", peer);
            return false;
        }

        let mut seen = HashSet::new();
        let mut messages: Vec<Message> = Vec::with_capacity(history.len());
        for message in history {
            if seen.insert(message.id) {
                messages.push(message);
            } else if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
                *existing = message;
            }
        }
        let baseline = messages.len();

        let (pending, confirmed): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| m.id.is_local());
        messages.extend(confirmed.into_iter().filter(|m| !seen.contains(&m.id)));
        messages.sort_by_key(|m| m.created_at);
        let kept = messages.len() - baseline;
        messages.extend(pending);

        tracing::debug!(
            "[Store] Loaded {} messages with {} ({} newer kept)",
            baseline,
            peer,
            kept
        );
        self.messages = messages;
        true
    }

    fn next_local_id(&mut self) -> u64 {
        let id = now_millis().max(self.last_local + 1);
        self.last_local = id;
        id
    }

    /// Append a locally-originated message at the tail and return its local id.
    pub fn append_optimistic(&mut self, draft: &Draft) -> Result<MessageId> {
        if self.peer != Some(draft.receiver_id) {
            return Err(ChatError::validation(
                "draft is not addressed to the active conversation",
            ));
        }

        let reply_snapshot = draft.reply_to.and_then(|target| {
            self.get(MessageId::Server(target)).map(|m| {
                let mut snapshot = m.clone();
                snapshot.reply_to = None;
                Box::new(snapshot)
            })
        });

        let id = MessageId::Local(self.next_local_id());
        self.messages.push(Message {
            id,
            content: draft.content.clone(),
            sender_id: self.viewer,
            receiver_id: draft.receiver_id,
            created_at: Utc::now(),
            is_read: false,
            deleted_for_sender: false,
            deleted_for_receiver: false,
            reply_to_id: draft.reply_to,
            reply_to: reply_snapshot,
        });
        Ok(id)
    }

    /// Fold a pushed `new_message` into the active conversation.
    pub fn reconcile(&mut self, mut message: Message) -> Reconciled {
        let Some(peer) = self.peer else {
            return Reconciled::Ignored;
        };
        if !message.is_between(self.viewer, peer) {
            return Reconciled::Ignored;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return Reconciled::Duplicate;
        }

        match self.messages.iter().position(|m| message.echoes(m)) {
            Some(position) => {
                let local = &mut self.messages[position];
                if message.reply_to.is_none() {
                    message.reply_to = local.reply_to.take();
                }
                tracing::debug!("[Store] {} confirmed as {}", local.id, message.id);
                *local = message;
                Reconciled::Replaced { position }
            }
            None => {
                self.messages.push(message);
                Reconciled::Appended
            }
        }
    }

    /// Replace the message with the same id, keeping its position.
    pub fn apply_edit(&mut self, mut message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                if message.reply_to.is_none() {
                    message.reply_to = existing.reply_to.take();
                }
                *existing = message;
                true
            }
            None => false,
        }
    }

    /// Overwrite only the content. Returns the previous content for rollback.
    pub fn set_content(&mut self, id: MessageId, content: &str) -> Option<String> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .map(|m| std::mem::replace(&mut m.content, content.to_string()))
    }

    /// Global delete: remove the message for everyone.
    pub fn apply_delete(&mut self, id: MessageId) -> Option<Message> {
        let position = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(position))
    }

    /// Self delete: set the viewer's flag and keep the message stored.
    pub fn hide_for_viewer(&mut self, id: MessageId) -> bool {
        let viewer = self.viewer;
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .map(|m| m.hide_for(viewer))
            .unwrap_or(false)
    }

    /// Drop an optimistic entry whose send failed.
    pub fn discard_optimistic(&mut self, id: MessageId) -> Option<Message> {
        if !id.is_local() {
            return None;
        }
        self.apply_delete(id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages the viewer should see, in order.
    pub fn visible(&self) -> Vec<&Message> {
        self.visible_for(self.viewer)
    }

    pub fn visible_for(&self, viewer: UserId) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| !m.is_hidden_for(viewer))
            .collect()
    }

    /// Server ids of incoming messages not yet marked read.
    pub fn unread_incoming(&self) -> Vec<u64> {
        self.messages
            .iter()
            .filter(|m| m.receiver_id == self.viewer && !m.is_read)
            .filter_map(|m| m.id.server())
            .collect()
    }

    pub fn mark_read_locally(&mut self, ids: &[u64]) {
        for message in self.messages.iter_mut() {
            if let Some(id) = message.id.server() {
                if ids.contains(&id) {
                    message.is_read = true;
                }
            }
        }
    }
}
