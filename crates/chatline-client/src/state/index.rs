//! Conversation list, kept loosely in sync with the server.
//!
//! Local activity updates the list immediately; an authoritative refresh
//! follows and wins. Only one refresh runs at a time: a call made while one
//! is in flight returns [`RefreshOutcome::Coalesced`] without a request.

use crate::error::Result;
use crate::scheduler::{RequestSlot, Scheduler, TaskSlot};
use crate::traits::ChatApi;
use crate::types::{Conversation, Message, UserId, UserSummary};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Another refresh was already in flight.
    Coalesced,
    /// The index was torn down before the response arrived.
    Discarded,
}

struct Inner {
    api: Arc<dyn ChatApi>,
    viewer: UserId,
    scheduler: Scheduler,
    conversations: Mutex<Vec<Conversation>>,
    in_flight: AtomicBool,
    active: AtomicBool,
    refresh_timer: TaskSlot,
    requests: RequestSlot,
}

#[derive(Clone)]
pub struct ConversationIndex {
    inner: Arc<Inner>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn last_activity(conversation: &Conversation) -> Option<chrono::DateTime<chrono::Utc>> {
    conversation.last_message.as_ref().map(|m| m.created_at)
}

impl ConversationIndex {
    pub fn new(api: Arc<dyn ChatApi>, viewer: UserId) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                viewer,
                scheduler: Scheduler::new(),
                conversations: Mutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
                active: AtomicBool::new(true),
                refresh_timer: TaskSlot::new(),
                requests: RequestSlot::new(),
            }),
        }
    }

    pub fn resume(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Fetch the authoritative list and replace the local one.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        if !self.inner.active.load(Ordering::SeqCst) {
            return Ok(RefreshOutcome::Discarded);
        }
        if self.inner.in_flight.swap(true, Ordering::SeqCst) {
            tracing::trace!("[Index] Refresh already in flight");
            return Ok(RefreshOutcome::Coalesced);
        }
        let _guard = InFlight(&self.inner.in_flight);

        let mut fetched = loop {
            let token = self.inner.requests.issue();
            let fetched = self.inner.api.list_conversations().await?;
            if !self.inner.active.load(Ordering::SeqCst) {
                return Ok(RefreshOutcome::Discarded);
            }
            if self.inner.requests.is_current(token) {
                break fetched;
            }
            // A conversation was removed while the request was outstanding.
            tracing::debug!("[Index] List changed during refresh; fetching again");
        };

        fetched.sort_by_key(|c| Reverse(last_activity(c)));
        let mut list = self.inner.conversations.lock();
        let placeholders: Vec<Conversation> = list
            .iter()
            .filter(|c| c.is_placeholder() && !fetched.iter().any(|f| f.peer_id() == c.peer_id()))
            .cloned()
            .collect();
        tracing::debug!(
            "[Index] Refreshed: {} conversations, {} local placeholders",
            fetched.len(),
            placeholders.len()
        );
        *list = placeholders.into_iter().chain(fetched).collect();
        Ok(RefreshOutcome::Refreshed)
    }

    /// Refresh in the background. Failures are logged.
    pub fn request_refresh(&self) {
        let index = self.clone();
        tokio::spawn(async move {
            if let Err(e) = index.refresh().await {
                tracing::warn!("[Index] Refresh failed: {}", e);
            }
        });
    }

    /// Refresh once `delay` has elapsed. A later call replaces a pending one.
    pub fn schedule_refresh(&self, delay: Duration) {
        let index = self.clone();
        let handle = self.inner.scheduler.schedule(delay, async move {
            if let Err(e) = index.refresh().await {
                tracing::warn!("[Index] Delayed refresh failed: {}", e);
            }
        });
        self.inner.refresh_timer.replace(handle);
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.inner.refresh_timer.is_pending()
    }

    /// Move the conversation `message` belongs to to the top, then refresh.
    pub fn upsert_from_activity(&self, message: &Message, active_peer: Option<UserId>) {
        let viewer = self.inner.viewer;
        let peer = message.peer_of(viewer);
        {
            let mut list = self.inner.conversations.lock();
            let mut entry = match list.iter().position(|c| c.peer_id() == peer) {
                Some(position) => list.remove(position),
                None => Conversation::placeholder(UserSummary::placeholder(peer)),
            };
            if message.receiver_id == viewer && active_peer != Some(peer) {
                entry.unread_count += 1;
            }
            entry.last_message = Some(message.clone());
            list.insert(0, entry);
        }
        self.request_refresh();
    }

    /// Add a placeholder for `user` unless a conversation already exists.
    pub fn ensure(&self, user: UserSummary) -> bool {
        let mut list = self.inner.conversations.lock();
        if list.iter().any(|c| c.peer_id() == user.id) {
            return false;
        }
        list.insert(0, Conversation::placeholder(user));
        true
    }

    /// Drop the conversation with `peer`. A refresh already in flight fetches
    /// again instead of applying a list that may still contain it.
    pub fn remove(&self, peer: UserId) -> Option<Conversation> {
        self.inner.requests.invalidate();
        let mut list = self.inner.conversations.lock();
        let position = list.iter().position(|c| c.peer_id() == peer)?;
        Some(list.remove(position))
    }

    pub fn set_online(&self, peer: UserId, online: bool) -> bool {
        let mut list = self.inner.conversations.lock();
        match list.iter_mut().find(|c| c.peer_id() == peer) {
            Some(conversation) => {
                conversation.user.online = online;
                true
            }
            None => false,
        }
    }

    pub fn mark_read(&self, peer: UserId) {
        if let Some(conversation) = self
            .inner
            .conversations
            .lock()
            .iter_mut()
            .find(|c| c.peer_id() == peer)
        {
            conversation.unread_count = 0;
        }
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.conversations.lock().clone()
    }

    pub fn get(&self, peer: UserId) -> Option<Conversation> {
        self.inner
            .conversations
            .lock()
            .iter()
            .find(|c| c.peer_id() == peer)
            .cloned()
    }

    pub fn total_unread(&self) -> u32 {
        self.inner
            .conversations
            .lock()
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    /// Cancel the delayed refresh, discard any in-flight response and clear the list.
    /// Refreshes stay disabled until [`ConversationIndex::resume`].
    pub fn teardown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.refresh_timer.cancel();
        self.inner.requests.invalidate();
        self.inner.conversations.lock().clear();
    }
}
