//! Online and typing indicators.
//!
//! Outbound typing is debounced: the first keystroke after idle sends
//! `typing`, every keystroke pushes the idle deadline back, and `stop_typing`
//! goes out when the deadline passes. Inbound typing flags expire on their
//! own so a lost `stop_typing` never leaves a peer "typing" forever.

use crate::client::{ClientConfig, ConnectionManager};
use crate::protocol::OutboundFrame;
use crate::scheduler::{Scheduler, TaskHandle, TaskSlot};
use crate::types::UserId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct RemoteTyping {
    generation: u64,
    expiry: TaskHandle,
}

#[derive(Default)]
struct TypingState {
    remote: HashMap<UserId, RemoteTyping>,
    generation: u64,
    online: HashMap<UserId, bool>,
    local: Option<UserId>,
}

struct Inner {
    connection: ConnectionManager,
    scheduler: Scheduler,
    idle: Duration,
    expiry: Duration,
    state: Mutex<TypingState>,
    debounce: TaskSlot,
}

#[derive(Clone)]
pub struct PresenceTypingTracker {
    inner: Arc<Inner>,
}

impl PresenceTypingTracker {
    pub fn new(connection: ConnectionManager, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                scheduler: Scheduler::new(),
                idle: config.typing_idle(),
                expiry: config.typing_expiry(),
                state: Mutex::new(TypingState::default()),
                debounce: TaskSlot::new(),
            }),
        }
    }

    /// A local keystroke in the conversation with `peer`.
    pub fn mark_typing(&self, peer: UserId) {
        let (previous, announce) = {
            let mut state = self.inner.state.lock();
            match state.local.replace(peer) {
                Some(current) if current == peer => (None, false),
                other => (other, true),
            }
        };
        if let Some(previous) = previous {
            self.inner.send(OutboundFrame::StopTyping {
                receiver_id: previous,
            });
        }
        if announce {
            self.inner.send(OutboundFrame::Typing { receiver_id: peer });
        }

        let inner = self.inner.clone();
        self.inner
            .debounce
            .replace(self.inner.scheduler.schedule(self.inner.idle, async move {
                inner.finish_local();
            }));
    }

    /// Send `stop_typing` now if a typing signal is outstanding.
    pub fn stop_typing(&self) {
        self.inner.debounce.cancel();
        self.inner.finish_local();
    }

    pub fn local_typing(&self) -> Option<UserId> {
        self.inner.state.lock().local
    }

    pub fn on_typing(&self, user: UserId) {
        let inner = self.inner.clone();
        let mut state = self.inner.state.lock();
        state.generation += 1;
        let generation = state.generation;
        let expiry = self.inner.scheduler.schedule(self.inner.expiry, async move {
            inner.expire_remote(user, generation);
        });
        if let Some(previous) = state
            .remote
            .insert(user, RemoteTyping { generation, expiry })
        {
            previous.expiry.cancel();
        }
    }

    pub fn on_stop_typing(&self, user: UserId) {
        if let Some(previous) = self.inner.state.lock().remote.remove(&user) {
            previous.expiry.cancel();
        }
    }

    pub fn on_user_status(&self, user: UserId, online: bool) {
        self.inner.state.lock().online.insert(user, online);
    }

    pub fn is_typing(&self, user: UserId) -> bool {
        self.inner.state.lock().remote.contains_key(&user)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.inner
            .state
            .lock()
            .online
            .get(&user)
            .copied()
            .unwrap_or(false)
    }

    pub fn typing_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.inner.state.lock().remote.keys().copied().collect();
        users.sort();
        users
    }

    /// Cancel every timer and forget all indicators. Nothing is sent.
    pub fn teardown(&self) {
        self.inner.debounce.cancel();
        let mut state = self.inner.state.lock();
        for (_, typing) in state.remote.drain() {
            typing.expiry.cancel();
        }
        state.online.clear();
        state.local = None;
    }
}

impl Inner {
    fn send(&self, frame: OutboundFrame) {
        if let Err(e) = self.connection.send(&frame) {
            tracing::debug!("[Presence] Typing signal not sent: {}", e);
        }
    }

    fn finish_local(&self) {
        let peer = self.state.lock().local.take();
        if let Some(peer) = peer {
            self.send(OutboundFrame::StopTyping { receiver_id: peer });
        }
    }

    fn expire_remote(&self, user: UserId, generation: u64) {
        let mut state = self.state.lock();
        if state.remote.get(&user).map(|t| t.generation) == Some(generation) {
            state.remote.remove(&user);
            tracing::trace!("[Presence] Typing indicator for {} expired", user);
        }
    }
}
