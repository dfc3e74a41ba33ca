#![allow(dead_code)]

//! In-process stand-in for the chat server: REST handlers and socket links
//! share one message table, and pushes fan out to every open link of a user.

use async_trait::async_trait;
use chatline_client::{
    ChatApi, ChatClient, ChatError, ClientConfig, Connector, Conversation, DeleteScope, Identity,
    InboundEvent, Link, Message, MessageId, Result, UserId, UserSummary,
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct ServerState {
    next_id: u64,
    users: Vec<UserSummary>,
    messages: Vec<Message>,
    links: HashMap<UserId, Vec<async_channel::Sender<Result<String>>>>,
    opens: HashMap<UserId, usize>,
    frames: Vec<(UserId, String)>,
    list_calls: usize,
    search_calls: usize,
    list_delay_ms: u64,
    delete_delays_ms: VecDeque<u64>,
    reject_next: Option<(u16, String)>,
    refuse_connections: usize,
}

#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

fn timestamp(id: u64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + ChronoDuration::seconds(id as i64)
}

fn frame(event: &InboundEvent) -> String {
    serde_json::to_string(event).unwrap()
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                next_id: 500,
                ..Default::default()
            })),
        }
    }

    pub fn add_user(&self, id: u64, name: &str) -> Identity {
        let user = UserSummary::new(id, name);
        self.state.lock().users.push(user.clone());
        Identity::new(user, format!("token-{}", id))
    }

    pub fn seed_message(&self, id: u64, from: u64, to: u64, content: &str) -> Message {
        let message = Message {
            id: MessageId::Server(id),
            content: content.to_string(),
            sender_id: UserId(from),
            receiver_id: UserId(to),
            created_at: timestamp(id),
            is_read: false,
            deleted_for_sender: false,
            deleted_for_receiver: false,
            reply_to_id: None,
            reply_to: None,
        };
        self.state.lock().messages.push(message.clone());
        message
    }

    pub fn api(&self, viewer: u64) -> Arc<MockApi> {
        Arc::new(MockApi {
            server: self.clone(),
            viewer: UserId(viewer),
        })
    }

    pub fn connector(&self, user: u64) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            server: self.clone(),
            user: UserId(user),
        })
    }

    /// Build and start a session for `identity` against this server.
    pub async fn start(&self, identity: Identity) -> Result<ChatClient> {
        let id = identity.user_id().0;
        ChatClient::start(
            self.api(id),
            self.connector(id),
            ClientConfig::default(),
            identity,
        )
        .await
    }

    pub fn push(&self, user: u64, event: &InboundEvent) {
        self.push_raw(UserId(user), frame(event));
    }

    pub fn push_raw(&self, user: UserId, text: String) {
        let state = self.state.lock();
        for link in state.links.get(&user).into_iter().flatten() {
            let _ = link.try_send(Ok(text.clone()));
        }
    }

    /// Simulate a network drop for every link of `user`.
    pub fn drop_links(&self, user: u64) {
        self.state.lock().links.remove(&UserId(user));
    }

    pub fn opens(&self, user: u64) -> usize {
        self.state
            .lock()
            .opens
            .get(&UserId(user))
            .copied()
            .unwrap_or(0)
    }

    pub fn frames_from(&self, user: u64) -> Vec<String> {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|(from, _)| *from == UserId(user))
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn search_calls(&self) -> usize {
        self.state.lock().search_calls
    }

    pub fn set_list_delay(&self, ms: u64) {
        self.state.lock().list_delay_ms = ms;
    }

    pub fn queue_delete_delays(&self, delays: &[u64]) {
        self.state.lock().delete_delays_ms.extend(delays.iter().copied());
    }

    pub fn reject_next(&self, status: u16, message: &str) {
        self.state.lock().reject_next = Some((status, message.to_string()));
    }

    pub fn refuse_connections(&self, count: usize) {
        self.state.lock().refuse_connections = count;
    }

    pub fn message(&self, id: u64) -> Option<Message> {
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| m.id == MessageId::Server(id))
            .cloned()
    }

    fn take_rejection(&self) -> Result<()> {
        match self.state.lock().reject_next.take() {
            Some((status, message)) => Err(ChatError::rejected(status, message)),
            None => Ok(()),
        }
    }

    fn fan_out(state: &ServerState, users: &[UserId], event: &InboundEvent) {
        let text = frame(event);
        for user in users {
            for link in state.links.get(user).into_iter().flatten() {
                let _ = link.try_send(Ok(text.clone()));
            }
        }
    }

    fn handle_frame(&self, from: UserId, text: &str) {
        let mut state = self.state.lock();
        state.frames.push((from, text.to_string()));
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        let receiver = UserId(value["receiver_id"].as_u64().unwrap());

        match value["type"].as_str().unwrap() {
            "send_message" => {
                state.next_id += 1;
                let id = state.next_id;
                let reply_to_id = value["reply_to_id"].as_u64();
                let reply_to = reply_to_id.and_then(|r| {
                    state
                        .messages
                        .iter()
                        .find(|m| m.id == MessageId::Server(r))
                        .map(|m| Box::new(m.clone()))
                });
                let message = Message {
                    id: MessageId::Server(id),
                    content: value["content"].as_str().unwrap().to_string(),
                    sender_id: from,
                    receiver_id: receiver,
                    created_at: timestamp(id),
                    is_read: false,
                    deleted_for_sender: false,
                    deleted_for_receiver: false,
                    reply_to_id,
                    reply_to,
                };
                state.messages.push(message.clone());
                Self::fan_out(&state, &[from, receiver], &InboundEvent::NewMessage { message });
            }
            "typing" => {
                Self::fan_out(&state, &[receiver], &InboundEvent::Typing { user_id: from });
            }
            "stop_typing" => {
                Self::fan_out(&state, &[receiver], &InboundEvent::StopTyping { user_id: from });
            }
            other => panic!("unexpected frame type {}", other),
        }
    }
}

pub struct MockApi {
    server: MockServer,
    viewer: UserId,
}

#[async_trait]
impl ChatApi for MockApi {
    async fn me(&self) -> Result<UserSummary> {
        self.server
            .state
            .lock()
            .users
            .iter()
            .find(|u| u.id == self.viewer)
            .cloned()
            .ok_or_else(|| ChatError::Auth("unknown user".into()))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let delay = {
            let mut state = self.server.state.lock();
            state.list_calls += 1;
            state.list_delay_ms
        };
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let state = self.server.state.lock();
        let mut conversations: Vec<Conversation> = Vec::new();
        for message in state
            .messages
            .iter()
            .filter(|m| m.involves(self.viewer) && !m.is_hidden_for(self.viewer))
        {
            let peer = message.peer_of(self.viewer);
            let unread = u32::from(message.receiver_id == self.viewer && !message.is_read);
            match conversations.iter_mut().find(|c| c.peer_id() == peer) {
                Some(c) => {
                    c.last_message = Some(message.clone());
                    c.unread_count += unread;
                }
                None => {
                    let user = state
                        .users
                        .iter()
                        .find(|u| u.id == peer)
                        .cloned()
                        .unwrap_or_else(|| UserSummary::placeholder(peer));
                    conversations.push(Conversation {
                        user,
                        last_message: Some(message.clone()),
                        unread_count: unread,
                    });
                }
            }
        }
        Ok(conversations)
    }

    async fn fetch_history(&self, peer: UserId) -> Result<Vec<Message>> {
        let state = self.server.state.lock();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.is_between(self.viewer, peer) && !m.is_hidden_for(self.viewer))
            .cloned()
            .collect())
    }

    async fn mark_read(&self, message_id: u64) -> Result<()> {
        let mut state = self.server.state.lock();
        match state
            .messages
            .iter_mut()
            .find(|m| m.id == MessageId::Server(message_id))
        {
            Some(m) if m.receiver_id == self.viewer => {
                m.is_read = true;
                Ok(())
            }
            _ => Err(ChatError::rejected(404, "Message not found")),
        }
    }

    async fn edit_message(&self, message_id: u64, content: &str) -> Result<Message> {
        self.server.take_rejection()?;
        let mut state = self.server.state.lock();
        let Some(message) = state
            .messages
            .iter_mut()
            .find(|m| m.id == MessageId::Server(message_id))
        else {
            return Err(ChatError::rejected(404, "Message not found"));
        };
        if message.sender_id != self.viewer {
            return Err(ChatError::rejected(403, "You can only edit your own messages"));
        }
        message.content = content.to_string();
        let edited = message.clone();
        MockServer::fan_out(
            &state,
            &[edited.sender_id, edited.receiver_id],
            &InboundEvent::MessageEdited {
                message: edited.clone(),
            },
        );
        Ok(edited)
    }

    async fn delete_message(&self, message_id: u64, scope: DeleteScope) -> Result<()> {
        let delay = self.server.state.lock().delete_delays_ms.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.server.take_rejection()?;

        let mut state = self.server.state.lock();
        let id = MessageId::Server(message_id);
        let Some(position) = state.messages.iter().position(|m| m.id == id) else {
            return Err(ChatError::rejected(404, "Message not found"));
        };
        match scope {
            DeleteScope::Me => {
                state.messages[position].hide_for(self.viewer);
            }
            DeleteScope::All => {
                let message = state.messages.remove(position);
                MockServer::fan_out(
                    &state,
                    &[message.sender_id, message.receiver_id],
                    &InboundEvent::MessageDeleted { message_id: id },
                );
            }
        }
        Ok(())
    }

    async fn delete_conversation(&self, peer: UserId, scope: DeleteScope) -> Result<()> {
        let delay = self.server.state.lock().delete_delays_ms.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.server.take_rejection()?;

        let viewer = self.viewer;
        let mut state = self.server.state.lock();
        match scope {
            DeleteScope::Me => {
                for message in state
                    .messages
                    .iter_mut()
                    .filter(|m| m.is_between(viewer, peer))
                {
                    message.hide_for(viewer);
                }
            }
            DeleteScope::All => {
                state.messages.retain(|m| !m.is_between(viewer, peer));
                MockServer::fan_out(
                    &state,
                    &[viewer],
                    &InboundEvent::ChatDeleted {
                        other_user_id: peer,
                    },
                );
                MockServer::fan_out(
                    &state,
                    &[peer],
                    &InboundEvent::ChatDeleted {
                        other_user_id: viewer,
                    },
                );
            }
        }
        Ok(())
    }

    async fn search_users(&self, fragment: &str) -> Result<Vec<UserSummary>> {
        let mut state = self.server.state.lock();
        state.search_calls += 1;
        let needle = fragment.to_lowercase();
        Ok(state
            .users
            .iter()
            .filter(|u| u.username.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

pub struct MockConnector {
    server: MockServer,
    user: UserId,
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &url::Url) -> Result<Link> {
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        {
            let mut state = self.server.state.lock();
            *state.opens.entry(self.user).or_default() += 1;
            if token != format!("token-{}", self.user) {
                return Err(ChatError::Auth("socket upgrade rejected with status 401".into()));
            }
            if state.refuse_connections > 0 {
                state.refuse_connections -= 1;
                return Err(ChatError::TransientConnection("connection refused".into()));
            }
        }

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = async_channel::unbounded();
        self.server
            .state
            .lock()
            .links
            .entry(self.user)
            .or_default()
            .push(in_tx);

        let server = self.server.clone();
        let user = self.user;
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                server.handle_frame(user, &text);
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Let spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..30 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

pub fn ids(messages: &[Message]) -> Vec<MessageId> {
    messages.iter().map(|m| m.id).collect()
}
