//! Client core for real-time direct messaging.
//!
//! Keeps a live, duplicate-free view of a two-party conversation in sync
//! with the server over a persistent socket, while letting the user send,
//! edit and delete optimistically. REST calls go through [`ChatApi`], the
//! socket through [`Connector`]; both have production implementations
//! ([`HttpChatApi`], [`WsConnector`]) and can be replaced in tests.

pub mod client;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod traits;
pub mod types;

pub use client::{
    ChatClient, ClientConfig, ConnectionManager, ConnectionState, HttpChatApi, Notice,
    NoticeKind, WsConnector,
};
pub use error::{ChatError, Result};
pub use protocol::{InboundEvent, OutboundFrame};
pub use scheduler::{RequestSlot, RequestToken, Scheduler, TaskHandle, TaskSlot};
pub use state::{
    ConversationIndex, DeletionCoordinator, MessageStore, PresenceTypingTracker, Reconciled,
    RefreshOutcome,
};
pub use traits::{ChatApi, Connector, Link};
pub use types::{
    Conversation, DeleteScope, Draft, Identity, Message, MessageId, UserId, UserSummary,
    ViewerRole,
};
