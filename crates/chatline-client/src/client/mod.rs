//! Network-facing half of the client: configuration, transports, the
//! connection lifecycle and the session object that ties everything together.

mod config;
pub mod connection;
pub mod http_api;
mod notice;
pub mod retry;
mod session;
mod utils;
pub mod ws_network;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState, EventStream};
pub use http_api::HttpChatApi;
pub use notice::{notice_channel, Notice, NoticeKind, NoticeSink};
pub use retry::{parse_retry_after, Failure, RetryConfig, RetryDecision, RetryState};
pub use session::ChatClient;
pub use utils::*;
pub use ws_network::WsConnector;
