pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::Conversation;
pub use message::{DeleteScope, Draft, Message, MessageId, ViewerRole};
pub use user::{Identity, UserId, UserSummary};
