//! Client-side state: the active conversation, the conversation list,
//! presence indicators and the delete workflow.

pub mod deletion;
pub mod index;
pub mod presence;
pub mod store;

pub use deletion::DeletionCoordinator;
pub use index::{ConversationIndex, RefreshOutcome};
pub use presence::PresenceTypingTracker;
pub use store::{MessageStore, Reconciled};
