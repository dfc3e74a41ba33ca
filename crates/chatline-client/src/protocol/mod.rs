//! Socket wire protocol: typed inbound events and outbound frames.

pub mod events;
pub mod parser;

pub use events::{InboundEvent, OutboundFrame};
pub use parser::{parse_frame, FrameParser};
