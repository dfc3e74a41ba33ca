//! Inbound frame parser.
//!
//! The server flushes queued writes into a single socket frame separated by
//! `\n`, so one frame may hold several JSON payloads.

use crate::error::{ChatError, Result};
use crate::protocol::InboundEvent;

/// Parse every newline-separated payload of a text frame.
pub fn parse_frame(text: &str) -> Vec<Result<InboundEvent>> {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str::<InboundEvent>(line).map_err(|e| {
                let preview: String = line.chars().take(80).collect();
                ChatError::MalformedFrame(format!("{} ({})", e, preview))
            })
        })
        .collect()
}

/// Stateful wrapper that drops malformed payloads and counts them.
#[derive(Debug, Default)]
pub struct FrameParser {
    pub parsed: u64,
    pub malformed: u64,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, text: &str) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        for result in parse_frame(text) {
            match result {
                Ok(InboundEvent::Unknown) => {
                    tracing::debug!("[Protocol] Ignoring event with unknown type");
                }
                Ok(event) => {
                    self.parsed += 1;
                    events.push(event);
                }
                Err(e) => {
                    self.malformed += 1;
                    tracing::warn!("[Protocol] Dropping frame: {}", e);
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    #[test]
    fn test_batched_frame() {
        let frame = "{\"type\":\"typing\",\"user_id\":3}\n{\"type\":\"stop_typing\",\"user_id\":3}\n";
        let events: Vec<_> = parse_frame(frame).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                InboundEvent::Typing { user_id: UserId(3) },
                InboundEvent::StopTyping { user_id: UserId(3) },
            ]
        );
    }

    #[test]
    fn test_malformed_dropped_rest_kept() {
        let mut parser = FrameParser::new();
        let frame = "{not json\n{\"type\":\"message_deleted\",\"message_id\":9}\n{\"type\":\"mystery\"}";
        let events = parser.feed(frame);
        assert_eq!(events.len(), 1);
        assert_eq!(parser.malformed, 1);
        assert_eq!(parser.parsed, 1);
    }

    #[test]
    fn test_missing_fields_is_malformed() {
        let results = parse_frame(r#"{"type":"new_message"}"#);
        assert!(matches!(results[0], Err(ChatError::MalformedFrame(_))));
    }
}
