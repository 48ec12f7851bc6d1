//! The typed event envelope emitted to the transport.
//!
//! Wire shape is `{"event": "<kind>", "data": {…}}` with `timestamp`
//! and `turn_correlation_id` carried inside `data`. Transports render
//! the envelope however they like (SSE, websocket frames, …); the core
//! only produces the sequence.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single event in a turn's output stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    ThreadId {
        thread_id: String,
        timestamp: DateTime<Utc>,
        turn_correlation_id: String,
    },
    MessageTokens {
        content: String,
        timestamp: DateTime<Utc>,
        turn_correlation_id: String,
    },
    ThinkingTokens {
        content: String,
        timestamp: DateTime<Utc>,
        turn_correlation_id: String,
    },
    ToolUpdate {
        call_id: String,
        content: String,
        timestamp: DateTime<Utc>,
        turn_correlation_id: String,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
        turn_correlation_id: String,
    },
    StreamEnd {
        timestamp: DateTime<Utc>,
        turn_correlation_id: String,
    },
}

impl Event {
    pub fn thread_id(turn_id: &str, thread_id: impl Into<String>) -> Self {
        Event::ThreadId {
            thread_id: thread_id.into(),
            timestamp: Utc::now(),
            turn_correlation_id: turn_id.to_owned(),
        }
    }

    pub fn message_tokens(turn_id: &str, content: impl Into<String>) -> Self {
        Event::MessageTokens {
            content: content.into(),
            timestamp: Utc::now(),
            turn_correlation_id: turn_id.to_owned(),
        }
    }

    pub fn thinking_tokens(turn_id: &str, content: impl Into<String>) -> Self {
        Event::ThinkingTokens {
            content: content.into(),
            timestamp: Utc::now(),
            turn_correlation_id: turn_id.to_owned(),
        }
    }

    pub fn tool_update(
        turn_id: &str,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Event::ToolUpdate {
            call_id: call_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            turn_correlation_id: turn_id.to_owned(),
        }
    }

    pub fn error(turn_id: &str, message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
            timestamp: Utc::now(),
            turn_correlation_id: turn_id.to_owned(),
        }
    }

    pub fn stream_end(turn_id: &str) -> Self {
        Event::StreamEnd {
            timestamp: Utc::now(),
            turn_correlation_id: turn_id.to_owned(),
        }
    }

    /// Wire kind tag for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ThreadId { .. } => "thread_id",
            Event::MessageTokens { .. } => "message_tokens",
            Event::ThinkingTokens { .. } => "thinking_tokens",
            Event::ToolUpdate { .. } => "tool_update",
            Event::Error { .. } => "error",
            Event::StreamEnd { .. } => "stream_end",
        }
    }

    /// Mutable access to the streamed text payload, where one exists.
    /// This is what `filter_stream` middleware typically rewrites.
    pub fn content_mut(&mut self) -> Option<&mut String> {
        match self {
            Event::MessageTokens { content, .. }
            | Event::ThinkingTokens { content, .. }
            | Event::ToolUpdate { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Event::MessageTokens { content, .. }
            | Event::ThinkingTokens { content, .. }
            | Event::ToolUpdate { content, .. } => Some(content),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape_is_event_plus_data() {
        let ev = Event::message_tokens("t-1", "Hi!");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "message_tokens");
        assert_eq!(json["data"]["content"], "Hi!");
        assert_eq!(json["data"]["turn_correlation_id"], "t-1");
        assert!(json["data"]["timestamp"].is_string());
    }

    #[test]
    fn tool_update_carries_call_id() {
        let ev = Event::tool_update("t-1", "c1", "✅ add: 5");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "tool_update");
        assert_eq!(json["data"]["call_id"], "c1");
    }

    #[test]
    fn stream_end_has_no_extra_fields() {
        let ev = Event::stream_end("t-1");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "stream_end");
        let data = json["data"].as_object().unwrap();
        assert_eq!(data.len(), 2); // timestamp + turn_correlation_id
    }

    #[test]
    fn content_mut_rewrites_payload() {
        let mut ev = Event::message_tokens("t-1", "hello");
        *ev.content_mut().unwrap() = "HELLO".into();
        assert_eq!(ev.content(), Some("HELLO"));
        assert!(Event::stream_end("t-1").content().is_none());
    }

    #[test]
    fn kind_tags_match_wire_names() {
        assert_eq!(Event::thread_id("t", "x").kind(), "thread_id");
        assert_eq!(Event::error("t", "boom").kind(), "error");
        assert_eq!(Event::thinking_tokens("t", "…").kind(), "thinking_tokens");
    }
}
