//! Message shapes: the persisted history log entry, the model-visible
//! context entry, tool call/ schema types, and turn input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Thinking,
    Tool,
}

/// Whether the message is conversational text or a tool progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    MessageText,
    ToolUpdate,
}

/// One immutable entry in a thread's append-only message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Correlates tool progress lines with the model's tool call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl ThreadMessage {
    /// A plain conversational message.
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            kind: MessageKind::MessageText,
            content: content.into(),
            timestamp: Utc::now(),
            model: None,
            call_id: None,
        }
    }

    /// A tool progress/result line bound to a call id.
    pub fn tool_update(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            kind: MessageKind::ToolUpdate,
            content: content.into(),
            timestamp: Utc::now(),
            model: None,
            call_id: Some(call_id.into()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Thread metadata returned by listing/lookup operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadHeader {
    pub id: String,
    pub title: String,
    pub model: String,
    pub system_prompt: String,
    pub created_at: String,
    pub is_archived: bool,
}

/// One hit from a history search: the thread plus a snippet around the
/// first match.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub thread_id: String,
    pub title: String,
    pub snippet: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model, assembled from streamed deltas.
/// `arguments` stays a raw JSON string until the call is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One entry in the model-visible conversation view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Server-assigned id, used for in-place updates and removal.
    pub id: String,
    pub role: ContextRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ContextEntry {
    pub fn new(role: ContextRole, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            reasoning_content: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ContextRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ContextRole::Assistant, content)
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut entry = Self::new(ContextRole::Tool, content);
        entry.tool_call_id = Some(call_id.into());
        entry
    }

    /// Copy without the reasoning payload (the model-facing default).
    pub fn stripped(&self) -> Self {
        let mut clone = self.clone();
        clone.reasoning_content = None;
        clone
    }
}

/// Field-level patch for `update_message`.
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    pub content: Option<String>,
    pub reasoning_content: Patch<String>,
    pub tool_calls: Patch<Vec<ToolCallRequest>>,
}

impl ContextPatch {
    /// Patch that removes the reasoning payload and nothing else.
    pub fn clear_reasoning() -> Self {
        Self {
            reasoning_content: Patch::Clear,
            ..Default::default()
        }
    }
}

/// Three-way field update: leave untouched, remove, or replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    /// Apply onto an optional field in place.
    pub fn apply(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *slot = None,
            Patch::Set(v) => *slot = Some(v),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool schema & turn input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool description forwarded opaquely to the model adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// Input to a single turn of the orchestrator.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub user_id: String,
    pub content: String,
    /// Absent = create a new thread titled from the message.
    pub thread_id: Option<String>,
    /// Model override; `None` falls back to the thread's model.
    pub model: Option<String>,
    /// System prompt key override; `None` falls back to the thread's.
    pub system_prompt_key: Option<String>,
}
