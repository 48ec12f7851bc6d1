//! Streaming contracts: the boxed stream alias and the event shape a
//! model adapter must produce.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for model and tool streaming.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events yielded by a model adapter during one completion.
///
/// The orchestrator demultiplexes these into assistant text, thinking
/// text, and per-call tool argument buffers. `ToolCallDelta` events are
/// never forwarded raw to the transport.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// A chunk of assistant-visible text.
    AssistantText { text: String },

    /// A chunk of reasoning/thinking text.
    ThinkingText { text: String },

    /// Incremental tool-call data. `index` orders concurrent calls
    /// within the round; `id` arrives with the first delta for a call.
    ToolCallDelta {
        id: Option<String>,
        index: u32,
        name_delta: Option<String>,
        arguments_delta: Option<String>,
    },

    /// Token accounting, if the adapter reports it.
    Usage(Usage),

    /// The completion is finished.
    End,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
