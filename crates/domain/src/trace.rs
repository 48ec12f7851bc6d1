use serde::Serialize;

/// Structured trace events emitted across all Weft crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    StoreOpened {
        path: String,
        stores: usize,
    },
    StoreCreated {
        store: String,
        created: bool,
    },
    WriteRetried {
        attempt: u32,
        delay_ms: u64,
    },
    ThreadCreated {
        thread_id: String,
        user_id: String,
    },
    TurnStarted {
        turn_correlation_id: String,
        thread_id: String,
    },
    TurnCompleted {
        turn_correlation_id: String,
        rounds: usize,
    },
    ToolDispatched {
        tool: String,
        call_id: String,
        duration_ms: u64,
        is_error: bool,
    },
    ContextRegenerated {
        thread_id: String,
        entries: usize,
    },
    BackgroundTaskSpawned {
        name: String,
    },
    BackgroundTaskFinished {
        name: String,
        ok: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "weft_event");
    }
}
