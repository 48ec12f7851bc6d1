//! Configuration sections for the backend core.
//!
//! The core never loads configuration itself — the embedding transport
//! deserializes these structs from whatever source it prefers. Every
//! field has a serde default so a partial (or empty) document is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// System prompt library for the default prompt plugin (key -> text).
    #[serde(default)]
    pub prompts: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "d_db_path")]
    pub db_path: PathBuf,

    /// Maximum attempts for a write transaction that keeps hitting
    /// SQLITE_BUSY before the error surfaces to the caller.
    #[serde(default = "d_busy_max_retries")]
    pub busy_max_retries: u32,

    /// Base delay for the exponential backoff, in milliseconds.
    #[serde(default = "d_busy_base_delay_ms")]
    pub busy_base_delay_ms: u64,

    /// Upper bound on a single backoff sleep, in milliseconds.
    #[serde(default = "d_busy_max_delay_ms")]
    pub busy_max_delay_ms: u64,

    /// Random jitter added to each backoff sleep, in milliseconds.
    #[serde(default = "d_busy_jitter_ms")]
    pub busy_jitter_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: d_db_path(),
            busy_max_retries: d_busy_max_retries(),
            busy_base_delay_ms: d_busy_base_delay_ms(),
            busy_max_delay_ms: d_busy_max_delay_ms(),
            busy_jitter_ms: d_busy_jitter_ms(),
        }
    }
}

fn d_db_path() -> PathBuf {
    PathBuf::from("weft.db")
}
fn d_busy_max_retries() -> u32 {
    7
}
fn d_busy_base_delay_ms() -> u64 {
    20
}
fn d_busy_max_delay_ms() -> u64 {
    2_000
}
fn d_busy_jitter_ms() -> u64 {
    1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum model rounds inside one turn before the orchestrator
    /// gives up with a tool-loop-exhausted error.
    #[serde(default = "d_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Wall-clock cap on a single tool invocation, in seconds.
    #[serde(default = "d_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Thread titles derived from the first user message are truncated
    /// to this many characters.
    #[serde(default = "d_title_max_chars")]
    pub title_max_chars: usize,

    /// Tool results longer than this are truncated in tool_update lines
    /// (the full value still reaches the model context).
    #[serde(default = "d_result_preview_chars")]
    pub result_preview_chars: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: d_max_tool_rounds(),
            tool_timeout_secs: d_tool_timeout_secs(),
            title_max_chars: d_title_max_chars(),
            result_preview_chars: d_result_preview_chars(),
        }
    }
}

fn d_max_tool_rounds() -> usize {
    8
}
fn d_tool_timeout_secs() -> u64 {
    60
}
fn d_title_max_chars() -> usize {
    50
}
fn d_result_preview_chars() -> usize {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.store.busy_max_retries, 7);
        assert_eq!(cfg.store.busy_base_delay_ms, 20);
        assert_eq!(cfg.runtime.max_tool_rounds, 8);
        assert_eq!(cfg.runtime.title_max_chars, 50);
        assert!(cfg.prompts.is_empty());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"runtime": {"max_tool_rounds": 3}}"#).unwrap();
        assert_eq!(cfg.runtime.max_tool_rounds, 3);
        assert_eq!(cfg.runtime.tool_timeout_secs, 60);
    }
}
