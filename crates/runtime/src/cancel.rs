//! Per-turn cancellation tokens.
//!
//! Each running turn registers a `CancelToken` under its correlation
//! id. Cancelling aborts only that turn's generator; already-launched
//! background tasks are untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token polled by the turn loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Active cancellation tokens, keyed by turn correlation id.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a turn.
    pub fn register(&self, turn_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(turn_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running turn. Returns true if a token was found.
    pub fn cancel(&self, turn_id: &str) -> bool {
        match self.tokens.lock().get(turn_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token (called when a turn completes).
    pub fn remove(&self, turn_id: &str) {
        self.tokens.lock().remove(turn_id);
    }

    /// Whether the turn is still registered (running).
    pub fn is_running(&self, turn_id: &str) -> bool {
        self.tokens.lock().contains_key(turn_id)
    }
}
