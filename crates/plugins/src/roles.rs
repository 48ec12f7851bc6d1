//! Role protocols: one capability trait per plugin role.
//!
//! Roles form a closed set. Single-slot roles (everything except `tool`
//! and `function`) resolve to the highest-priority registration; the
//! multi-slot roles keep every registration and order by priority.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use weft_domain::event::Event;
use weft_domain::message::{
    ContextEntry, ContextPatch, SearchHit, ThreadHeader, ThreadMessage, ToolSchema, TurnInput,
};
use weft_domain::schema::{FilterSet, FindQuery, Record, StoreSchema};
use weft_domain::stream::{BoxStream, ModelEvent};
use weft_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Auth,
    Store,
    History,
    Context,
    Model,
    SystemPrompt,
    MessageProcessor,
    Tool,
    Function,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Auth => "auth",
            Role::Store => "store",
            Role::History => "history",
            Role::Context => "context",
            Role::Model => "model",
            Role::SystemPrompt => "system_prompt",
            Role::MessageProcessor => "message_processor",
            Role::Tool => "tool",
            Role::Function => "function",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Base contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle and identity shared by every plugin.
#[async_trait]
pub trait CorePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Higher wins for single-slot roles. For the middleware chain,
    /// `pre_call` runs highest-first, `filter_stream` and `post_call`
    /// lowest-first.
    fn priority(&self) -> u32 {
        0
    }

    /// Awaited on process stop.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single-slot roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tenant authentication and model access decisions.
#[async_trait]
pub trait AuthPlugin: CorePlugin {
    /// Returns the user id on success, `None` on bad credentials.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<String>>;

    async fn issue_token(&self, user_id: &str) -> Result<String>;

    /// Returns the user id the token belongs to, `None` if unknown.
    async fn verify_token(&self, token: &str) -> Result<Option<String>>;

    async fn authorize_model(&self, user_id: &str, model: &str) -> Result<bool>;
}

/// The multi-tenant tabular store. All operations are scoped by the
/// caller's `user_id`; no operation may return or modify another
/// tenant's records.
#[async_trait]
pub trait StorePlugin: CorePlugin {
    /// Idempotent. Adds missing columns to an existing store; a present
    /// field whose kind differs fails `SchemaConflict`. Returns whether
    /// the store was created by this call.
    async fn create_store_if_not_exists(&self, name: &str, schema: &StoreSchema) -> Result<bool>;

    async fn list_stores(&self) -> Result<Vec<String>>;

    /// Returns the assigned record id.
    async fn add(
        &self,
        user_id: &str,
        name: &str,
        data: Record,
        record_id: Option<String>,
    ) -> Result<String>;

    async fn get(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        load_collections: bool,
    ) -> Result<Option<Record>>;

    /// Partial update of non-collection fields. Returns `false` when
    /// the record does not exist for this tenant.
    async fn update(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        updates: Record,
    ) -> Result<bool>;

    async fn delete(&self, user_id: &str, name: &str, record_id: &str) -> Result<bool>;

    async fn find(&self, user_id: &str, name: &str, query: FindQuery) -> Result<Vec<Record>>;

    async fn count(&self, user_id: &str, name: &str, filters: &FilterSet) -> Result<u64>;

    /// Appends to an append-only collection field; returns the
    /// server-assigned order index (1-based, strictly increasing).
    async fn collection_append(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        field: &str,
        item: Value,
    ) -> Result<i64>;

    async fn collection_get(
        &self,
        user_id: &str,
        name: &str,
        record_id: &str,
        field: &str,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<Value>>;

    /// Rank-ordered full-text search over the store's indexable fields.
    async fn full_text_search(
        &self,
        user_id: &str,
        name: &str,
        query: &str,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<Record>>;
}

/// Thread + message log semantics over the store.
#[async_trait]
pub trait HistoryPlugin: CorePlugin {
    async fn create_thread(
        &self,
        user_id: &str,
        title: &str,
        model: &str,
        system_prompt: &str,
    ) -> Result<String>;

    async fn list_threads(&self, user_id: &str, archived: bool) -> Result<Vec<ThreadHeader>>;

    async fn get_thread(&self, user_id: &str, thread_id: &str) -> Result<Option<ThreadHeader>>;

    /// `None` when the thread does not exist for this tenant.
    async fn get_messages(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Option<Vec<ThreadMessage>>>;

    /// Returns `false` when the thread is not the caller's.
    async fn append_message(
        &self,
        user_id: &str,
        thread_id: &str,
        message: ThreadMessage,
    ) -> Result<bool>;

    async fn update_thread(
        &self,
        user_id: &str,
        thread_id: &str,
        title: Option<&str>,
    ) -> Result<bool>;

    async fn archive_thread(&self, user_id: &str, thread_id: &str) -> Result<bool>;

    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<bool>;

    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SearchHit>>;
}

/// The mutable model-visible conversation view per (thread, user).
#[async_trait]
pub trait ContextPlugin: CorePlugin {
    async fn get_context(
        &self,
        user_id: &str,
        thread_id: &str,
        strip_reasoning: bool,
    ) -> Result<Option<Vec<ContextEntry>>>;

    /// Rebuild from history. Increments the mutation counter.
    async fn regenerate_context(&self, user_id: &str, thread_id: &str)
        -> Result<Vec<ContextEntry>>;

    /// Appends an entry; assigns an id when `entry.id` is empty.
    /// Returns the entry id.
    async fn add_message(
        &self,
        user_id: &str,
        thread_id: &str,
        entry: ContextEntry,
    ) -> Result<String>;

    async fn update_message(
        &self,
        user_id: &str,
        thread_id: &str,
        message_id: &str,
        patch: ContextPatch,
    ) -> Result<bool>;

    async fn remove_messages(
        &self,
        user_id: &str,
        thread_id: &str,
        message_ids: &[String],
    ) -> Result<bool>;

    /// Atomic full replacement, for mutation-guarded background work.
    async fn set_context(
        &self,
        user_id: &str,
        thread_id: &str,
        entries: Vec<ContextEntry>,
    ) -> Result<()>;

    /// Drop the cached view; the next read regenerates from history.
    async fn invalidate(&self, user_id: &str, thread_id: &str) -> Result<()>;

    async fn mutation_count(&self, user_id: &str, thread_id: &str) -> Result<Option<u64>>;
}

/// A model adapter: lists models and streams completions.
#[async_trait]
pub trait ModelPlugin: CorePlugin {
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Stream one completion. `messages` is the model-visible context
    /// snapshot; `tools` is forwarded opaquely in the adapter's wire
    /// format.
    async fn stream(
        &self,
        messages: Vec<ContextEntry>,
        model: &str,
        system_prompt: Option<&str>,
        tools: &[ToolSchema],
    ) -> Result<BoxStream<'static, Result<ModelEvent>>>;
}

/// Resolves a system prompt key to its text.
#[async_trait]
pub trait SystemPromptPlugin: CorePlugin {
    async fn get_prompt(&self, key: &str) -> Result<Option<String>>;
}

/// The turn orchestrator role. Returns the event stream for one user
/// message; all work happens on a spawned task.
pub trait MessageProcessorPlugin: CorePlugin {
    fn process_message(&self, input: TurnInput) -> mpsc::Receiver<Event>;
}
