//! [`HistoryLog`] — thread + message semantics over the tabular store.
//!
//! Threads live in the `threads` store; each thread's messages are its
//! append-only `messages` collection. Tenancy comes entirely from the
//! store's `user_id` enforcement.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use weft_domain::message::{SearchHit, ThreadHeader, ThreadMessage};
use weft_domain::schema::{FieldKind, FilterSet, FindQuery, Record, StoreSchema};
use weft_domain::trace::TraceEvent;
use weft_domain::{Error, Result};
use weft_plugins::{CorePlugin, HistoryPlugin, StorePlugin};

pub const THREADS_STORE: &str = "threads";

/// Characters of context kept on either side of a search match.
const SNIPPET_RADIUS: usize = 60;
const SEARCH_LIMIT: u64 = 50;

fn thread_schema() -> StoreSchema {
    StoreSchema::new()
        .field("title", FieldKind::Text)
        .field("model", FieldKind::Text)
        .field("system_prompt", FieldKind::Text)
        .field("is_archived", FieldKind::Bool)
        .field("messages", FieldKind::JsonCollection)
}

/// Thread/message log backed by the store plugin.
pub struct HistoryLog {
    store: Arc<dyn StorePlugin>,
}

impl HistoryLog {
    /// Ensure the `threads` store exists and return the log.
    pub async fn open(store: Arc<dyn StorePlugin>) -> Result<Self> {
        store
            .create_store_if_not_exists(THREADS_STORE, &thread_schema())
            .await?;
        Ok(Self { store })
    }

    fn header_from_record(record: &Record) -> Option<ThreadHeader> {
        Some(ThreadHeader {
            id: record.get("id")?.as_str()?.to_owned(),
            title: record.get("title")?.as_str().unwrap_or_default().to_owned(),
            model: record.get("model")?.as_str().unwrap_or_default().to_owned(),
            system_prompt: record
                .get("system_prompt")?
                .as_str()
                .unwrap_or_default()
                .to_owned(),
            created_at: record
                .get("created_at")?
                .as_str()
                .unwrap_or_default()
                .to_owned(),
            is_archived: record
                .get("is_archived")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

#[async_trait]
impl CorePlugin for HistoryLog {
    fn name(&self) -> &str {
        "history-log"
    }
}

#[async_trait]
impl HistoryPlugin for HistoryLog {
    async fn create_thread(
        &self,
        user_id: &str,
        title: &str,
        model: &str,
        system_prompt: &str,
    ) -> Result<String> {
        let mut data = Record::new();
        data.insert("title".into(), json!(title));
        data.insert("model".into(), json!(model));
        data.insert("system_prompt".into(), json!(system_prompt));
        data.insert("is_archived".into(), json!(false));

        let thread_id = self.store.add(user_id, THREADS_STORE, data, None).await?;
        TraceEvent::ThreadCreated {
            thread_id: thread_id.clone(),
            user_id: user_id.to_owned(),
        }
        .emit();
        Ok(thread_id)
    }

    async fn list_threads(&self, user_id: &str, archived: bool) -> Result<Vec<ThreadHeader>> {
        let records = self
            .store
            .find(
                user_id,
                THREADS_STORE,
                FindQuery::new()
                    .filters(FilterSet::new().eq("is_archived", json!(archived)))
                    .order_by("created_at", true),
            )
            .await?;
        Ok(records
            .iter()
            .filter_map(Self::header_from_record)
            .collect())
    }

    async fn get_thread(&self, user_id: &str, thread_id: &str) -> Result<Option<ThreadHeader>> {
        let record = self
            .store
            .get(user_id, THREADS_STORE, thread_id, false)
            .await?;
        Ok(record.as_ref().and_then(Self::header_from_record))
    }

    async fn get_messages(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Option<Vec<ThreadMessage>>> {
        if self.get_thread(user_id, thread_id).await?.is_none() {
            return Ok(None);
        }
        let items = self
            .store
            .collection_get(user_id, THREADS_STORE, thread_id, "messages", None, 0)
            .await?;
        let mut messages = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<ThreadMessage>(item) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(thread_id, error = %e, "skipping malformed message");
                }
            }
        }
        Ok(Some(messages))
    }

    async fn append_message(
        &self,
        user_id: &str,
        thread_id: &str,
        message: ThreadMessage,
    ) -> Result<bool> {
        let item = serde_json::to_value(&message)?;
        match self
            .store
            .collection_append(user_id, THREADS_STORE, thread_id, "messages", item)
            .await
        {
            Ok(_) => {
                tracing::debug!(thread_id, role = ?message.role, "message appended");
                Ok(true)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn update_thread(
        &self,
        user_id: &str,
        thread_id: &str,
        title: Option<&str>,
    ) -> Result<bool> {
        let Some(title) = title else {
            return Ok(true);
        };
        let mut updates = Record::new();
        updates.insert("title".into(), json!(title));
        self.store
            .update(user_id, THREADS_STORE, thread_id, updates)
            .await
    }

    async fn archive_thread(&self, user_id: &str, thread_id: &str) -> Result<bool> {
        let mut updates = Record::new();
        updates.insert("is_archived".into(), json!(true));
        self.store
            .update(user_id, THREADS_STORE, thread_id, updates)
            .await
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<bool> {
        self.store.delete(user_id, THREADS_STORE, thread_id).await
    }

    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SearchHit>> {
        // Title and message-content matches land in the same per-store
        // FTS table; the store already dedupes by thread and preserves
        // rank order.
        let records = self
            .store
            .full_text_search(user_id, THREADS_STORE, query, Some(SEARCH_LIMIT), 0)
            .await?;

        let mut hits = Vec::with_capacity(records.len());
        for record in &records {
            let Some(header) = Self::header_from_record(record) else {
                continue;
            };

            let snippet = match snippet_around(&header.title, query) {
                Some(s) => s,
                None => self
                    .message_snippet(user_id, &header.id, query)
                    .await?
                    .unwrap_or_else(|| header.title.clone()),
            };

            hits.push(SearchHit {
                thread_id: header.id,
                title: header.title,
                snippet,
            });
        }
        Ok(hits)
    }
}

impl HistoryLog {
    /// First message whose content contains the query, as a snippet.
    async fn message_snippet(
        &self,
        user_id: &str,
        thread_id: &str,
        query: &str,
    ) -> Result<Option<String>> {
        let items = self
            .store
            .collection_get(user_id, THREADS_STORE, thread_id, "messages", None, 0)
            .await?;
        for item in items {
            if let Some(content) = item.get("content").and_then(Value::as_str) {
                if let Some(snippet) = snippet_around(content, query) {
                    return Ok(Some(snippet));
                }
            }
        }
        Ok(None)
    }
}

/// ±N characters around the first case-insensitive occurrence of
/// `query`, with ellipses where text was cut. `None` when absent
/// (stemmed FTS matches may not be literal substrings).
fn snippet_around(text: &str, query: &str) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    let pos = text.to_lowercase().find(&query.to_lowercase())?;
    let pos = floor_char_boundary(text, pos.min(text.len()));

    let start = floor_char_boundary(text, pos.saturating_sub(SNIPPET_RADIUS));
    let end = ceil_char_boundary(text, (pos + query.len() + SNIPPET_RADIUS).min(text.len()));

    let mut snippet = String::new();
    if start > 0 {
        snippet.push('…');
    }
    snippet.push_str(&text[start..end]);
    if end < text.len() {
        snippet.push('…');
    }
    Some(snippet)
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
