//! [`ContextCache`] — the mutable model-visible view of each
//! conversation, with a monotone mutation counter.
//!
//! One slot per (user, thread) behind an in-memory map. Invalidation
//! drops the cached list but keeps the slot's counter, so monotonicity
//! per key survives regeneration. Background tasks read the counter,
//! do their work, re-read, and abort on interference before writing
//! through `set_context`.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use weft_domain::message::{
    ContextEntry, ContextPatch, ContextRole, MessageKind, MessageRole, ThreadMessage,
};
use weft_domain::trace::TraceEvent;
use weft_domain::Result;
use weft_plugins::{ContextPlugin, CorePlugin, HistoryPlugin};

#[derive(Default)]
struct Slot {
    entries: Option<Vec<ContextEntry>>,
    mutation_count: u64,
}

/// Per-(user, thread) context slots over the history plugin.
pub struct ContextCache {
    history: Arc<dyn HistoryPlugin>,
    slots: RwLock<HashMap<(String, String), Slot>>,
}

impl ContextCache {
    pub fn new(history: Arc<dyn HistoryPlugin>) -> Self {
        Self {
            history,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn key(user_id: &str, thread_id: &str) -> (String, String) {
        (user_id.to_owned(), thread_id.to_owned())
    }

    fn ensure_id(entry: &mut ContextEntry) -> String {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        entry.id.clone()
    }
}

/// Project the append-only history into the model-visible view.
///
/// - `user`/`assistant` text messages become plain entries.
/// - `thinking` is never projected: by the time a context is
///   regenerated every tool round has resolved, and resolved rounds
///   carry no reasoning.
/// - tool progress lines collapse to a single `{role: tool,
///   tool_call_id}` entry per call id holding the final line; interim
///   updates are overwritten in place.
pub fn project_history(messages: &[ThreadMessage]) -> Vec<ContextEntry> {
    let mut entries: Vec<ContextEntry> = Vec::new();
    let mut tool_slots: HashMap<String, usize> = HashMap::new();

    for message in messages {
        match message.role {
            MessageRole::User if message.kind == MessageKind::MessageText => {
                let mut entry = ContextEntry::user(&message.content);
                entry.id = Uuid::new_v4().to_string();
                entries.push(entry);
            }
            MessageRole::Assistant if message.kind == MessageKind::MessageText => {
                let mut entry = ContextEntry::assistant(&message.content);
                entry.id = Uuid::new_v4().to_string();
                entries.push(entry);
            }
            MessageRole::Tool => {
                let (Some(call_id), MessageKind::ToolUpdate) = (&message.call_id, message.kind)
                else {
                    continue;
                };
                match tool_slots.get(call_id) {
                    Some(&index) => {
                        entries[index].content = message.content.clone();
                    }
                    None => {
                        let mut entry = ContextEntry::tool_result(call_id, &message.content);
                        entry.id = Uuid::new_v4().to_string();
                        tool_slots.insert(call_id.clone(), entries.len());
                        entries.push(entry);
                    }
                }
            }
            MessageRole::Thinking => {}
            _ => {}
        }
    }

    entries
}

#[async_trait]
impl CorePlugin for ContextCache {
    fn name(&self) -> &str {
        "context-cache"
    }
}

#[async_trait]
impl ContextPlugin for ContextCache {
    async fn get_context(
        &self,
        user_id: &str,
        thread_id: &str,
        strip_reasoning: bool,
    ) -> Result<Option<Vec<ContextEntry>>> {
        let slots = self.slots.read();
        let Some(entries) = slots
            .get(&Self::key(user_id, thread_id))
            .and_then(|slot| slot.entries.as_ref())
        else {
            return Ok(None);
        };
        let snapshot = if strip_reasoning {
            entries.iter().map(ContextEntry::stripped).collect()
        } else {
            entries.clone()
        };
        Ok(Some(snapshot))
    }

    async fn regenerate_context(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Vec<ContextEntry>> {
        let messages = self
            .history
            .get_messages(user_id, thread_id)
            .await?
            .unwrap_or_default();
        let entries = project_history(&messages);

        let mut slots = self.slots.write();
        let slot = slots.entry(Self::key(user_id, thread_id)).or_default();
        slot.entries = Some(entries.clone());
        slot.mutation_count += 1;

        TraceEvent::ContextRegenerated {
            thread_id: thread_id.to_owned(),
            entries: entries.len(),
        }
        .emit();
        Ok(entries)
    }

    async fn add_message(
        &self,
        user_id: &str,
        thread_id: &str,
        mut entry: ContextEntry,
    ) -> Result<String> {
        let id = Self::ensure_id(&mut entry);
        let mut slots = self.slots.write();
        let slot = slots.entry(Self::key(user_id, thread_id)).or_default();
        slot.entries.get_or_insert_with(Vec::new).push(entry);
        slot.mutation_count += 1;
        Ok(id)
    }

    async fn update_message(
        &self,
        user_id: &str,
        thread_id: &str,
        message_id: &str,
        patch: ContextPatch,
    ) -> Result<bool> {
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(&Self::key(user_id, thread_id)) else {
            return Ok(false);
        };
        let Some(entries) = slot.entries.as_mut() else {
            return Ok(false);
        };
        let Some(entry) = entries.iter_mut().find(|e| e.id == message_id) else {
            return Ok(false);
        };

        if let Some(content) = patch.content {
            entry.content = content;
        }
        patch.reasoning_content.apply(&mut entry.reasoning_content);
        patch.tool_calls.apply(&mut entry.tool_calls);
        slot.mutation_count += 1;
        Ok(true)
    }

    async fn remove_messages(
        &self,
        user_id: &str,
        thread_id: &str,
        message_ids: &[String],
    ) -> Result<bool> {
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(&Self::key(user_id, thread_id)) else {
            return Ok(false);
        };
        let Some(entries) = slot.entries.as_mut() else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| !message_ids.contains(&e.id));
        if entries.len() == before {
            return Ok(false);
        }
        slot.mutation_count += 1;
        Ok(true)
    }

    async fn set_context(
        &self,
        user_id: &str,
        thread_id: &str,
        mut entries: Vec<ContextEntry>,
    ) -> Result<()> {
        for entry in &mut entries {
            Self::ensure_id(entry);
        }
        let mut slots = self.slots.write();
        let slot = slots.entry(Self::key(user_id, thread_id)).or_default();
        slot.entries = Some(entries);
        slot.mutation_count += 1;
        Ok(())
    }

    async fn invalidate(&self, user_id: &str, thread_id: &str) -> Result<()> {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(&Self::key(user_id, thread_id)) {
            slot.entries = None;
            slot.mutation_count += 1;
        }
        Ok(())
    }

    async fn mutation_count(&self, user_id: &str, thread_id: &str) -> Result<Option<u64>> {
        Ok(self
            .slots
            .read()
            .get(&Self::key(user_id, thread_id))
            .map(|slot| slot.mutation_count))
    }
}
