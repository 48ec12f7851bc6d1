//! Turn execution loop — the streaming state machine for one user
//! message.
//!
//! One turn: resolve the thread, persist the user message, run the
//! `pre_call` chain, then loop model rounds. Each round streams model
//! events (demultiplexed into assistant text, thinking text, and
//! per-call tool argument buffers), persists every artifact into
//! history, keeps the context cache coherent, and dispatches tool
//! calls through the R2R adapter. Rounds are bounded; exhaustion
//! surfaces as a single `error` event before `stream_end`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use weft_domain::config::RuntimeConfig;
use weft_domain::event::Event;
use weft_domain::message::{
    ContextEntry, ContextPatch, MessageRole, ThreadMessage, ToolCallRequest, TurnInput,
};
use weft_domain::stream::{ModelEvent, Usage};
use weft_domain::trace::TraceEvent;
use weft_domain::{Error, Result};
use weft_plugins::tool::is_error_envelope;
use weft_plugins::{
    AuthPlugin, CallParams, ContextPlugin, CorePlugin, HistoryPlugin, MessageProcessorPlugin,
    ModelPlugin, PluginRegistry, PostCall, SystemPromptPlugin, ToolInvocation, TurnRef,
};

use crate::cancel::{CancelMap, CancelToken};
use crate::tasks::BackgroundTasks;

/// The streaming state machine for user messages.
#[derive(Clone)]
pub struct TurnOrchestrator {
    registry: Arc<PluginRegistry>,
    cancels: Arc<CancelMap>,
    tasks: Arc<BackgroundTasks>,
    config: RuntimeConfig,
}

impl TurnOrchestrator {
    pub fn new(registry: Arc<PluginRegistry>, config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            cancels: Arc::new(CancelMap::new()),
            tasks: Arc::new(BackgroundTasks::new()),
            config,
        })
    }

    /// Abort a running turn by its correlation id (client disconnect).
    /// Background tasks already launched keep running.
    pub fn cancel_turn(&self, turn_id: &str) -> bool {
        self.cancels.cancel(turn_id)
    }

    /// The registry of background tasks launched by `post_call`
    /// middleware.
    pub fn background_tasks(&self) -> &Arc<BackgroundTasks> {
        &self.tasks
    }

    /// Stop accepting work and drain background tasks.
    pub async fn drain(&self) {
        self.tasks.shutdown().await;
    }
}

#[async_trait]
impl CorePlugin for TurnOrchestrator {
    fn name(&self) -> &str {
        "turn-orchestrator"
    }

    async fn shutdown(&self) -> Result<()> {
        self.drain().await;
        Ok(())
    }
}

impl MessageProcessorPlugin for TurnOrchestrator {
    fn process_message(&self, input: TurnInput) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel::<Event>(64);
        let turn_id = Uuid::new_v4().to_string();
        let cancel = self.cancels.register(&turn_id);
        let this = self.clone();

        tokio::spawn(async move {
            tracing::debug!(turn = %turn_id, user = %input.user_id, "turn started");
            let result = this.run_inner(&input, &turn_id, &tx, &cancel).await;

            if let Err(e) = result {
                tracing::warn!(turn = %turn_id, error = %e, kind = e.kind(), "turn failed");
                let ctx = TurnRef {
                    user_id: input.user_id.clone(),
                    thread_id: input.thread_id.clone().unwrap_or_default(),
                    turn_correlation_id: turn_id.clone(),
                };
                this.emit(&ctx, &tx, Event::error(&turn_id, e.to_string()), &cancel)
                    .await;
                this.emit(&ctx, &tx, Event::stream_end(&turn_id), &cancel)
                    .await;
            }

            this.cancels.remove(&turn_id);
        });

        rx
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream demux state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, PartialEq)]
enum Segment {
    Thinking,
    Response,
}

/// A tool call assembled from streamed deltas, keyed by the model's
/// per-round index.
#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl TurnOrchestrator {
    /// Pass one event through the filter chain and forward it. A closed
    /// receiver counts as a client disconnect and cancels the turn.
    async fn emit(&self, ctx: &TurnRef, tx: &mpsc::Sender<Event>, event: Event, cancel: &CancelToken) {
        if let Some(filtered) = self
            .registry
            .functions()
            .filter_stream(ctx, event, tx)
            .await
        {
            if tx.send(filtered).await.is_err() {
                cancel.cancel();
            }
        }
    }

    /// Persist a message, logging failures. Only the user message's
    /// persistence is turn-fatal; that path does not go through here.
    async fn persist(&self, user_id: &str, thread_id: &str, message: ThreadMessage) {
        let history = self.registry.history();
        match history.append_message(user_id, thread_id, message).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(thread_id, "history append rejected (thread gone?)");
            }
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "history append failed");
            }
        }
    }

    async fn run_inner(
        &self,
        input: &TurnInput,
        turn_id: &str,
        tx: &mpsc::Sender<Event>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let history = self.registry.history().clone();
        let context = self.registry.context().clone();
        let model_plugin = self.registry.model().clone();
        let user = input.user_id.as_str();

        // ── Resolve thread ───────────────────────────────────────────
        let thread_id = match &input.thread_id {
            Some(id) => {
                // Ownership check: absent-for-this-tenant is terminal.
                if history.get_messages(user, id).await?.is_none() {
                    return Err(Error::NotFound(format!("thread '{id}' not found")));
                }
                id.clone()
            }
            None => {
                let title = truncate_chars(&input.content, self.config.title_max_chars);
                history
                    .create_thread(
                        user,
                        &title,
                        input.model.as_deref().unwrap_or("default"),
                        input.system_prompt_key.as_deref().unwrap_or("default"),
                    )
                    .await?
            }
        };

        let ctx = TurnRef {
            user_id: user.to_owned(),
            thread_id: thread_id.clone(),
            turn_correlation_id: turn_id.to_owned(),
        };
        TraceEvent::TurnStarted {
            turn_correlation_id: turn_id.to_owned(),
            thread_id: thread_id.clone(),
        }
        .emit();

        self.emit(&ctx, tx, Event::thread_id(turn_id, &thread_id), cancel)
            .await;

        // ── Persist user message & update context ────────────────────
        // A store failure here aborts the turn: without the user message
        // on record the rest of the turn would be unaccounted for.
        if !history
            .append_message(
                user,
                &thread_id,
                ThreadMessage::text(MessageRole::User, &input.content),
            )
            .await?
        {
            return Err(Error::NotFound(format!("thread '{thread_id}' not found")));
        }

        match context.get_context(user, &thread_id, false).await? {
            // Invalidated or never built: the rebuilt view already
            // includes the user message just appended.
            None => {
                context.regenerate_context(user, &thread_id).await?;
            }
            Some(_) => {
                context
                    .add_message(user, &thread_id, ContextEntry::user(&input.content))
                    .await?;
            }
        }

        // ── Assemble call parameters ─────────────────────────────────
        let thread = history
            .get_thread(user, &thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread '{thread_id}' not found")))?;
        let model_name = input.model.clone().unwrap_or(thread.model);
        let prompt_key = input
            .system_prompt_key
            .clone()
            .unwrap_or(thread.system_prompt);

        let system_prompt = match self.registry.system_prompt().get_prompt(&prompt_key).await {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(key = %prompt_key, error = %e, "prompt lookup failed");
                None
            }
        };

        if !self
            .registry
            .auth()
            .authorize_model(user, &model_name)
            .await?
        {
            return Err(Error::PermissionDenied(format!(
                "user '{user}' may not use model '{model_name}'"
            )));
        }

        let mut params = CallParams {
            model: model_name,
            system_prompt,
            tools: self.registry.tools().schemas(),
            new_message: input.content.clone(),
        };

        // ── pre_call middleware ──────────────────────────────────────
        self.registry
            .functions()
            .pre_call(&ctx, &mut params, tx)
            .await;

        // ── Round loop ───────────────────────────────────────────────
        // Thinking rides along in context only while its tool round is
        // unresolved; these entries get their reasoning scrubbed once
        // the loop completes.
        let mut purge_reasoning: Vec<String> = Vec::new();
        let mut total_usage = Usage::default();

        for round in 0..self.config.max_tool_rounds {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let entries = context
                .get_context(user, &thread_id, true)
                .await?
                .unwrap_or_default();
            let mut stream = model_plugin
                .stream(
                    entries,
                    &params.model,
                    params.system_prompt.as_deref(),
                    &params.tools,
                )
                .await
                .map_err(|e| Error::Upstream(e.to_string()))?;

            let mut seg_thinking = String::new();
            let mut seg_response = String::new();
            let mut total_thinking = String::new();
            let mut total_response = String::new();
            let mut last_segment: Option<Segment> = None;
            let mut pending: BTreeMap<u32, PendingCall> = BTreeMap::new();

            while let Some(item) = stream.next().await {
                if cancel.is_cancelled() {
                    // Partial output already emitted stays on record.
                    self.persist_segments(user, &thread_id, &params.model, &seg_thinking, &seg_response)
                        .await;
                    return Ok(());
                }

                match item.map_err(|e| Error::Upstream(e.to_string()))? {
                    ModelEvent::ThinkingText { text } => {
                        self.emit(&ctx, tx, Event::thinking_tokens(turn_id, &text), cancel)
                            .await;
                        // Segment switch: close out the response run.
                        if last_segment == Some(Segment::Response) && !seg_response.is_empty() {
                            self.persist(
                                user,
                                &thread_id,
                                ThreadMessage::text(MessageRole::Assistant, &seg_response)
                                    .with_model(&params.model),
                            )
                            .await;
                            seg_response.clear();
                        }
                        seg_thinking.push_str(&text);
                        total_thinking.push_str(&text);
                        last_segment = Some(Segment::Thinking);
                    }
                    ModelEvent::AssistantText { text } => {
                        self.emit(&ctx, tx, Event::message_tokens(turn_id, &text), cancel)
                            .await;
                        if last_segment == Some(Segment::Thinking) && !seg_thinking.is_empty() {
                            self.persist(
                                user,
                                &thread_id,
                                ThreadMessage::text(MessageRole::Thinking, &seg_thinking),
                            )
                            .await;
                            seg_thinking.clear();
                        }
                        seg_response.push_str(&text);
                        total_response.push_str(&text);
                        last_segment = Some(Segment::Response);
                    }
                    // Raw deltas are accumulated, never forwarded.
                    ModelEvent::ToolCallDelta {
                        id,
                        index,
                        name_delta,
                        arguments_delta,
                    } => {
                        let call = pending.entry(index).or_default();
                        if let Some(id) = id {
                            if call.id.is_empty() {
                                call.id = id;
                            }
                        }
                        if let Some(delta) = name_delta {
                            call.name.push_str(&delta);
                        }
                        if let Some(delta) = arguments_delta {
                            call.arguments.push_str(&delta);
                        }
                    }
                    ModelEvent::Usage(usage) => {
                        total_usage.prompt_tokens += usage.prompt_tokens;
                        total_usage.completion_tokens += usage.completion_tokens;
                        total_usage.total_tokens += usage.total_tokens;
                    }
                    ModelEvent::End => break,
                }
            }

            self.persist_segments(user, &thread_id, &params.model, &seg_thinking, &seg_response)
                .await;

            let tool_calls: Vec<ToolCallRequest> = pending
                .into_values()
                .filter(|call| !call.name.is_empty())
                .map(|call| ToolCallRequest {
                    id: if call.id.is_empty() {
                        Uuid::new_v4().to_string()
                    } else {
                        call.id
                    },
                    name: call.name,
                    arguments: if call.arguments.trim().is_empty() {
                        "{}".to_owned()
                    } else {
                        call.arguments
                    },
                })
                .collect();

            // The round's assistant entry in context; pending tool
            // calls carry the reasoning until they resolve.
            let mut entry = ContextEntry::assistant(&total_response);
            if !tool_calls.is_empty() {
                entry.tool_calls = Some(tool_calls.clone());
                if !total_thinking.is_empty() {
                    entry.reasoning_content = Some(total_thinking.clone());
                }
            }
            let entry_id = context.add_message(user, &thread_id, entry).await?;
            if !tool_calls.is_empty() {
                purge_reasoning.push(entry_id);
            }

            // ── Finalize: no tool calls means this was the answer ────
            if tool_calls.is_empty() {
                for id in &purge_reasoning {
                    if let Err(e) = context
                        .update_message(user, &thread_id, id, ContextPatch::clear_reasoning())
                        .await
                    {
                        tracing::warn!(error = %e, "failed to scrub reasoning from context");
                    }
                }

                let mut outcome = PostCall {
                    assistant_content: total_response.clone(),
                    metadata: json!({
                        "model": params.model,
                        "rounds": round + 1,
                        "usage": total_usage,
                    }),
                };
                self.registry
                    .functions()
                    .post_call(&ctx, &mut outcome, tx)
                    .await;

                self.emit(&ctx, tx, Event::stream_end(turn_id), cancel).await;
                TraceEvent::TurnCompleted {
                    turn_correlation_id: turn_id.to_owned(),
                    rounds: round + 1,
                }
                .emit();
                return Ok(());
            }

            // ── Tool round ───────────────────────────────────────────
            for call in &tool_calls {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.dispatch_tool(&ctx, tx, cancel, call).await?;
            }
            // Back to the model with tool results in context.
        }

        Err(Error::ToolLoopExhausted(self.config.max_tool_rounds))
    }

    /// Execute one tool call end to end: announce it, stream progress,
    /// persist every update, and push the consolidated result into
    /// context. Tool failures land in the result envelope, never here.
    async fn dispatch_tool(
        &self,
        ctx: &TurnRef,
        tx: &mpsc::Sender<Event>,
        cancel: &CancelToken,
        call: &ToolCallRequest,
    ) -> Result<()> {
        let user = ctx.user_id.as_str();
        let thread_id = ctx.thread_id.as_str();
        let turn_id = ctx.turn_correlation_id.as_str();

        let called_line = format!("🔧 Calling {}({})", call.name, call.arguments);
        self.emit(ctx, tx, Event::tool_update(turn_id, &call.id, &called_line), cancel)
            .await;
        self.persist(user, thread_id, ThreadMessage::tool_update(&call.id, &called_line))
            .await;

        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    tool = %call.name,
                    error = %e,
                    "tool arguments are not valid JSON; defaulting to empty object"
                );
                json!({})
            }
        };

        let invocation = ToolInvocation {
            user_id: user.to_owned(),
            thread_id: thread_id.to_owned(),
            turn_correlation_id: turn_id.to_owned(),
        };
        let started = Instant::now();
        let mut r2r = self.registry.tools().invoke(
            &call.name,
            invocation,
            arguments,
            Duration::from_secs(self.config.tool_timeout_secs),
        );

        while let Some(progress) = r2r.next_progress().await {
            if cancel.is_cancelled() {
                return Ok(());
            }
            self.emit(ctx, tx, Event::tool_update(turn_id, &call.id, &progress), cancel)
                .await;
            self.persist(user, thread_id, ThreadMessage::tool_update(&call.id, &progress))
                .await;
        }

        let final_value = r2r.final_value().await;
        let is_error = is_error_envelope(&final_value);
        let result_text = match &final_value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        };

        let result_line = if is_error {
            format!(
                "❌ {}: {}",
                call.name,
                final_value["error"].as_str().unwrap_or("execution failed")
            )
        } else {
            format!(
                "✅ {}: {}",
                call.name,
                truncate_chars(&result_text, self.config.result_preview_chars)
            )
        };
        self.emit(ctx, tx, Event::tool_update(turn_id, &call.id, &result_line), cancel)
            .await;
        self.persist(user, thread_id, ThreadMessage::tool_update(&call.id, &result_line))
            .await;

        // One consolidated entry per call id; interim progress never
        // reaches model context.
        self.registry
            .context()
            .add_message(
                user,
                thread_id,
                ContextEntry::tool_result(&call.id, result_text),
            )
            .await?;

        TraceEvent::ToolDispatched {
            tool: call.name.clone(),
            call_id: call.id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            is_error,
        }
        .emit();

        Ok(())
    }

    /// Persist leftover thinking/response segments, thinking first.
    async fn persist_segments(
        &self,
        user: &str,
        thread_id: &str,
        model: &str,
        seg_thinking: &str,
        seg_response: &str,
    ) {
        if !seg_thinking.is_empty() {
            self.persist(
                user,
                thread_id,
                ThreadMessage::text(MessageRole::Thinking, seg_thinking),
            )
            .await;
        }
        if !seg_response.is_empty() {
            self.persist(
                user,
                thread_id,
                ThreadMessage::text(MessageRole::Assistant, seg_response).with_model(model),
            )
            .await;
        }
    }
}

/// Char-boundary-safe truncation with a trailing ellipsis marker.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}
