//! Middleware ("function") plugins — three optional hooks around a turn.
//!
//! `pre_call` runs highest-priority first and may mutate the call
//! parameters in place; `filter_stream` and `post_call` run
//! lowest-priority first so transforms layer outwards. Hook failures
//! are logged and never abort the turn.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use weft_domain::event::Event;
use weft_domain::message::ToolSchema;
use weft_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Correlation data for one turn, shared by all hooks.
#[derive(Debug, Clone)]
pub struct TurnRef {
    pub user_id: String,
    pub thread_id: String,
    pub turn_correlation_id: String,
}

/// The model-call parameters `pre_call` middleware may rewrite.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub model: String,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSchema>,
    pub new_message: String,
}

/// What `post_call` middleware sees after the final model round.
#[derive(Debug, Clone)]
pub struct PostCall {
    pub assistant_content: String,
    pub metadata: Value,
}

/// Streams middleware progress lines to the client as `tool_update`
/// events under a synthetic per-plugin call id.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<Event>,
    call_id: String,
    turn_id: String,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<Event>, call_id: String, turn_id: String) -> Self {
        Self {
            tx,
            call_id,
            turn_id,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Emit one progress line. Send failures (client gone) are ignored.
    pub async fn update(&self, line: impl Into<String>) {
        let _ = self
            .tx
            .send(Event::tool_update(&self.turn_id, &self.call_id, line))
            .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The plugin trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A middleware plugin. All hooks are optional; defaults pass through.
#[async_trait]
pub trait FunctionPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> u32 {
        0
    }

    /// Runs before the first model round. May mutate `params` in place.
    async fn pre_call(
        &self,
        ctx: &TurnRef,
        params: &mut CallParams,
        progress: &ProgressSink,
    ) -> Result<()> {
        let _ = (ctx, params, progress);
        Ok(())
    }

    /// Transforms one outgoing event. Returning `None` drops it.
    async fn filter_stream(
        &self,
        ctx: &TurnRef,
        event: Event,
        progress: &ProgressSink,
    ) -> Result<Option<Event>> {
        let _ = (ctx, progress);
        Ok(Some(event))
    }

    /// Runs after the final model round.
    async fn post_call(
        &self,
        ctx: &TurnRef,
        outcome: &mut PostCall,
        progress: &ProgressSink,
    ) -> Result<()> {
        let _ = (ctx, outcome, progress);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All function plugins, held in descending priority order.
#[derive(Default)]
pub struct FunctionChain {
    plugins: Vec<Arc<dyn FunctionPlugin>>,
}

impl FunctionChain {
    pub fn new(mut plugins: Vec<Arc<dyn FunctionPlugin>>) -> Self {
        // Stable: equal priorities keep registration order.
        plugins.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn sink_for(&self, plugin: &Arc<dyn FunctionPlugin>, ctx: &TurnRef, tx: &mpsc::Sender<Event>) -> ProgressSink {
        ProgressSink::new(
            tx.clone(),
            format!("fn:{}", plugin.name()),
            ctx.turn_correlation_id.clone(),
        )
    }

    /// Run every `pre_call` hook, highest priority first.
    pub async fn pre_call(&self, ctx: &TurnRef, params: &mut CallParams, tx: &mpsc::Sender<Event>) {
        for plugin in &self.plugins {
            let sink = self.sink_for(plugin, ctx, tx);
            if let Err(e) = plugin.pre_call(ctx, params, &sink).await {
                tracing::warn!(
                    plugin = %plugin.name(),
                    error = %e,
                    "pre_call hook failed, continuing"
                );
                sink.update(format!("Error in function {}: {e}", plugin.name()))
                    .await;
            }
        }
    }

    /// Run the filter chain, lowest priority first. Returns the
    /// transformed event, or `None` if some filter dropped it.
    pub async fn filter_stream(
        &self,
        ctx: &TurnRef,
        event: Event,
        tx: &mpsc::Sender<Event>,
    ) -> Option<Event> {
        let mut current = event;
        for plugin in self.plugins.iter().rev() {
            let sink = self.sink_for(plugin, ctx, tx);
            match plugin.filter_stream(ctx, current.clone(), &sink).await {
                Ok(Some(next)) => current = next,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(
                        plugin = %plugin.name(),
                        error = %e,
                        "filter_stream hook failed, passing event through"
                    );
                }
            }
        }
        Some(current)
    }

    /// Run every `post_call` hook, lowest priority first.
    pub async fn post_call(&self, ctx: &TurnRef, outcome: &mut PostCall, tx: &mpsc::Sender<Event>) {
        for plugin in self.plugins.iter().rev() {
            let sink = self.sink_for(plugin, ctx, tx);
            if let Err(e) = plugin.post_call(ctx, outcome, &sink).await {
                tracing::warn!(
                    plugin = %plugin.name(),
                    error = %e,
                    "post_call hook failed, continuing"
                );
                sink.update(format!("Error in function {}: {e}", plugin.name()))
                    .await;
            }
        }
    }

    pub(crate) async fn shutdown_all(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.shutdown().await {
                tracing::warn!(plugin = %plugin.name(), error = %e, "function shutdown failed");
            }
        }
    }
}
