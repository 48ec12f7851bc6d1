//! The plugin registry: one winner per single-slot role, ordered
//! multi-slot collections for tools and middleware.
//!
//! Built once at startup through [`PluginRegistryBuilder`] and immutable
//! afterwards, so readers need no locking. Dependent plugins (history
//! over store, context over history) are wired explicitly during
//! assembly: the builder exposes the currently-selected winner so an
//! override registered earlier takes effect in everything built after
//! it.

use std::sync::Arc;
use std::sync::OnceLock;

use weft_domain::{Error, Result};

use crate::middleware::{FunctionChain, FunctionPlugin};
use crate::roles::{
    AuthPlugin, ContextPlugin, CorePlugin, HistoryPlugin, MessageProcessorPlugin, ModelPlugin,
    Role, StorePlugin, SystemPromptPlugin,
};
use crate::tool::{ToolPlugin, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collects registrations and resolves priority before the immutable
/// registry is built.
#[derive(Default)]
pub struct PluginRegistryBuilder {
    auth: Option<Arc<dyn AuthPlugin>>,
    store: Option<Arc<dyn StorePlugin>>,
    history: Option<Arc<dyn HistoryPlugin>>,
    context: Option<Arc<dyn ContextPlugin>>,
    model: Option<Arc<dyn ModelPlugin>>,
    system_prompt: Option<Arc<dyn SystemPromptPlugin>>,
    tools: ToolRegistry,
    functions: Vec<Arc<dyn FunctionPlugin>>,
}

macro_rules! single_slot {
    ($fn_name:ident, $getter:ident, $field:ident, $trait_ty:ty, $role:expr) => {
        /// Register a plugin for this role. The highest priority wins;
        /// a replaced plugin is logged.
        pub fn $fn_name(&mut self, plugin: Arc<$trait_ty>) -> &mut Self {
            match self.$field.take() {
                Some(current) if current.priority() >= plugin.priority() => {
                    tracing::debug!(
                        role = %$role,
                        kept = %current.name(),
                        rejected = %plugin.name(),
                        "keeping higher-priority plugin"
                    );
                    self.$field = Some(current);
                }
                Some(replaced) => {
                    tracing::info!(
                        role = %$role,
                        replaced = %replaced.name(),
                        winner = %plugin.name(),
                        "plugin override"
                    );
                    self.$field = Some(plugin);
                }
                None => {
                    self.$field = Some(plugin);
                }
            }
            self
        }

        /// The currently-selected plugin for this role, for wiring
        /// dependents during assembly.
        pub fn $getter(&self) -> Option<Arc<$trait_ty>> {
            self.$field.clone()
        }
    };
}

impl PluginRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    single_slot!(register_auth, selected_auth, auth, dyn AuthPlugin, Role::Auth);
    single_slot!(register_store, selected_store, store, dyn StorePlugin, Role::Store);
    single_slot!(
        register_history,
        selected_history,
        history,
        dyn HistoryPlugin,
        Role::History
    );
    single_slot!(
        register_context,
        selected_context,
        context,
        dyn ContextPlugin,
        Role::Context
    );
    single_slot!(register_model, selected_model, model, dyn ModelPlugin, Role::Model);
    single_slot!(
        register_system_prompt,
        selected_system_prompt,
        system_prompt,
        dyn SystemPromptPlugin,
        Role::SystemPrompt
    );

    /// Register a tool. Name conflicts reject the newcomer with a
    /// warning.
    pub fn register_tool(&mut self, tool: Arc<dyn ToolPlugin>) -> &mut Self {
        self.tools.register(tool);
        self
    }

    pub fn register_function(&mut self, plugin: Arc<dyn FunctionPlugin>) -> &mut Self {
        self.functions.push(plugin);
        self
    }

    /// Build the immutable registry. Every single-slot role except the
    /// message processor must be filled.
    pub fn build(self) -> Result<Arc<PluginRegistry>> {
        fn required<T: ?Sized>(slot: Option<Arc<T>>, role: Role) -> Result<Arc<T>> {
            slot.ok_or_else(|| {
                Error::Validation(format!("no plugin registered for role '{role}'"))
            })
        }

        let registry = PluginRegistry {
            auth: required(self.auth, Role::Auth)?,
            store: required(self.store, Role::Store)?,
            history: required(self.history, Role::History)?,
            context: required(self.context, Role::Context)?,
            model: required(self.model, Role::Model)?,
            system_prompt: required(self.system_prompt, Role::SystemPrompt)?,
            processor: OnceLock::new(),
            tools: self.tools,
            functions: FunctionChain::new(self.functions),
        };

        tracing::info!(
            tools = registry.tools.len(),
            functions = registry.functions.len(),
            "plugin registry built"
        );

        Ok(Arc::new(registry))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The resolved plugin set. Immutable after startup.
pub struct PluginRegistry {
    auth: Arc<dyn AuthPlugin>,
    store: Arc<dyn StorePlugin>,
    history: Arc<dyn HistoryPlugin>,
    context: Arc<dyn ContextPlugin>,
    model: Arc<dyn ModelPlugin>,
    system_prompt: Arc<dyn SystemPromptPlugin>,
    /// Installed after build — the orchestrator needs the registry to
    /// construct itself.
    processor: OnceLock<Arc<dyn MessageProcessorPlugin>>,
    tools: ToolRegistry,
    functions: FunctionChain,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").finish()
    }
}

impl PluginRegistry {
    pub fn auth(&self) -> &Arc<dyn AuthPlugin> {
        &self.auth
    }

    pub fn store(&self) -> &Arc<dyn StorePlugin> {
        &self.store
    }

    pub fn history(&self) -> &Arc<dyn HistoryPlugin> {
        &self.history
    }

    pub fn context(&self) -> &Arc<dyn ContextPlugin> {
        &self.context
    }

    pub fn model(&self) -> &Arc<dyn ModelPlugin> {
        &self.model
    }

    pub fn system_prompt(&self) -> &Arc<dyn SystemPromptPlugin> {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn functions(&self) -> &FunctionChain {
        &self.functions
    }

    /// Install the message processor. Only the first call takes effect.
    pub fn install_processor(&self, processor: Arc<dyn MessageProcessorPlugin>) {
        if self.processor.set(processor).is_err() {
            tracing::warn!("message processor already installed, ignoring");
        }
    }

    pub fn processor(&self) -> Result<Arc<dyn MessageProcessorPlugin>> {
        self.processor
            .get()
            .cloned()
            .ok_or_else(|| Error::Validation("no message processor installed".into()))
    }

    /// Graceful shutdown: awaits every plugin's shutdown hook, logging
    /// failures rather than propagating them.
    pub async fn shutdown(&self) {
        async fn safe<F: std::future::Future<Output = Result<()>>>(name: &str, fut: F) {
            if let Err(e) = fut.await {
                tracing::warn!(plugin = %name, error = %e, "plugin shutdown failed");
            }
        }

        if let Some(processor) = self.processor.get() {
            safe(processor.name(), processor.shutdown()).await;
        }
        safe(self.model.name(), self.model.shutdown()).await;
        safe(self.context.name(), self.context.shutdown()).await;
        safe(self.history.name(), self.history.shutdown()).await;
        safe(self.system_prompt.name(), self.system_prompt.shutdown()).await;
        safe(self.auth.name(), self.auth.shutdown()).await;
        self.functions.shutdown_all().await;
        self.tools.shutdown_all().await;
        // The store goes last so everything above can still flush.
        safe(self.store.name(), self.store.shutdown()).await;

        tracing::info!("plugin registry shut down");
    }
}
