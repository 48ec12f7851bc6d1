//! Plugin layer: role protocols, the registry that wires them, the
//! tool registry with its progress/final ("R2R") invocation shape, and
//! the three-hook middleware chain.
//!
//! The core depends only on the role traits defined here, never on a
//! concrete plugin identity. Overriding a role is a registration with a
//! higher priority.

pub mod defaults;
pub mod middleware;
pub mod r2r;
pub mod registry;
pub mod roles;
pub mod tool;

pub use middleware::{CallParams, FunctionChain, FunctionPlugin, PostCall, ProgressSink, TurnRef};
pub use r2r::{R2r, ToolStream, ToolYield};
pub use registry::{PluginRegistry, PluginRegistryBuilder};
pub use roles::{
    AuthPlugin, ContextPlugin, CorePlugin, HistoryPlugin, MessageProcessorPlugin, ModelPlugin,
    Role, StorePlugin, SystemPromptPlugin,
};
pub use tool::{DerivedTool, ParamKind, ParamSpec, ToolInvocation, ToolPlugin, ToolRegistry};
