//! Tool registry — two tool shapes behind one invocation contract.
//!
//! Schema-explicit tools carry their own JSON schema; schema-derived
//! tools are built from typed parameter specs plus a description, with
//! the schema generated (and cached) at construction. Invocation is
//! always the R2R shape, with a wall-clock cap and errors folded into
//! the final-value error envelope.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use weft_domain::message::ToolSchema;
use weft_domain::Result;

use crate::r2r::{R2r, ToolStream, ToolYield};

/// Parameter names the registry supplies itself; they never appear in
/// a derived schema and the model cannot set them.
const CORRELATION_PARAMS: [&str; 3] = ["user_id", "thread_id", "turn_correlation_id"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation context & tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Correlation data available to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub user_id: String,
    pub thread_id: String,
    pub turn_correlation_id: String,
}

/// A callable tool.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    /// The (cached) schema forwarded to the model adapter.
    fn schema(&self) -> &ToolSchema;

    fn name(&self) -> &str {
        &self.schema().name
    }

    /// Start one execution. Errors are yielded in-band; the registry
    /// converts them into the error envelope.
    fn execute(&self, inv: &ToolInvocation, arguments: Value) -> ToolStream;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema-derived tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

/// One declared parameter of a schema-derived tool.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
    /// Substituted when the model omits an optional parameter.
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
        default: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            default,
        }
    }
}

type DerivedHandler =
    Arc<dyn Fn(ToolInvocation, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A tool whose schema is derived from typed parameter specs.
///
/// The description's first paragraph becomes the schema description.
/// Correlation parameters declared in `params` are excluded from the
/// schema and injected from the invocation context at call time.
pub struct DerivedTool {
    schema: ToolSchema,
    params: Vec<ParamSpec>,
    handler: DerivedHandler,
}

impl DerivedTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: &str,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolInvocation, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        let name = name.into();
        let schema = ToolSchema {
            name: name.clone(),
            description: first_paragraph(description).to_owned(),
            parameters: derive_parameters(&params),
        };
        Self {
            schema,
            params,
            handler: Arc::new(handler),
        }
    }

    /// Fill defaults for omitted optional parameters and inject the
    /// correlation values the tool declared.
    fn resolve_arguments(&self, inv: &ToolInvocation, arguments: Value) -> Value {
        let mut map = match arguments {
            Value::Object(m) => m,
            _ => serde_json::Map::new(),
        };
        for spec in &self.params {
            if CORRELATION_PARAMS.contains(&spec.name.as_str()) {
                let injected = match spec.name.as_str() {
                    "user_id" => inv.user_id.clone(),
                    "thread_id" => inv.thread_id.clone(),
                    _ => inv.turn_correlation_id.clone(),
                };
                map.insert(spec.name.clone(), Value::String(injected));
            } else if !map.contains_key(&spec.name) {
                if let Some(default) = &spec.default {
                    map.insert(spec.name.clone(), default.clone());
                }
            }
        }
        Value::Object(map)
    }
}

#[async_trait]
impl ToolPlugin for DerivedTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn execute(&self, inv: &ToolInvocation, arguments: Value) -> ToolStream {
        let resolved = self.resolve_arguments(inv, arguments);
        let fut = (self.handler)(inv.clone(), resolved);
        crate::r2r::from_future(fut)
    }
}

fn first_paragraph(text: &str) -> &str {
    text.split("\n\n").next().unwrap_or(text).trim()
}

fn derive_parameters(params: &[ParamSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for spec in params {
        if CORRELATION_PARAMS.contains(&spec.name.as_str()) {
            continue;
        }
        properties.insert(
            spec.name.clone(),
            json!({
                "type": spec.kind.json_type(),
                "description": spec.description,
            }),
        );
        if spec.required {
            required.push(Value::String(spec.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all registered tools; immutable once the plugin registry is
/// built.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolPlugin>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A name already taken rejects the newcomer with
    /// a warning and returns `false`.
    pub fn register(&mut self, tool: Arc<dyn ToolPlugin>) -> bool {
        let name = tool.name().to_owned();
        if self.by_name.contains_key(&name) {
            tracing::warn!(tool = %name, "tool name already registered, rejecting");
            return false;
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolPlugin>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas in registration order, forwarded to the model adapter.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema().clone()).collect()
    }

    /// Invoke a tool under the wall-clock cap. Unknown tools, producer
    /// errors and timeouts all surface as the final-value error
    /// envelope `{error, tool, arguments}` — nothing is thrown past the
    /// adapter.
    pub fn invoke(
        &self,
        name: &str,
        inv: ToolInvocation,
        arguments: Value,
        timeout: Duration,
    ) -> R2r {
        let Some(tool) = self.get(name) else {
            return R2r::immediate(error_envelope(
                name,
                &arguments,
                format!("unknown tool '{name}'"),
            ));
        };

        let tool_name = name.to_owned();
        let args_for_envelope = arguments.clone();
        let mut inner = tool.execute(&inv, arguments);

        let guarded = async_stream::stream! {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        yield ToolYield::Final(error_envelope(
                            &tool_name,
                            &args_for_envelope,
                            format!("timed out after {}s", timeout.as_secs()),
                        ));
                        return;
                    }
                    item = inner.next() => match item {
                        Some(Ok(ToolYield::Final(v))) => {
                            yield ToolYield::Final(v);
                            return;
                        }
                        Some(Ok(progress)) => yield progress,
                        Some(Err(e)) => {
                            yield ToolYield::Final(error_envelope(
                                &tool_name,
                                &args_for_envelope,
                                e.to_string(),
                            ));
                            return;
                        }
                        None => {
                            yield ToolYield::Final(Value::Null);
                            return;
                        }
                    }
                }
            }
        };

        R2r::new(Box::pin(guarded))
    }

    pub(crate) async fn shutdown_all(&self) {
        for tool in &self.tools {
            if let Err(e) = tool.shutdown().await {
                tracing::warn!(tool = %tool.name(), error = %e, "tool shutdown failed");
            }
        }
    }
}

/// The structured error envelope reported as a failed tool's final
/// value.
pub fn error_envelope(tool: &str, arguments: &Value, message: impl Into<String>) -> Value {
    json!({
        "error": message.into(),
        "tool": tool,
        "arguments": arguments,
    })
}

/// Whether a final value is the error envelope.
pub fn is_error_envelope(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("error") && o.contains_key("tool"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    fn add_tool() -> Arc<dyn ToolPlugin> {
        Arc::new(DerivedTool::new(
            "add",
            "Add two numbers.\n\nThe second paragraph is dropped.",
            vec![
                ParamSpec::required("a", ParamKind::Integer, "First addend"),
                ParamSpec::required("b", ParamKind::Integer, "Second addend"),
            ],
            |_inv, args| {
                async move {
                    let a = args["a"].as_i64().unwrap_or(0);
                    let b = args["b"].as_i64().unwrap_or(0);
                    Ok(json!(a + b))
                }
                .boxed()
            },
        ))
    }

    #[test]
    fn derived_schema_shape() {
        let tool = add_tool();
        let schema = tool.schema();
        assert_eq!(schema.name, "add");
        assert_eq!(schema.description, "Add two numbers.");
        assert_eq!(schema.parameters["type"], "object");
        assert_eq!(schema.parameters["properties"]["a"]["type"], "integer");
        assert_eq!(schema.parameters["required"], json!(["a", "b"]));
    }

    #[test]
    fn correlation_params_excluded_from_schema() {
        let tool = DerivedTool::new(
            "whoami",
            "Report the calling user.",
            vec![ParamSpec::required(
                "user_id",
                ParamKind::String,
                "injected",
            )],
            |_inv, args| async move { Ok(args["user_id"].clone()) }.boxed(),
        );
        let props = tool.schema().parameters["properties"].as_object().unwrap();
        assert!(props.is_empty());
        assert_eq!(tool.schema().parameters["required"], json!([]));
    }

    #[tokio::test]
    async fn correlation_params_injected_at_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DerivedTool::new(
            "whoami",
            "Report the calling user.",
            vec![ParamSpec::required(
                "user_id",
                ParamKind::String,
                "injected",
            )],
            |_inv, args| async move { Ok(args["user_id"].clone()) }.boxed(),
        )));
        let inv = ToolInvocation {
            user_id: "alice".into(),
            thread_id: "t1".into(),
            turn_correlation_id: "turn-1".into(),
        };
        let r2r = registry.invoke("whoami", inv, json!({}), Duration::from_secs(5));
        assert_eq!(r2r.final_value().await, json!("alice"));
    }

    #[tokio::test]
    async fn invoke_returns_final_value() {
        let mut registry = ToolRegistry::new();
        registry.register(add_tool());
        let inv = ToolInvocation {
            user_id: "u".into(),
            thread_id: "t".into(),
            turn_correlation_id: "c".into(),
        };
        let r2r = registry.invoke("add", inv, json!({"a": 2, "b": 3}), Duration::from_secs(5));
        assert_eq!(r2r.final_value().await, json!(5));
    }

    #[tokio::test]
    async fn optional_defaults_are_filled() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DerivedTool::new(
            "greet",
            "Greet a person.",
            vec![
                ParamSpec::required("name", ParamKind::String, "Who"),
                ParamSpec::optional(
                    "greeting",
                    ParamKind::String,
                    "Salutation",
                    Some(json!("Hello")),
                ),
            ],
            |_inv, args| {
                async move {
                    Ok(json!(format!(
                        "{} {}",
                        args["greeting"].as_str().unwrap_or(""),
                        args["name"].as_str().unwrap_or("")
                    )))
                }
                .boxed()
            },
        )));
        let inv = ToolInvocation {
            user_id: "u".into(),
            thread_id: "t".into(),
            turn_correlation_id: "c".into(),
        };
        let r2r = registry.invoke("greet", inv, json!({"name": "Ada"}), Duration::from_secs(5));
        assert_eq!(r2r.final_value().await, json!("Hello Ada"));
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_envelope() {
        let registry = ToolRegistry::new();
        let inv = ToolInvocation {
            user_id: "u".into(),
            thread_id: "t".into(),
            turn_correlation_id: "c".into(),
        };
        let value = registry
            .invoke("missing", inv, json!({"x": 1}), Duration::from_secs(5))
            .final_value()
            .await;
        assert!(is_error_envelope(&value));
        assert_eq!(value["tool"], "missing");
        assert_eq!(value["arguments"], json!({"x": 1}));
    }

    #[tokio::test]
    async fn tool_error_becomes_envelope_not_panic() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DerivedTool::new(
            "explode",
            "Always fails.",
            vec![],
            |_inv, _args| {
                async { Err(weft_domain::Error::ToolExecution("kaboom".into())) }.boxed()
            },
        )));
        let inv = ToolInvocation {
            user_id: "u".into(),
            thread_id: "t".into(),
            turn_correlation_id: "c".into(),
        };
        let value = registry
            .invoke("explode", inv, json!({}), Duration::from_secs(5))
            .final_value()
            .await;
        assert!(is_error_envelope(&value));
        assert!(value["error"].as_str().unwrap().contains("kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_is_capped() {
        struct SleepyTool {
            schema: ToolSchema,
        }
        #[async_trait]
        impl ToolPlugin for SleepyTool {
            fn schema(&self) -> &ToolSchema {
                &self.schema
            }
            fn execute(&self, _inv: &ToolInvocation, _arguments: Value) -> ToolStream {
                crate::r2r::from_future(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(json!("never"))
                })
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepyTool {
            schema: ToolSchema {
                name: "sleepy".into(),
                description: "sleeps forever".into(),
                parameters: json!({"type": "object", "properties": {}}),
            },
        }));
        let inv = ToolInvocation {
            user_id: "u".into(),
            thread_id: "t".into(),
            turn_correlation_id: "c".into(),
        };
        let value = registry
            .invoke("sleepy", inv, json!({}), Duration::from_secs(2))
            .final_value()
            .await;
        assert!(is_error_envelope(&value));
        assert!(value["error"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(add_tool()));
        assert!(!registry.register(add_tool()));
        assert_eq!(registry.len(), 1);
    }
}
