/// Shared error type used across all Weft crates.
///
/// Variants mirror the failure taxonomy the rest of the system is
/// written against: structural problems (`Validation`, `SchemaConflict`)
/// are terminal, `Busy` is transient write contention that callers may
/// retry, and the turn-level kinds (`ToolLoopExhausted`, `Upstream`)
/// surface to the transport as a single `error` event.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("tool loop exhausted after {0} rounds")]
    ToolLoopExhausted(usize),

    #[error("tool execution: {0}")]
    ToolExecution(String),

    #[error("upstream model failure: {0}")]
    Upstream(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Busy(_))
    }

    /// Stable kind tag, used in trace events and error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::PermissionDenied(_) => "permission_denied",
            Error::SchemaConflict(_) => "schema_conflict",
            Error::Busy(_) => "busy",
            Error::ToolLoopExhausted(_) => "tool_loop_exhausted",
            Error::ToolExecution(_) => "tool_execution",
            Error::Upstream(_) => "upstream",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Other(_) => "other",
        }
    }
}
