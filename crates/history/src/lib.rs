//! Thread history and model context for the Weft backend.
//!
//! [`HistoryLog`] is a thin façade over the tabular store: threads are
//! records in the `threads` store, messages its append-only collection.
//! [`ContextCache`] keeps the mutable model-visible view of each
//! conversation, coherent with the append-only history and guarded by a
//! monotone mutation counter.

pub mod context;
pub mod log;

pub use context::ContextCache;
pub use log::HistoryLog;
