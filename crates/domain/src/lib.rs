//! Shared types for the Weft chat backend core.
//!
//! Everything that crosses a crate boundary lives here: the error
//! taxonomy, configuration sections, the typed event envelope, history
//! and context message shapes, the store schema/filter vocabulary, the
//! model stream contract, and structured trace events.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod schema;
pub mod stream;
pub mod trace;

pub use error::{Error, Result};
