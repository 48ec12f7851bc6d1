//! SQLite backend for the Weft tabular store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on dedicated
//! connection threads without blocking the async runtime. One writer
//! connection funnels every mutation through `BEGIN IMMEDIATE`
//! transactions with bounded busy retry; a separate read-only
//! connection serves queries.

mod conn;
mod filter;
mod schema_ops;
mod store;
mod value;

pub use store::SqliteStore;
