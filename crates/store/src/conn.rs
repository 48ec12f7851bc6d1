//! Connection management: one writer, one reader, and the busy-retry
//! discipline around write transactions.
//!
//! Every mutating operation runs inside `BEGIN IMMEDIATE` so write-lock
//! contention is detected at transaction start rather than commit. On
//! SQLITE_BUSY the whole transaction closure is retried with
//! exponential backoff and jitter, up to a bounded attempt count;
//! exhaustion surfaces as the transient `Busy` error.

use rand::Rng;
use rusqlite::TransactionBehavior;
use std::path::Path;
use std::time::Duration;

use weft_domain::config::StoreConfig;
use weft_domain::trace::TraceEvent;
use weft_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_retries: config.busy_max_retries,
            base_delay_ms: config.busy_base_delay_ms,
            max_delay_ms: config.busy_max_delay_ms,
            jitter_ms: config.busy_jitter_ms,
        }
    }

    /// Backoff for the given zero-based attempt:
    /// `min(base * 2^attempt + jitter, max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32));
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter).min(self.max_delay_ms))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection pair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct ConnPair {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
    retry: RetryPolicy,
}

impl ConnPair {
    /// Open writer then reader. The writer creates the file, enables
    /// WAL and foreign keys, and initializes core tables before the
    /// read-only connection is opened.
    pub async fn open(path: &Path, retry: RetryPolicy) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let writer = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(map_db_error)?;
        writer
            .call(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA foreign_keys = ON;",
                )?;
                Ok(())
            })
            .await
            .map_err(map_db_error)?;

        let reader = tokio_rusqlite::Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await
        .map_err(map_db_error)?;
        // Readers wait briefly through WAL checkpoints instead of
        // surfacing SQLITE_BUSY.
        reader
            .call(|conn| {
                conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
                Ok(())
            })
            .await
            .map_err(map_db_error)?;

        tracing::debug!(path = %path.display(), "sqlite connections opened");
        Ok(Self {
            writer,
            reader,
            retry,
        })
    }

    /// Run `f` inside an immediate write transaction, retrying the
    /// whole transaction on busy with exponential backoff.
    pub async fn with_write<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'c> Fn(&rusqlite::Transaction<'c>) -> tokio_rusqlite::Result<T>
            + Clone
            + Send
            + 'static,
    {
        let mut attempt: u32 = 0;
        loop {
            let op = f.clone();
            let result = self
                .writer
                .call(move |conn| {
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                    let value = op(&tx)?;
                    tx.commit()?;
                    Ok(value)
                })
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "database busy, retrying write"
                    );
                    TraceEvent::WriteRetried {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    }
                    .emit();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(map_db_error(e)),
            }
        }
    }

    /// Run `f` on the read-only connection.
    pub async fn with_read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> tokio_rusqlite::Result<T> + Send + 'static,
    {
        self.reader
            .call(move |conn| f(conn))
            .await
            .map_err(map_db_error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Smuggle a domain error out of a connection closure.
pub(crate) fn domain_err(e: Error) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(e))
}

pub(crate) fn is_busy(e: &tokio_rusqlite::Error) -> bool {
    matches!(
        e,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, _))
            if matches!(
                f.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

pub(crate) fn map_db_error(e: tokio_rusqlite::Error) -> Error {
    match e {
        tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Error>() {
            Ok(domain) => *domain,
            Err(other) => Error::Storage(other.to_string()),
        },
        e if is_busy(&e) => Error::Busy(e.to_string()),
        other => Error::Storage(other.to_string()),
    }
}
