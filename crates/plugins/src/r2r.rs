//! The progress/final ("R2R") invocation shape.
//!
//! A tool invocation is uniformly a lazy stream of zero or more
//! progress values followed by exactly one final value. Producers emit
//! the tagged sum [`ToolYield`]; the [`R2r`] adapter splits it into a
//! progress iterator and an awaitable final value, so a plain
//! value-returning future and a progress-reporting stream look the same
//! to consumers.

use futures_util::StreamExt;
use serde_json::Value;
use std::future::Future;

use weft_domain::stream::BoxStream;
use weft_domain::Result;

/// One item from a tool producer.
#[derive(Debug, Clone)]
pub enum ToolYield {
    /// An intermediate, user-visible progress line.
    Progress(String),
    /// The single final result. Terminates the stream.
    Final(Value),
}

/// What a tool produces: progress and a final value, with errors still
/// in-band (the registry folds them into the error envelope).
pub type ToolStream = BoxStream<'static, Result<ToolYield>>;

/// Lift a plain value-returning future into the tool shape: zero
/// progress items, one final value.
pub fn from_future<F>(fut: F) -> ToolStream
where
    F: Future<Output = Result<Value>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        match fut.await {
            Ok(v) => yield Ok(ToolYield::Final(v)),
            Err(e) => yield Err(e),
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Splits a tool stream into `(progress items, final value)`.
///
/// Consume with `next_progress()` until it returns `None`, then call
/// `final_value()`. Skipping straight to `final_value()` drains and
/// discards any remaining progress.
pub struct R2r {
    inner: BoxStream<'static, ToolYield>,
    final_value: Option<Value>,
}

impl R2r {
    pub fn new(inner: BoxStream<'static, ToolYield>) -> Self {
        Self {
            inner,
            final_value: None,
        }
    }

    /// An adapter whose final value is already known (no progress).
    pub fn immediate(value: Value) -> Self {
        Self {
            inner: Box::pin(futures_util::stream::empty()),
            final_value: Some(value),
        }
    }

    /// Next progress item, or `None` once the final value has been
    /// captured (or the producer ended).
    pub async fn next_progress(&mut self) -> Option<String> {
        if self.final_value.is_some() {
            return None;
        }
        while let Some(item) = self.inner.next().await {
            match item {
                ToolYield::Progress(line) => return Some(line),
                ToolYield::Final(value) => {
                    self.final_value = Some(value);
                    return None;
                }
            }
        }
        None
    }

    /// The final value. A producer that ended without one yields
    /// `Value::Null`.
    pub async fn final_value(mut self) -> Value {
        if let Some(v) = self.final_value.take() {
            return v;
        }
        while let Some(item) = self.inner.next().await {
            if let ToolYield::Final(v) = item {
                return v;
            }
        }
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_domain::Error;

    fn yields(items: Vec<ToolYield>) -> BoxStream<'static, ToolYield> {
        Box::pin(futures_util::stream::iter(items))
    }

    #[tokio::test]
    async fn coroutine_shape_yields_nothing_then_final() {
        let stream = yields(vec![ToolYield::Final(json!(5))]);
        let mut r2r = R2r::new(stream);
        assert!(r2r.next_progress().await.is_none());
        assert_eq!(r2r.final_value().await, json!(5));
    }

    #[tokio::test]
    async fn generator_shape_yields_progress_then_final() {
        let stream = yields(vec![
            ToolYield::Progress("step 1".into()),
            ToolYield::Progress("step 2".into()),
            ToolYield::Final(json!({"ok": true})),
        ]);
        let mut r2r = R2r::new(stream);
        assert_eq!(r2r.next_progress().await.as_deref(), Some("step 1"));
        assert_eq!(r2r.next_progress().await.as_deref(), Some("step 2"));
        assert!(r2r.next_progress().await.is_none());
        assert_eq!(r2r.final_value().await, json!({"ok": true}));
    }

    #[tokio::test]
    async fn skipping_progress_still_returns_final() {
        let stream = yields(vec![
            ToolYield::Progress("discarded".into()),
            ToolYield::Final(json!("done")),
        ]);
        let r2r = R2r::new(stream);
        assert_eq!(r2r.final_value().await, json!("done"));
    }

    #[tokio::test]
    async fn producer_without_final_gives_null() {
        let stream = yields(vec![ToolYield::Progress("only progress".into())]);
        let mut r2r = R2r::new(stream);
        assert!(r2r.next_progress().await.is_some());
        assert!(r2r.next_progress().await.is_none());
        assert_eq!(r2r.final_value().await, Value::Null);
    }

    #[tokio::test]
    async fn immediate_has_no_progress() {
        let mut r2r = R2r::immediate(json!(42));
        assert!(r2r.next_progress().await.is_none());
        assert_eq!(r2r.final_value().await, json!(42));
    }

    #[tokio::test]
    async fn from_future_wraps_ok_value() {
        let mut stream = from_future(async { Ok(json!(7)) });
        match stream.next().await {
            Some(Ok(ToolYield::Final(v))) => assert_eq!(v, json!(7)),
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn from_future_propagates_error() {
        let mut stream = from_future(async { Err(Error::ToolExecution("boom".into())) });
        assert!(matches!(stream.next().await, Some(Err(_))));
    }
}
