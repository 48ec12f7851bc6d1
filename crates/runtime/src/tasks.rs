//! Named background tasks launched by `post_call` middleware.
//!
//! Fire-and-forget from the request's perspective: task failures are
//! logged and discarded. Every task receives the shared shutdown token;
//! on process stop the registry signals it and awaits all tasks to
//! completion.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use weft_domain::trace::TraceEvent;
use weft_domain::Result;

use crate::cancel::CancelToken;

/// Registry of named background tasks.
pub struct BackgroundTasks {
    shutdown: CancelToken,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            shutdown: CancelToken::new(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a named task. The closure receives the shutdown token and
    /// should return promptly once it fires. A task reusing a live name
    /// replaces the registry entry; the old task keeps running detached.
    pub fn spawn<F, Fut>(&self, name: &str, task: F)
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let fut = task(self.shutdown.clone());
        let task_name = name.to_owned();
        TraceEvent::BackgroundTaskSpawned {
            name: task_name.clone(),
        }
        .emit();

        let handle = tokio::spawn(async move {
            let ok = match fut.await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(task = %task_name, error = %e, "background task failed");
                    false
                }
            };
            TraceEvent::BackgroundTaskFinished {
                name: task_name,
                ok,
            }
            .emit();
        });

        let mut handles = self.handles.lock();
        handles.retain(|_, h| !h.is_finished());
        if handles.insert(name.to_owned(), handle).is_some() {
            tracing::debug!(task = name, "background task name reused");
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.handles
            .lock()
            .get(name)
            .is_some_and(|h| !h.is_finished())
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Signal shutdown and await every task to completion.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<(String, JoinHandle<()>)> =
            self.handles.lock().drain().collect();
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(task = %name, error = %e, "background task join failed");
            }
        }
        tracing::debug!("background tasks drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn task_runs_to_completion() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        tasks.spawn("once", move |_token| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        tasks.shutdown().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_signals_long_running_tasks() {
        let tasks = BackgroundTasks::new();
        let iterations = Arc::new(AtomicU32::new(0));
        let counter = iterations.clone();
        tasks.spawn("looper", move |token| async move {
            while !token.is_cancelled() {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tasks.is_running("looper"));

        tasks.shutdown().await;
        assert!(!tasks.is_running("looper"));
        assert!(iterations.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn failing_task_is_logged_and_discarded() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("doomed", |_token| async {
            Err(weft_domain::Error::Other("deliberate".into()))
        });
        // Shutdown still completes cleanly.
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped_on_spawn() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("a", |_| async { Ok(()) });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tasks.spawn("b", |_| async { Ok(()) });
        // "a" finished before "b" was spawned, so it was reaped.
        assert!(tasks.len() <= 2);
        tasks.shutdown().await;
        assert!(tasks.is_empty());
    }
}
