//! Supervisor for fire-and-forget background work.
//!
//! Every unit is tracked until it finishes and then removes itself. Failures
//! are logged, never re-raised. After `shutdown` begins, new work is refused
//! and its future is dropped without being polled.
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type TaskId = u64;

struct TrackedTask {
    name: String,
    handle: JoinHandle<()>,
}

pub struct TaskSupervisor {
    tasks: Arc<Mutex<HashMap<TaskId, TrackedTask>>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Schedule `future`, optionally bounded by `timeout`.
    ///
    /// Returns `None` when shutdown has already begun.
    pub async fn run<F, T>(
        &self,
        name: impl Into<String>,
        future: F,
        timeout: Option<Duration>,
    ) -> Option<TaskId>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();

        // Hold the lock across spawn + insert: the task removes itself on
        // completion, so its entry must exist before it can finish.
        let mut tasks_guard = self.tasks.lock().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("supervisor shutting down, dropping task '{}'", name);
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let bounded = async move {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, future).await {
                        Ok(result) => result.map(|_| ()),
                        Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
                    },
                    None => future.await.map(|_| ()),
                }
            };
            match AssertUnwindSafe(bounded).catch_unwind().await {
                Ok(Ok(())) => debug!("background task '{}' completed", task_name),
                Ok(Err(e)) => warn!("background task '{}' failed: {:#}", task_name, e),
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<String>()
                        .map(String::as_str)
                        .or_else(|| panic.downcast_ref::<&str>().copied())
                        .unwrap_or("unknown cause");
                    error!("background task '{}' panicked: {}", task_name, msg);
                }
            }
            tasks.lock().await.remove(&id);
        });
        tasks_guard.insert(id, TrackedTask { name, handle });
        Some(id)
    }

    /// Number of tasks still running.
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Refuse new work, wait up to `grace` for tracked work, abort the rest.
    ///
    /// Always returns within roughly `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let drained: Vec<TrackedTask> = {
            let mut guard = self.tasks.lock().await;
            self.shutting_down.store(true, Ordering::SeqCst);
            guard.drain().map(|(_, task)| task).collect()
        };
        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        info!("waiting up to {:?} for {} background tasks", grace, count);
        let aborts: Vec<(String, tokio::task::AbortHandle)> = drained
            .iter()
            .map(|t| (t.name.clone(), t.handle.abort_handle()))
            .collect();
        let joins = futures_util::future::join_all(drained.into_iter().map(|t| t.handle));

        if tokio::time::timeout(grace, joins).await.is_err() {
            let mut cancelled = 0;
            for (name, abort) in aborts {
                if !abort.is_finished() {
                    abort.abort();
                    debug!("cancelled background task '{}'", name);
                    cancelled += 1;
                }
            }
            warn!(
                "grace period elapsed, cancelled {} of {} background tasks",
                cancelled, count
            );
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
