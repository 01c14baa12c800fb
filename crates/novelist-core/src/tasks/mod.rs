//! Background job runtime: submission, status polling, log streaming,
//! and cooperative cancellation.
//!
//! One submitted job is one tokio task, fire-and-forget, with no
//! submission queue or bound on concurrent jobs (a documented limitation
//! of the design, not an accident). The registry is a single mutex-held
//! map; every reader gets a snapshot, so log consumers can poll from an
//! index cursor without racing writers. Log lines are append-only and
//! never reordered.
//!
//! Cancellation is cooperative: the runtime checks the token once before
//! invoking the work closure, and long-running closures are expected to
//! poll it at their own loop boundaries (e.g. between chapters of a
//! batch) and bail with [`Cancelled`]. In-flight work is never forcibly
//! interrupted.
//!
//! Finished tasks stay in the registry until [`TaskRuntime::remove`] is
//! called; there is no TTL. Task state does not survive a process
//! restart.

mod types;

pub use types::{Cancelled, Task, TaskOutput, TaskStatus};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::ProgressFn;

struct TaskEntry {
    task: Task,
    logs: Vec<String>,
    cancel: CancellationToken,
}

/// Shared, cloneable handle to the task registry.
#[derive(Clone, Default)]
pub struct TaskRuntime {
    inner: Arc<Mutex<HashMap<String, TaskEntry>>>,
}

impl TaskRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task and start its work immediately on a separate tokio
    /// task. Returns the task id without waiting for anything.
    ///
    /// The closure receives a logging callback bound to this task and
    /// the task's cancellation token.
    pub fn submit<F, Fut>(&self, kind: &str, work: F) -> String
    where
        F: FnOnce(ProgressFn, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<TaskOutput>> + Send + 'static,
    {
        let id = Uuid::new_v4().simple().to_string();
        let cancel = CancellationToken::new();

        {
            let mut registry = self.lock();
            registry.insert(
                id.clone(),
                TaskEntry {
                    task: Task {
                        id: id.clone(),
                        kind: kind.to_string(),
                        status: TaskStatus::Pending,
                        result: None,
                        error: None,
                        output_files: Vec::new(),
                        cancel_requested: false,
                        created_at: Utc::now(),
                    },
                    logs: Vec::new(),
                    cancel: cancel.clone(),
                },
            );
        }

        let runtime = self.clone();
        let task_id = id.clone();
        let kind = kind.to_string();
        tokio::spawn(async move {
            runtime.run(&task_id, &kind, cancel, work).await;
        });

        id
    }

    async fn run<F, Fut>(&self, id: &str, kind: &str, cancel: CancellationToken, work: F)
    where
        F: FnOnce(ProgressFn, CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<TaskOutput>>,
    {
        self.set_status(id, TaskStatus::Running);
        tracing::debug!(task_id = id, kind, "Task started");

        // Cancellation requested between submit and start: fail fast
        // without ever invoking the work.
        if cancel.is_cancelled() {
            self.log(id, "Task cancelled before start.");
            self.finish_cancelled(id);
            return;
        }

        let logger: ProgressFn = {
            let runtime = self.clone();
            let id = id.to_string();
            Arc::new(move |message: &str| runtime.log(&id, message))
        };

        match work(logger, cancel).await {
            Ok(output) => {
                tracing::info!(task_id = id, kind, "Task succeeded");
                self.finish_success(id, output);
            }
            Err(e) if e.downcast_ref::<Cancelled>().is_some() => {
                tracing::info!(task_id = id, kind, "Task cancelled");
                self.log(id, "Task cancelled.");
                self.finish_cancelled(id);
            }
            Err(e) => {
                tracing::error!(task_id = id, kind, error = %e, "Task failed");
                self.log(id, "Task failed.");
                self.log(id, &format!("{e:?}"));
                self.finish_failed(id, &e.to_string());
            }
        }
    }

    /// Snapshot of a task, or None if unknown.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().get(id).map(|entry| entry.task.clone())
    }

    /// Append one log line. Unknown ids are ignored.
    pub fn log(&self, id: &str, message: &str) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.logs.push(message.to_string());
        }
    }

    /// Snapshot of the full log sequence.
    pub fn logs(&self, id: &str) -> Vec<String> {
        self.lock()
            .get(id)
            .map(|entry| entry.logs.clone())
            .unwrap_or_default()
    }

    /// Log lines appended at or after `cursor`, for streaming consumers
    /// that poll with an index cursor.
    pub fn logs_since(&self, id: &str, cursor: usize) -> Vec<String> {
        self.lock()
            .get(id)
            .map(|entry| entry.logs.iter().skip(cursor).cloned().collect())
            .unwrap_or_default()
    }

    /// Request cancellation. Returns false when the task is unknown or
    /// already terminal; the flag is only settable on live tasks.
    pub fn cancel(&self, id: &str) -> bool {
        let mut registry = self.lock();
        match registry.get_mut(id) {
            Some(entry) if !entry.task.status.is_terminal() => {
                entry.task.cancel_requested = true;
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Whether cancellation has been requested for the task.
    pub fn is_cancelled(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .map(|entry| entry.cancel.is_cancelled())
            .unwrap_or(false)
    }

    /// Drop a finished task from the registry. Returns false when the
    /// task is unknown or still live.
    pub fn remove(&self, id: &str) -> bool {
        let mut registry = self.lock();
        match registry.get(id) {
            Some(entry) if entry.task.status.is_terminal() => {
                registry.remove(id);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.inner.lock().expect("task registry lock poisoned")
    }

    fn set_status(&self, id: &str, status: TaskStatus) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.task.status = status;
        }
    }

    fn finish_success(&self, id: &str, output: TaskOutput) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.task.status = TaskStatus::Success;
            entry.task.result = output.result;
            entry.task.output_files = output.output_files;
        }
    }

    fn finish_failed(&self, id: &str, error: &str) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.task.status = TaskStatus::Failed;
            entry.task.error = Some(error.to_string());
        }
    }

    fn finish_cancelled(&self, id: &str) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.task.status = TaskStatus::Cancelled;
            entry.task.error = Some(Cancelled.to_string());
        }
    }
}
