//! Task records and payload types for the background job runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a background task. Transitions are monotonic:
/// Pending → Running → one terminal state, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Voluntary abort, kept distinct from Failed so callers can tell
    /// user-requested cancellation apart from real errors.
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of one background task.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    /// Job type tag, e.g. "finalize" or "batch".
    pub kind: String,
    pub status: TaskStatus,
    /// Success payload; None unless status is Success.
    pub result: Option<serde_json::Value>,
    /// Error message; None unless status is Failed or Cancelled.
    pub error: Option<String>,
    /// Logical artifact identifiers touched by the job.
    pub output_files: Vec<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

/// What a job's work closure hands back on success.
#[derive(Debug, Default)]
pub struct TaskOutput {
    pub result: Option<serde_json::Value>,
    pub output_files: Vec<String>,
}

impl TaskOutput {
    pub fn with_result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn output_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_files = files.into_iter().map(Into::into).collect();
        self
    }
}

/// Marker error raised by work closures on cooperative cancellation.
/// The runtime downcasts for it to resolve the task as Cancelled.
#[derive(Debug, thiserror::Error)]
#[error("task cancelled")]
pub struct Cancelled;
