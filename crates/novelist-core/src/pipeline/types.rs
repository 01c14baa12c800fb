//! Report types for chapter finalization.

use serde::{Deserialize, Serialize};

use crate::vector::SyncOutcome;

/// Terminal status of one finalization run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeStatus {
    Ok,
    SkippedEmptyChapter,
}

/// Per-invocation options for [`crate::pipeline::FinalizationPipeline::finalize`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeOptions {
    /// Skip the vector index sub-task entirely.
    pub skip_vector_sync: bool,
}

/// Outcome of one timed sub-step, elapsed time accumulated across a
/// fallback retry when one happens.
#[derive(Debug)]
pub struct StepReport<T> {
    pub result: Result<T, String>,
    pub seconds: f64,
}

impl<T> StepReport<T> {
    pub fn panicked(err: tokio::task::JoinError) -> Self {
        Self {
            result: Err(format!("sub-task panicked: {err}")),
            seconds: 0.0,
        }
    }
}

/// Wall-clock seconds per sub-step, rounded to milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FinalizeTimings {
    pub summary_update_seconds: f64,
    pub character_state_update_seconds: f64,
    pub vector_sync_seconds: f64,
    pub total_seconds: f64,
}

/// Aggregate result of finalizing one chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizationReport {
    pub status: FinalizeStatus,
    /// True only if the persisted summary differs from the previous one.
    pub summary_updated: bool,
    /// True only if the persisted character state differs from before.
    pub character_state_updated: bool,
    pub vector_sync: SyncOutcome,
    pub timings: FinalizeTimings,
}

pub(crate) fn round3(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
