//! Chapter finalization: summary update, character-state update, and
//! vector index sync for a finished chapter.
//!
//! The three sub-steps run on a bounded pool and are captured
//! independently; a failing sub-step never cancels its siblings. Summary
//! and character-state each get one serial fallback retry, vector sync
//! failures are tolerated outright. The pipeline itself only errors on
//! unrecoverable I/O (reading the chapter, persisting results).

mod types;

pub use types::{
    FinalizationReport, FinalizeOptions, FinalizeStatus, FinalizeTimings, StepReport,
};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::chunker::TextChunker;
use crate::config::RuntimeConfig;
use crate::prompts;
use crate::provider::TextGenerator;
use crate::retry::invoke_with_cleaning;
use crate::storage::ProjectStorage;
use crate::vector::{sync_chapter, SyncOutcome, SyncReason, VectorStore};

use types::round3;

/// Caller-supplied progress sink; messages also go to tracing.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Progress sink that drops every message.
pub fn noop_progress() -> ProgressFn {
    Arc::new(|_| {})
}

fn emit(progress: &ProgressFn, message: &str) {
    tracing::info!("{message}");
    progress(message);
}

/// Run a sub-step and record its outcome and wall-clock duration.
async fn timed_step<T, F>(step: F) -> StepReport<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    let result = step.await.map_err(|e| e.to_string());
    StepReport {
        result,
        seconds: round3(started.elapsed().as_secs_f64()),
    }
}

/// Orchestrates the per-chapter finalization sub-steps.
pub struct FinalizationPipeline {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn VectorStore>,
    chunker: TextChunker,
    config: RuntimeConfig,
}

impl FinalizationPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn VectorStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            generator,
            store,
            chunker: TextChunker::new(config.max_chunk_chars),
            config,
        }
    }

    async fn invoke_cleaned(&self, prompt: String) -> anyhow::Result<String> {
        invoke_with_cleaning(
            self.generator.as_ref(),
            &self.config.retry,
            &prompt,
            self.config.llm_max_retries,
        )
        .await
    }

    /// Finalize one chapter.
    ///
    /// Reads the chapter text, derives the updated summary and character
    /// state in parallel with the vector sync, commits both files
    /// atomically, and reports what actually changed. An empty chapter
    /// terminates early without touching any stored file.
    pub async fn finalize(
        &self,
        storage: &ProjectStorage,
        chapter: u32,
        options: FinalizeOptions,
        progress: &ProgressFn,
    ) -> anyhow::Result<FinalizationReport> {
        let total_started = Instant::now();
        emit(progress, &format!("Finalization started: chapter {chapter}"));

        let chapter_text = storage.read_chapter(chapter).await?.trim().to_string();
        if chapter_text.is_empty() {
            emit(
                progress,
                &format!("Chapter {chapter} is empty, skipping finalization."),
            );
            return Ok(FinalizationReport {
                status: FinalizeStatus::SkippedEmptyChapter,
                summary_updated: false,
                character_state_updated: false,
                vector_sync: SyncOutcome::skipped(SyncReason::EmptyText),
                timings: FinalizeTimings {
                    total_seconds: round3(total_started.elapsed().as_secs_f64()),
                    ..Default::default()
                },
            });
        }

        let old_summary = storage.read_summary().await?;
        let old_state = storage.read_character_state().await?;

        let summary_prompt = prompts::summary_update_prompt(&old_summary, &chapter_text);
        let state_prompt = prompts::character_state_prompt(&old_state, &chapter_text);

        emit(
            progress,
            &format!(
                "Finalization sub-tasks submitted (chapter length={}, summary length={}, \
                 character state length={})",
                chapter_text.chars().count(),
                old_summary.chars().count(),
                old_state.chars().count(),
            ),
        );

        // Parallel phase: every enabled sub-task goes through the bounded
        // pool; results are captured regardless of outcome.
        let workers = self.config.parallel_workers.max(1);
        let pool = Arc::new(Semaphore::new(workers));

        let summary_handle = self.spawn_generation(&pool, summary_prompt.clone());
        let state_handle = self.spawn_generation(&pool, state_prompt.clone());

        let vector_handle = if options.skip_vector_sync {
            None
        } else {
            let pool = pool.clone();
            let store = self.store.clone();
            let chunker = self.chunker.clone();
            let text = chapter_text.clone();
            Some(tokio::spawn(async move {
                let _permit = pool.acquire_owned().await.ok();
                timed_step(async {
                    Ok::<_, anyhow::Error>(
                        sync_chapter(store.as_ref(), &chunker, chapter, &text).await,
                    )
                })
                .await
            }))
        };

        let (summary_joined, state_joined) =
            futures::future::join(summary_handle, state_handle).await;
        let mut summary_step = summary_joined.unwrap_or_else(StepReport::panicked);
        let mut state_step = state_joined.unwrap_or_else(StepReport::panicked);
        let vector_step = match vector_handle {
            Some(handle) => handle.await.unwrap_or_else(StepReport::panicked),
            None => StepReport {
                result: Ok(SyncOutcome::skipped(SyncReason::Skipped)),
                seconds: 0.0,
            },
        };

        // Fallback phase: one serial retry each for the text sub-tasks,
        // elapsed time accumulated onto the first attempt.
        if summary_step.result.is_err() {
            emit(
                progress,
                "Summary update failed in parallel phase, retrying serially once.",
            );
            let first_seconds = summary_step.seconds;
            let mut retry = timed_step(self.invoke_cleaned(summary_prompt)).await;
            retry.seconds = round3(first_seconds + retry.seconds);
            summary_step = retry;
        }
        if state_step.result.is_err() {
            emit(
                progress,
                "Character state update failed in parallel phase, retrying serially once.",
            );
            let first_seconds = state_step.seconds;
            let mut retry = timed_step(self.invoke_cleaned(state_prompt)).await;
            retry.seconds = round3(first_seconds + retry.seconds);
            state_step = retry;
        }

        // Commit: keep old content whenever a step failed or came back
        // blank, and flag an update only on a real change.
        let (summary_text, summary_updated) =
            commit_text(&summary_step, &old_summary, "summary", progress);
        let (state_text, character_state_updated) =
            commit_text(&state_step, &old_state, "character state", progress);

        storage.write_summary(&summary_text).await?;
        storage.write_character_state(&state_text).await?;

        let vector_sync = match vector_step.result {
            Ok(outcome) => outcome,
            Err(ref e) => {
                emit(
                    progress,
                    &format!("Vector index update failed, skipped. Reason: {e}"),
                );
                SyncOutcome::skipped(SyncReason::Error)
            }
        };
        if vector_sync.reason == SyncReason::Unchanged {
            emit(
                progress,
                "Chapter content unchanged in vector index, re-embedding skipped.",
            );
        }

        let timings = FinalizeTimings {
            summary_update_seconds: summary_step.seconds,
            character_state_update_seconds: state_step.seconds,
            vector_sync_seconds: vector_step.seconds,
            total_seconds: round3(total_started.elapsed().as_secs_f64()),
        };
        emit(
            progress,
            &format!(
                "Finalization complete: chapter {chapter} (summary={}s, character={}s, \
                 vector={}s, total={}s)",
                timings.summary_update_seconds,
                timings.character_state_update_seconds,
                timings.vector_sync_seconds,
                timings.total_seconds,
            ),
        );

        Ok(FinalizationReport {
            status: FinalizeStatus::Ok,
            summary_updated,
            character_state_updated,
            vector_sync,
            timings,
        })
    }

    /// Expand a short chapter toward the word budget, keeping the plot.
    /// Returns the original text when the model produces nothing usable.
    pub async fn enrich(&self, chapter_text: &str, word_budget: u32) -> anyhow::Result<String> {
        let prompt = format!(
            "The following chapter is short. Expand it to roughly {word_budget} words \
             while keeping the plot coherent. Output only the final text.\n\n\
             Original:\n{chapter_text}\n"
        );
        let enriched = invoke_with_cleaning(
            self.generator.as_ref(),
            &self.config.retry,
            &prompt,
            self.config.invoke_max_retries,
        )
        .await?;
        if enriched.is_empty() {
            Ok(chapter_text.to_string())
        } else {
            Ok(enriched)
        }
    }

    fn spawn_generation(
        &self,
        pool: &Arc<Semaphore>,
        prompt: String,
    ) -> tokio::task::JoinHandle<StepReport<String>> {
        let pool = pool.clone();
        let generator = self.generator.clone();
        let policy = self.config.retry;
        let max_retries = self.config.llm_max_retries;
        tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.ok();
            timed_step(invoke_with_cleaning(
                generator.as_ref(),
                &policy,
                &prompt,
                max_retries,
            ))
            .await
        })
    }
}

/// Pick the committed text for one sub-step and whether it changed.
fn commit_text(
    step: &StepReport<String>,
    old: &str,
    label: &str,
    progress: &ProgressFn,
) -> (String, bool) {
    match &step.result {
        Ok(candidate) => {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                emit(
                    progress,
                    &format!("New {label} was empty, keeping the previous one."),
                );
                (old.to_string(), false)
            } else {
                (candidate.to_string(), candidate != old)
            }
        }
        Err(e) => {
            emit(
                progress,
                &format!("{label} update failed, keeping the previous one. Reason: {e}"),
            );
            (old.to_string(), false)
        }
    }
}
