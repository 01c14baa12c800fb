//! Job-submitting entry points: each user action becomes one background
//! task whose work closure drives the pipeline or the vector index.
//!
//! This is the seam an API layer calls into; everything here returns a
//! task id immediately and reports through the task's log and result.

use std::sync::Arc;

use serde_json::json;

use crate::chunker::TextChunker;
use crate::config::RuntimeConfig;
use crate::pipeline::{FinalizationPipeline, FinalizeOptions};
use crate::storage::ProjectStorage;
use crate::tasks::{Cancelled, TaskOutput, TaskRuntime};
use crate::vector::{self, VectorStore};

/// One project's job entry points, cheap to clone.
#[derive(Clone)]
pub struct NovelService {
    runtime: TaskRuntime,
    pipeline: Arc<FinalizationPipeline>,
    store: Arc<dyn VectorStore>,
    storage: Arc<ProjectStorage>,
    chunker: TextChunker,
    retrieval_k: usize,
}

impl NovelService {
    pub fn new(
        runtime: TaskRuntime,
        pipeline: Arc<FinalizationPipeline>,
        store: Arc<dyn VectorStore>,
        storage: Arc<ProjectStorage>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            runtime,
            pipeline,
            store,
            storage,
            chunker: TextChunker::new(config.max_chunk_chars),
            retrieval_k: config.retrieval_k,
        }
    }

    pub fn runtime(&self) -> &TaskRuntime {
        &self.runtime
    }

    /// Finalize one chapter in the background.
    ///
    /// The task result carries the finalization report plus the
    /// refreshed summary and character state; output files name what the
    /// job touched.
    pub fn spawn_finalize(&self, chapter: u32, options: FinalizeOptions) -> String {
        let pipeline = self.pipeline.clone();
        let storage = self.storage.clone();
        self.runtime.submit("finalize", move |log, _cancel| async move {
            log(&format!("Finalizing chapter {chapter}..."));
            let report = pipeline.finalize(&storage, chapter, options, &log).await?;
            log("Finalization completed.");

            let summary = storage.read_summary().await?;
            let character_state = storage.read_character_state().await?;

            let mut output_files = vec!["summary".to_string(), "character_state".to_string()];
            if report.vector_sync.updated {
                output_files.push("vectorstore".to_string());
            }

            Ok(TaskOutput::with_result(json!({
                "global_summary": summary,
                "character_state": character_state,
                "finalize_report": report,
            }))
            .output_files(output_files))
        })
    }

    /// Finalize a chapter range, checking for cancellation before each
    /// chapter. Already-empty chapters are skipped by the pipeline.
    pub fn spawn_batch_finalize(
        &self,
        start_chapter: u32,
        end_chapter: u32,
        options: FinalizeOptions,
    ) -> String {
        let pipeline = self.pipeline.clone();
        let storage = self.storage.clone();
        self.runtime.submit("batch", move |log, cancel| async move {
            let mut chapters = Vec::new();
            for chapter in start_chapter..=end_chapter {
                if cancel.is_cancelled() {
                    log("Batch cancelled.");
                    anyhow::bail!(Cancelled);
                }

                log(&format!("Finalizing chapter {chapter}..."));
                let report = pipeline.finalize(&storage, chapter, options, &log).await?;
                log(&format!(
                    "Chapter {chapter} finalized in {}s.",
                    report.timings.total_seconds
                ));
                chapters.push(json!({
                    "chapter": chapter,
                    "status": report.status,
                    "vector_sync": report.vector_sync,
                }));
                log(&format!("[CHAPTER_DONE] {chapter}"));
            }
            log("Batch completed.");
            Ok(TaskOutput::with_result(json!({ "chapters": chapters })))
        })
    }

    /// Report per-chapter segment counts for the whole index.
    pub fn spawn_index_summary(&self) -> String {
        let store = self.store.clone();
        self.runtime.submit("index_summary", move |log, _cancel| async move {
            log("Summarizing vector index...");
            let summary = vector::summarize(store.as_ref()).await;
            log(&format!(
                "Vector index summary: {} total segments.",
                summary.total_count
            ));
            Ok(TaskOutput::with_result(serde_json::to_value(summary)?))
        })
    }

    /// Remove every indexed segment for one chapter.
    pub fn spawn_delete_chapter(&self, chapter: u32) -> String {
        let store = self.store.clone();
        self.runtime.submit("index_delete", move |log, _cancel| async move {
            log(&format!("Deleting chapter {chapter} from vector index..."));
            let deleted = vector::delete_chapter(store.as_ref(), chapter).await;
            log(&format!(
                "Deleted {deleted} segments for chapter {chapter}."
            ));
            Ok(TaskOutput::with_result(json!({ "deleted_count": deleted }))
                .output_files(["vectorstore"]))
        })
    }

    /// Destroy the whole vector index. The next finalization rebuilds it
    /// from scratch.
    pub fn spawn_clear_index(&self) -> String {
        let store = self.store.clone();
        self.runtime.submit("index_clear", move |log, _cancel| async move {
            log("Clearing vector index...");
            let cleared = vector::clear_index(store.as_ref()).await;
            log(if cleared {
                "Vector index cleared."
            } else {
                "No vector index to clear."
            });
            Ok(TaskOutput::with_result(json!({ "cleared": cleared }))
                .output_files(["vectorstore"]))
        })
    }

    /// Index reference material with no chapter tag.
    pub fn spawn_knowledge_import(&self, text: String) -> String {
        let store = self.store.clone();
        let chunker = self.chunker.clone();
        self.runtime.submit("knowledge_import", move |log, _cancel| async move {
            log("Importing knowledge text...");
            let count = vector::import_knowledge(store.as_ref(), &chunker, &text).await?;
            log(&format!("Knowledge import completed: {count} segments."));
            Ok(TaskOutput::with_result(json!({ "segments": count }))
                .output_files(["vectorstore"]))
        })
    }

    /// Top-k index context for a query, for prompt assembly. Not a task;
    /// callers use it inline while building prompts.
    pub async fn relevant_context(&self, query: &str) -> String {
        vector::relevant_context(self.store.as_ref(), query, self.retrieval_k).await
    }
}
