//! Novelist Core - Backend orchestration for AI-assisted novel writing
//!
//! This crate contains the backend logic shared by every frontend,
//! including:
//! - Background task runtime (submit, poll, cancel, logs)
//! - Chapter finalization pipeline (summary, character state, vector sync)
//! - Incremental vector index synchronization with content-hash skipping
//! - LLM retry/backoff with fatal-error classification
//! - Sentence-aware text chunking
//! - Project file storage (chapters, summary, character state)

pub mod chunker;
pub mod config;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod vector;

pub use chunker::TextChunker;
pub use config::RuntimeConfig;
pub use pipeline::{FinalizationPipeline, FinalizeOptions, ProgressFn};
pub use provider::{EmbeddingProvider, TextGenerator};
pub use retry::RetryPolicy;
pub use service::NovelService;
pub use storage::ProjectStorage;
pub use tasks::{Task, TaskRuntime, TaskStatus};
pub use vector::{SyncOutcome, VectorStore};
