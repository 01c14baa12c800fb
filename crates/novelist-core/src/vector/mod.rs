//! Vector index types, the store contract, and synchronization policy.
//!
//! The vector database itself (storage engine, similarity search) is an
//! external collaborator behind the [`VectorStore`] trait; this module
//! owns only the reconciliation policy layered on top of it: content-hash
//! change detection, delete-then-insert updates, and grouping summaries.

mod memory;
mod sync;

pub use memory::InMemoryVectorStore;
pub use sync::{
    clear_index, content_hash, delete_chapter, import_knowledge, relevant_context, summarize,
    sync_chapter,
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One indexable chunk of text plus its tags.
///
/// Every segment derived from the same chapter text carries the same
/// `content_hash` (the SHA-256 of the full chapter text, not of the
/// chunk). Knowledge imports carry neither chapter nor hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorSegment {
    pub chapter: Option<u32>,
    pub content_hash: Option<String>,
    pub text: String,
}

impl VectorSegment {
    pub fn for_chapter(chapter: u32, content_hash: &str, text: impl Into<String>) -> Self {
        Self {
            chapter: Some(chapter),
            content_hash: Some(content_hash.to_string()),
            text: text.into(),
        }
    }

    pub fn knowledge(text: impl Into<String>) -> Self {
        Self {
            chapter: None,
            content_hash: None,
            text: text.into(),
        }
    }
}

/// A segment as returned from the store, with its storage id.
#[derive(Debug, Clone)]
pub struct StoredSegment {
    pub id: String,
    pub segment: VectorSegment,
}

/// Metadata filter for [`VectorStore::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFilter {
    /// Segments tagged with this chapter number.
    Chapter(u32),
    /// Every stored segment.
    All,
}

/// Project-scoped vector store contract.
///
/// A store instance is bound to one project's index directory. Existence
/// of persisted state is the signal for "already initialized"; the sync
/// policy never creates state through any other path.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether the store has been initialized for this project.
    async fn exists(&self) -> bool;

    /// Create the store and insert the first batch of segments.
    async fn initialize(&self, segments: Vec<VectorSegment>) -> Result<()>;

    /// Fetch stored segments matching the filter.
    async fn query(&self, filter: SegmentFilter) -> Result<Vec<StoredSegment>>;

    /// Insert segments into an existing store.
    async fn add_documents(&self, segments: Vec<VectorSegment>) -> Result<()>;

    /// Remove segments by storage id.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Destroy the store and all persisted state. Returns whether a
    /// store existed; a later sync re-initializes from scratch.
    async fn clear(&self) -> Result<bool>;

    /// Top-k segments most similar to the query text.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<VectorSegment>>;
}

/// Outcome of reconciling one chapter against the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    pub updated: bool,
    pub reason: SyncReason,
    pub segments: usize,
}

impl SyncOutcome {
    pub fn skipped(reason: SyncReason) -> Self {
        Self {
            updated: false,
            reason,
            segments: 0,
        }
    }
}

/// Why a sync call did or did not touch the index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// Store did not exist; created with this chapter's segments.
    Initialized,
    /// Segments for the chapter were (re)inserted.
    Updated,
    /// Stored hash matches the new text; nothing re-embedded.
    Unchanged,
    /// Chapter text produced no segments.
    EmptyText,
    /// Store creation failed; indexing skipped.
    InitFailed,
    /// Delete/insert failed; indexing skipped.
    UpdateFailed,
    /// Caller opted out of vector sync.
    Skipped,
    /// The sync sub-task itself errored.
    Error,
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncReason::Initialized => "initialized",
            SyncReason::Updated => "updated",
            SyncReason::Unchanged => "unchanged",
            SyncReason::EmptyText => "empty_text",
            SyncReason::InitFailed => "init_failed",
            SyncReason::UpdateFailed => "update_failed",
            SyncReason::Skipped => "skipped",
            SyncReason::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Per-chapter (plus knowledge) segment counts for the whole index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSummary {
    pub total_count: usize,
    pub groups: Vec<IndexGroup>,
}

/// One bucket in an [`IndexSummary`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexGroup {
    Chapter { chapter: u32, count: usize },
    Knowledge { count: usize },
}
