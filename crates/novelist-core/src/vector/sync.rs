//! Incremental vector index synchronization.
//!
//! Re-finalizing a chapter is idempotent: the SHA-256 of the full chapter
//! text is stored on every segment, and a single hash comparison decides
//! whether re-embedding is needed. Index failures never propagate; every
//! entry point degrades to a skip so finalization can proceed unindexed.

use sha2::{Digest, Sha256};

use crate::chunker::TextChunker;

use super::{
    IndexGroup, IndexSummary, SegmentFilter, SyncOutcome, SyncReason, VectorSegment, VectorStore,
};

/// Cap on the combined text returned by [`relevant_context`].
const MAX_CONTEXT_CHARS: usize = 2000;

/// SHA-256 of the full text, lowercase hex.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Reconcile one chapter's segments against the index.
///
/// Initializes the store when absent, skips re-embedding when the stored
/// content hash matches the new text, and otherwise replaces the
/// chapter's segments wholesale. Never fails: index trouble is reported
/// through the outcome's reason and logged, not raised.
pub async fn sync_chapter(
    store: &dyn VectorStore,
    chunker: &TextChunker,
    chapter: u32,
    chapter_text: &str,
) -> SyncOutcome {
    let texts = chunker.split(chapter_text);
    if texts.is_empty() {
        tracing::warn!(chapter, "No indexable text in chapter, skipping vector sync");
        return SyncOutcome::skipped(SyncReason::EmptyText);
    }

    let hash = content_hash(chapter_text);
    let segments: Vec<VectorSegment> = texts
        .iter()
        .map(|t| VectorSegment::for_chapter(chapter, &hash, t.clone()))
        .collect();
    let segment_count = segments.len();

    if !store.exists().await {
        tracing::info!(chapter, segment_count, "Vector store absent, initializing");
        return match store.initialize(segments).await {
            Ok(()) => SyncOutcome {
                updated: true,
                reason: SyncReason::Initialized,
                segments: segment_count,
            },
            Err(e) => {
                tracing::warn!(chapter, error = %e, "Vector store init failed, skipping");
                SyncOutcome {
                    updated: false,
                    reason: SyncReason::InitFailed,
                    segments: segment_count,
                }
            }
        };
    }

    match reconcile_existing(store, chapter, &hash, segments).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(chapter, error = %e, "Vector store update failed, skipping");
            SyncOutcome {
                updated: false,
                reason: SyncReason::UpdateFailed,
                segments: segment_count,
            }
        }
    }
}

async fn reconcile_existing(
    store: &dyn VectorStore,
    chapter: u32,
    hash: &str,
    segments: Vec<VectorSegment>,
) -> anyhow::Result<SyncOutcome> {
    let segment_count = segments.len();

    // Delete failures here are tolerated; the insert below still runs so
    // a re-finalization can recover from a previously broken state.
    match store.query(SegmentFilter::Chapter(chapter)).await {
        Ok(existing) if !existing.is_empty() => {
            let mut hashes: Vec<&str> = existing
                .iter()
                .filter_map(|s| s.segment.content_hash.as_deref())
                .collect();
            hashes.sort_unstable();
            hashes.dedup();

            // Unchanged only when the stored hashes are homogeneous and
            // equal to the new one. Mixed hashes (e.g. a partial write)
            // degrade to a full re-embed.
            if hashes.len() == 1 && hashes[0] == hash {
                tracing::info!(chapter, "Chapter content unchanged, skipping re-embedding");
                return Ok(SyncOutcome {
                    updated: false,
                    reason: SyncReason::Unchanged,
                    segments: segment_count,
                });
            }

            let ids: Vec<String> = existing.into_iter().map(|s| s.id).collect();
            match store.delete(&ids).await {
                Ok(()) => {
                    tracing::info!(chapter, deleted = ids.len(), "Deleted stale chapter segments")
                }
                Err(e) => {
                    tracing::warn!(chapter, error = %e, "Failed to delete stale chapter segments")
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(chapter, error = %e, "Failed to query existing chapter segments");
        }
    }

    store.add_documents(segments).await?;
    tracing::info!(chapter, segment_count, "Vector index updated");
    Ok(SyncOutcome {
        updated: true,
        reason: SyncReason::Updated,
        segments: segment_count,
    })
}

/// Remove every segment tagged with the chapter. Returns the number
/// removed; 0 when the store is absent or the operation fails.
pub async fn delete_chapter(store: &dyn VectorStore, chapter: u32) -> usize {
    if !store.exists().await {
        tracing::info!(chapter, "Vector store absent, nothing to delete");
        return 0;
    }

    let existing = match store.query(SegmentFilter::Chapter(chapter)).await {
        Ok(existing) => existing,
        Err(e) => {
            tracing::warn!(chapter, error = %e, "Failed to query chapter segments");
            return 0;
        }
    };
    if existing.is_empty() {
        tracing::info!(chapter, "No segments stored for chapter");
        return 0;
    }

    let ids: Vec<String> = existing.into_iter().map(|s| s.id).collect();
    match store.delete(&ids).await {
        Ok(()) => {
            tracing::info!(chapter, deleted = ids.len(), "Deleted chapter segments");
            ids.len()
        }
        Err(e) => {
            tracing::warn!(chapter, error = %e, "Failed to delete chapter segments");
            0
        }
    }
}

/// Destroy the whole index. Returns true when a store existed and was
/// removed; false when there was nothing to clear or clearing failed.
pub async fn clear_index(store: &dyn VectorStore) -> bool {
    match store.clear().await {
        Ok(existed) => {
            if existed {
                tracing::info!("Vector index cleared");
            } else {
                tracing::info!("Vector store absent, nothing to clear");
            }
            existed
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to clear vector index");
            false
        }
    }
}

/// Group stored segments by chapter, with untagged (knowledge) segments
/// in a single trailing bucket. Absent or unreadable stores summarize
/// to zero.
pub async fn summarize(store: &dyn VectorStore) -> IndexSummary {
    if !store.exists().await {
        tracing::info!("Vector store absent, empty summary");
        return IndexSummary::default();
    }

    let stored = match store.query(SegmentFilter::All).await {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read vector store for summary");
            return IndexSummary::default();
        }
    };

    let total_count = stored.len();
    let mut per_chapter: std::collections::BTreeMap<u32, usize> = std::collections::BTreeMap::new();
    let mut knowledge_count = 0usize;
    for item in stored {
        match item.segment.chapter {
            Some(chapter) => *per_chapter.entry(chapter).or_default() += 1,
            None => knowledge_count += 1,
        }
    }

    let mut groups: Vec<IndexGroup> = per_chapter
        .into_iter()
        .map(|(chapter, count)| IndexGroup::Chapter { chapter, count })
        .collect();
    if knowledge_count > 0 {
        groups.push(IndexGroup::Knowledge {
            count: knowledge_count,
        });
    }

    IndexSummary {
        total_count,
        groups,
    }
}

/// Top-k similar segments joined by newline, capped at 2000 characters.
/// Returns the empty string when the store is absent or search fails.
pub async fn relevant_context(store: &dyn VectorStore, query: &str, k: usize) -> String {
    if !store.exists().await {
        tracing::info!("Vector store absent, returning empty context");
        return String::new();
    }

    match store.similarity_search(query, k).await {
        Ok(segments) if segments.is_empty() => {
            tracing::info!(query, "No relevant segments found");
            String::new()
        }
        Ok(segments) => {
            let combined = segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            combined.chars().take(MAX_CONTEXT_CHARS).collect()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Similarity search failed");
            String::new()
        }
    }
}

/// Import reference material into the index with no chapter tag.
///
/// Knowledge segments participate in similarity search and show up as
/// the trailing bucket in [`summarize`]. Unlike chapter sync, failures
/// here propagate: an import the user asked for must not silently no-op.
pub async fn import_knowledge(
    store: &dyn VectorStore,
    chunker: &TextChunker,
    text: &str,
) -> anyhow::Result<usize> {
    let segments: Vec<VectorSegment> = chunker
        .split(text)
        .into_iter()
        .map(VectorSegment::knowledge)
        .collect();
    if segments.is_empty() {
        return Ok(0);
    }
    let count = segments.len();

    if store.exists().await {
        store.add_documents(segments).await?;
    } else {
        store.initialize(segments).await?;
    }
    tracing::info!(segment_count = count, "Knowledge imported into vector index");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EmbeddingProvider;
    use crate::vector::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Deterministic embedder that counts how many texts it embeds.
    struct CountingEmbedder {
        embedded: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                embedded: AtomicUsize::new(0),
            })
        }

        fn embedded(&self) -> usize {
            self.embedded.load(Ordering::SeqCst)
        }

        fn vector_for(text: &str) -> Vec<f32> {
            let len = text.chars().count() as f32;
            vec![len, 1.0]
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.embedded.fetch_add(1, Ordering::SeqCst);
            Ok(Self::vector_for(text))
        }

        async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    fn setup() -> (Arc<CountingEmbedder>, InMemoryVectorStore, TextChunker) {
        let embedder = CountingEmbedder::new();
        let store = InMemoryVectorStore::new(embedder.clone());
        (embedder, store, TextChunker::new(50))
    }

    const CHAPTER_TEXT: &str = "Alpha sets out at dawn. Beta follows the river north. \
                                Gamma waits in the ruined tower.";

    #[tokio::test]
    async fn empty_text_skips() {
        let (_, store, chunker) = setup();
        let outcome = sync_chapter(&store, &chunker, 1, "   ").await;
        assert_eq!(outcome, SyncOutcome::skipped(SyncReason::EmptyText));
        assert!(!store.exists().await);
    }

    #[tokio::test]
    async fn first_sync_initializes_store() {
        let (embedder, store, chunker) = setup();
        let outcome = sync_chapter(&store, &chunker, 1, CHAPTER_TEXT).await;
        assert!(outcome.updated);
        assert_eq!(outcome.reason, SyncReason::Initialized);
        assert!(outcome.segments > 0);
        assert_eq!(embedder.embedded(), outcome.segments);
    }

    #[tokio::test]
    async fn identical_resync_is_unchanged_and_embeds_nothing() {
        let (embedder, store, chunker) = setup();
        let first = sync_chapter(&store, &chunker, 7, CHAPTER_TEXT).await;
        let embeds_after_first = embedder.embedded();

        let second = sync_chapter(&store, &chunker, 7, CHAPTER_TEXT).await;
        assert!(!second.updated);
        assert_eq!(second.reason, SyncReason::Unchanged);
        assert_eq!(second.segments, first.segments);
        assert_eq!(embedder.embedded(), embeds_after_first);

        let summary = summarize(&store).await;
        assert_eq!(summary.total_count, first.segments);
    }

    #[tokio::test]
    async fn changed_text_replaces_old_segments() {
        let (_, store, chunker) = setup();
        sync_chapter(&store, &chunker, 2, CHAPTER_TEXT).await;

        let revised = "Everything changed overnight. The tower fell. Delta took command \
                       of the survivors and marched them east.";
        let outcome = sync_chapter(&store, &chunker, 2, revised).await;
        assert!(outcome.updated);
        assert_eq!(outcome.reason, SyncReason::Updated);

        // Only the new segments remain for the chapter, not old + new.
        let summary = summarize(&store).await;
        assert_eq!(summary.total_count, outcome.segments);
        assert_eq!(
            summary.groups,
            vec![IndexGroup::Chapter {
                chapter: 2,
                count: outcome.segments
            }]
        );
    }

    #[tokio::test]
    async fn mixed_hashes_force_reembed() {
        let (_, store, chunker) = setup();
        sync_chapter(&store, &chunker, 3, CHAPTER_TEXT).await;

        // Simulate a partial write: one extra segment with a foreign hash.
        store
            .add_documents(vec![VectorSegment::for_chapter(3, "deadbeef", "stray")])
            .await
            .unwrap();

        let outcome = sync_chapter(&store, &chunker, 3, CHAPTER_TEXT).await;
        assert_eq!(outcome.reason, SyncReason::Updated);
        let summary = summarize(&store).await;
        assert_eq!(summary.total_count, outcome.segments);
    }

    #[tokio::test]
    async fn delete_chapter_reports_count() {
        let (_, store, chunker) = setup();
        let outcome = sync_chapter(&store, &chunker, 4, CHAPTER_TEXT).await;
        assert_eq!(delete_chapter(&store, 4).await, outcome.segments);
        assert_eq!(delete_chapter(&store, 4).await, 0);
        assert_eq!(summarize(&store).await.total_count, 0);
    }

    #[tokio::test]
    async fn clear_index_destroys_everything() {
        let (_, store, chunker) = setup();
        sync_chapter(&store, &chunker, 1, CHAPTER_TEXT).await;
        import_knowledge(&store, &chunker, "Lore entry.").await.unwrap();

        assert!(clear_index(&store).await);
        assert!(!store.exists().await);
        assert_eq!(summarize(&store).await.total_count, 0);

        // Cleared store behaves like a fresh project: next sync re-inits.
        let outcome = sync_chapter(&store, &chunker, 1, CHAPTER_TEXT).await;
        assert_eq!(outcome.reason, SyncReason::Initialized);
    }

    #[tokio::test]
    async fn clear_on_absent_store_is_false() {
        let (_, store, _) = setup();
        assert!(!clear_index(&store).await);
    }

    #[tokio::test]
    async fn delete_on_absent_store_is_zero() {
        let (_, store, _) = setup();
        assert_eq!(delete_chapter(&store, 1).await, 0);
    }

    #[tokio::test]
    async fn summary_orders_chapters_and_puts_knowledge_last() {
        let (_, store, chunker) = setup();
        sync_chapter(&store, &chunker, 9, CHAPTER_TEXT).await;
        sync_chapter(&store, &chunker, 2, "A short chapter. Nothing more.").await;
        let imported = import_knowledge(&store, &chunker, "Lore entry one. Lore entry two.")
            .await
            .unwrap();
        assert!(imported > 0);

        let summary = summarize(&store).await;
        let chapters: Vec<u32> = summary
            .groups
            .iter()
            .filter_map(|g| match g {
                IndexGroup::Chapter { chapter, .. } => Some(*chapter),
                IndexGroup::Knowledge { .. } => None,
            })
            .collect();
        assert_eq!(chapters, vec![2, 9]);
        assert!(matches!(
            summary.groups.last(),
            Some(IndexGroup::Knowledge { count }) if *count == imported
        ));
    }

    #[tokio::test]
    async fn relevant_context_joins_and_caps() {
        let (_, store, chunker) = setup();
        sync_chapter(&store, &chunker, 1, CHAPTER_TEXT).await;
        let context = relevant_context(&store, "where is gamma", 2).await;
        assert!(!context.is_empty());
        assert!(context.chars().count() <= 2000);
    }

    #[tokio::test]
    async fn relevant_context_empty_without_store() {
        let (_, store, _) = setup();
        assert_eq!(relevant_context(&store, "anything", 2).await, "");
    }

    #[test]
    fn content_hash_is_stable_sha256() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        // Known SHA-256 of "abc".
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
