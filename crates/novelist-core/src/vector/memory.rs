//! In-memory vector store for tests and headless runs.
//!
//! Embeds through the supplied provider on every insert so callers see
//! the same embedding traffic a persistent store would generate, and
//! ranks similarity search by cosine distance.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::provider::EmbeddingProvider;

use super::{SegmentFilter, StoredSegment, VectorSegment, VectorStore};

struct Row {
    id: String,
    segment: VectorSegment,
    vector: Vec<f32>,
}

/// Embedding-backed vector store held entirely in memory.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    // None until `initialize` runs; mirrors "no store directory yet".
    rows: Mutex<Option<Vec<Row>>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            rows: Mutex::new(None),
        }
    }

    async fn embed_rows(&self, segments: Vec<VectorSegment>) -> Result<Vec<Row>> {
        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        anyhow::ensure!(
            vectors.len() == segments.len(),
            "embedding provider returned {} vectors for {} texts",
            vectors.len(),
            segments.len()
        );
        Ok(segments
            .into_iter()
            .zip(vectors)
            .map(|(segment, vector)| Row {
                id: Uuid::new_v4().to_string(),
                segment,
                vector,
            })
            .collect())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn exists(&self) -> bool {
        self.rows.lock().expect("store lock poisoned").is_some()
    }

    async fn initialize(&self, segments: Vec<VectorSegment>) -> Result<()> {
        let rows = self.embed_rows(segments).await?;
        *self.rows.lock().expect("store lock poisoned") = Some(rows);
        Ok(())
    }

    async fn query(&self, filter: SegmentFilter) -> Result<Vec<StoredSegment>> {
        let guard = self.rows.lock().expect("store lock poisoned");
        let rows = guard.as_ref().context("vector store not initialized")?;
        Ok(rows
            .iter()
            .filter(|row| match filter {
                SegmentFilter::Chapter(n) => row.segment.chapter == Some(n),
                SegmentFilter::All => true,
            })
            .map(|row| StoredSegment {
                id: row.id.clone(),
                segment: row.segment.clone(),
            })
            .collect())
    }

    async fn add_documents(&self, segments: Vec<VectorSegment>) -> Result<()> {
        let new_rows = self.embed_rows(segments).await?;
        let mut guard = self.rows.lock().expect("store lock poisoned");
        let rows = guard.as_mut().context("vector store not initialized")?;
        rows.extend(new_rows);
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut guard = self.rows.lock().expect("store lock poisoned");
        let rows = guard.as_mut().context("vector store not initialized")?;
        rows.retain(|row| !ids.contains(&row.id));
        Ok(())
    }

    async fn clear(&self) -> Result<bool> {
        Ok(self.rows.lock().expect("store lock poisoned").take().is_some())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<VectorSegment>> {
        let query_vector = self.embedder.embed_query(query).await?;
        let guard = self.rows.lock().expect("store lock poisoned");
        let rows = guard.as_ref().context("vector store not initialized")?;

        let mut scored: Vec<(f32, &Row)> = rows
            .iter()
            .map(|row| (cosine(&query_vector, &row.vector), row))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, row)| row.segment.clone())
            .collect())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
