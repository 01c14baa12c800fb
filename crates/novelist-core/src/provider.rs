//! Adapter seams for LLM and embedding backends.
//!
//! Concrete wire adapters (OpenAI-compatible endpoints, local inference,
//! etc.) live outside this crate; the core only depends on these two
//! contracts. Both may fail with transient or fatal errors, classified
//! by [`crate::retry::RetryPolicy`].

use anyhow::Result;
use async_trait::async_trait;

use crate::retry::{RetryClass, RetryPolicy};

/// Text generation backend: one prompt in, one completion out.
///
/// No streaming; the finalization steps only consume whole responses.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String>;
}

/// Embedding backend for vector index writes and similarity queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of documents, one vector per input text.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Decorator adding retry-with-backoff to any embedding provider.
///
/// Composes instead of wrapping dynamically: the index layer holds a
/// `RetryingEmbedder` wherever the bare provider would otherwise go.
pub struct RetryingEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
    max_retries: u32,
}

impl<E> RetryingEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy, max_retries: u32) -> Self {
        Self {
            inner,
            policy,
            max_retries: max_retries.max(1),
        }
    }
}

impl<E> RetryingEmbedder<E> {
    async fn run_with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Embedding call failed");
                    if attempt >= self.max_retries
                        || self.policy.classify(&e) == RetryClass::Fatal
                    {
                        return Err(e);
                    }
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                }
            }
        }
    }
}

#[async_trait]
impl<E: EmbeddingProvider> EmbeddingProvider for RetryingEmbedder<E> {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.run_with_retry(|| self.inner.embed_query(text)).await
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.run_with_retry(|| self.inner.embed_documents(texts))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyEmbedder {
        calls: AtomicU32,
        fail_first: u32,
        error: &'static str,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("{}", self.error);
            }
            Ok(vec![0.5, 0.5])
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("{}", self.error);
            }
            Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn transient_embedding_failure_is_retried() {
        let embedder = RetryingEmbedder::new(
            FlakyEmbedder {
                calls: AtomicU32::new(0),
                fail_first: 1,
                error: "503 gateway",
            },
            fast_policy(),
            3,
        );
        let vector = embedder.embed_query("hello").await.unwrap();
        assert_eq!(vector.len(), 2);
    }

    #[tokio::test]
    async fn fatal_embedding_failure_is_not_retried() {
        let inner = FlakyEmbedder {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error: "invalid api key",
        };
        let embedder = RetryingEmbedder::new(inner, fast_policy(), 5);
        let err = embedder
            .embed_documents(&["a".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid api key"));
        assert_eq!(embedder.inner.calls.load(Ordering::SeqCst), 1);
    }
}
