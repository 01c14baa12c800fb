//! Runtime configuration for the generation core.
//!
//! All tunables live in one struct that callers pass in at construction
//! time; there are no ambient or global defaults.

use crate::retry::RetryPolicy;

/// Tunables shared by the finalization pipeline and vector sync.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Retries per LLM sub-step invocation inside finalization.
    pub llm_max_retries: u32,
    /// Upper bound for the generic invoke-and-clean helper.
    pub invoke_max_retries: u32,
    /// Bounded pool size for finalization sub-steps (minimum 1).
    pub parallel_workers: usize,
    /// Maximum characters per vector index segment.
    pub max_chunk_chars: usize,
    /// Top-k for similarity retrieval.
    pub retrieval_k: usize,
    /// Backoff/classification policy for outbound calls.
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            llm_max_retries: 3,
            invoke_max_retries: 7,
            parallel_workers: 3,
            max_chunk_chars: 500,
            retrieval_k: 2,
            retry: RetryPolicy::default(),
        }
    }
}
