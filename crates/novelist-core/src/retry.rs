//! Error classification and capped exponential backoff for outbound
//! model calls.
//!
//! Every LLM and embedding call in the crate goes through this policy.
//! Classification is message-based because provider adapters surface
//! heterogeneous error types; the only structural check is for response
//! parse errors, which are always worth retrying.

use std::time::Duration;

use crate::provider::TextGenerator;

/// Whether a failed call should be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Fatal,
}

/// Message fragments that mark an error as permanent. Auth, permission,
/// and bad-request failures never succeed on retry.
const FATAL_SIGNALS: &[&str] = &[
    "invalid api key",
    "incorrect api key",
    "unauthorized",
    "authentication",
    "permission",
    "forbidden",
    "not found",
    "bad request",
    "model not found",
    "404",
    "403",
    "401",
    "400",
];

/// Classifies errors and computes sleep durations between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    max_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max_sleep: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_sleep: Duration) -> Self {
        Self { base, max_sleep }
    }

    /// Classify an error as retryable or fatal.
    ///
    /// Response-body parse errors are always retryable regardless of
    /// message content. Otherwise a fatal signal in the message wins.
    /// Unknown errors default to retryable: transient failures from
    /// third-party endpoints routinely carry unrecognizable messages.
    pub fn classify(&self, error: &anyhow::Error) -> RetryClass {
        if error.downcast_ref::<serde_json::Error>().is_some() {
            return RetryClass::Retryable;
        }
        let message = error.to_string().to_lowercase();
        if FATAL_SIGNALS.iter().any(|s| message.contains(s)) {
            return RetryClass::Fatal;
        }
        RetryClass::Retryable
    }

    /// Capped exponential backoff. `attempt` is 1-indexed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max_sleep)
    }
}

/// Invoke the generator and clean the response, retrying per policy.
///
/// Markdown code fences are stripped from responses. An empty cleaned
/// response counts as a failed attempt and is retried with backoff; if
/// every attempt comes back empty the empty string is returned so the
/// caller can decide whether blank output is acceptable. Errors are
/// retried until the bound is reached or the policy classifies one as
/// fatal, at which point the error propagates.
pub async fn invoke_with_cleaning(
    generator: &dyn TextGenerator,
    policy: &RetryPolicy,
    prompt: &str,
    max_retries: u32,
) -> anyhow::Result<String> {
    tracing::debug!(prompt_len = prompt.len(), max_retries, "LLM call starting");

    let mut attempt = 0u32;
    while attempt < max_retries {
        match generator.invoke(prompt).await {
            Ok(raw) => {
                let cleaned = raw.replace("```", "").trim().to_string();
                if !cleaned.is_empty() {
                    return Ok(cleaned);
                }
                attempt += 1;
                if attempt < max_retries {
                    let sleep = policy.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries,
                        sleep_ms = sleep.as_millis() as u64,
                        "Empty LLM response, retrying"
                    );
                    tokio::time::sleep(sleep).await;
                }
            }
            Err(e) => {
                attempt += 1;
                tracing::warn!(attempt, max_retries, error = %e, "LLM invoke failed");
                if attempt >= max_retries || policy.classify(&e) == RetryClass::Fatal {
                    return Err(e);
                }
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }
    }

    Ok(String::new())
}
