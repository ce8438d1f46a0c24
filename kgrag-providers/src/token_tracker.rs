//! Process-wide token accounting, keyed by logical operation name
//! (EXTRACTION, SUMMARIZATION, QUERY, RERANK). `Arc`-shared with atomic
//! counters so it's cheap to clone and safe to update concurrently.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
}

#[derive(Debug, Default)]
struct Counters {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    requests: AtomicU64,
}

/// `init()` is called once at process startup; the tracker is then passed
/// by `Arc` to every component that calls an LLM/embedding capability.
/// Per design note: "the TokenTracker is process-wide; init at startup,
/// teardown on shutdown; all counters are atomic."
#[derive(Debug, Clone)]
pub struct TokenTracker {
    inner: Arc<DashMap<String, Counters>>,
}

impl TokenTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn record(&self, operation: &str, prompt_tokens: u32, completion_tokens: u32) {
        let entry = self.inner.entry(operation.to_string()).or_default();
        entry.prompt_tokens.fetch_add(u64::from(prompt_tokens), Ordering::Relaxed);
        entry
            .completion_tokens
            .fetch_add(u64::from(completion_tokens), Ordering::Relaxed);
        entry.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn usage(&self, operation: &str) -> TokenUsage {
        self.inner
            .get(operation)
            .map(|c| TokenUsage {
                prompt_tokens: c.prompt_tokens.load(Ordering::Relaxed),
                completion_tokens: c.completion_tokens.load(Ordering::Relaxed),
                requests: c.requests.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn total(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for entry in self.inner.iter() {
            total.prompt_tokens += entry.prompt_tokens.load(Ordering::Relaxed);
            total.completion_tokens += entry.completion_tokens.load(Ordering::Relaxed);
            total.requests += entry.requests.load(Ordering::Relaxed);
        }
        total
    }
}

impl Default for TokenTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_operation() {
        let tracker = TokenTracker::new();
        tracker.record("EXTRACTION", 100, 20);
        tracker.record("EXTRACTION", 50, 10);
        tracker.record("QUERY", 200, 40);

        let extraction = tracker.usage("EXTRACTION");
        assert_eq!(extraction.prompt_tokens, 150);
        assert_eq!(extraction.completion_tokens, 30);
        assert_eq!(extraction.requests, 2);

        let total = tracker.total();
        assert_eq!(total.prompt_tokens, 350);
    }

    #[test]
    fn unknown_operation_reports_zero() {
        let tracker = TokenTracker::new();
        let usage = tracker.usage("RERANK");
        assert_eq!(usage.requests, 0);
    }
}
