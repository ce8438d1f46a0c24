//! Reranker (C8): `rerank(query, chunks, topK)` with a provider enum,
//! circuit breaking, and a deterministic fallback order (§4.8).
//!
//! The scorer is an external provider call, so it's wrapped in
//! `kgrag_resilience::with_retry` plus a `CircuitBreaker` — a flaky
//! rerank provider degrades to the fallback order rather than failing
//! the whole query.

use async_trait::async_trait;
use kgrag_core::error::Result;
use kgrag_providers::capability::LLMCapability;
use kgrag_resilience::{CircuitBreaker, CircuitBreakerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A chunk of retrievable text plus the fields the reranker and the
/// query assembler both need; shared shape across every query mode.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk_text: String,
    pub document_id: Option<String>,
    pub chunk_index: Option<usize>,
    pub source: String,
    /// Pre-rerank similarity, if any (vector search score, graph-answer
    /// slot has none).
    pub similarity: Option<f32>,
    /// "chunk id or synthesized-answer slot" (§4.9): the key HYBRID/MIX
    /// dedup on when unioning candidate sets from more than one mode.
    pub dedup_key: String,
}

#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    pub candidate: RerankCandidate,
    pub score: f32,
}

/// `rerank(query, chunks, topK)` (§4.8). Implementations filter by
/// `min_score` and MUST preserve the fallback-order guarantee documented
/// on [`FallbackReranker`] when they cannot score candidates.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate>,
        top_k: usize,
    ) -> Vec<RerankedCandidate>;
}

/// Synthetic decreasing scores `1.0, 0.95, 0.9, ...` floored at 0.1,
/// preserving input order — the exact fallback shape §4.8 specifies for
/// a timeout, an open circuit, or a missing provider credential.
#[must_use]
pub fn fallback_order(candidates: Vec<RerankCandidate>) -> Vec<RerankedCandidate> {
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| RerankedCandidate {
            candidate,
            score: (1.0 - 0.05 * i as f32).max(0.1),
        })
        .collect()
}

fn apply_min_score_and_top_k(
    mut ranked: Vec<RerankedCandidate>,
    min_score: f32,
    top_k: usize,
) -> Vec<RerankedCandidate> {
    ranked.retain(|r| r.score >= min_score);
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}

/// `provider = none`: identity reranker. Keeps input order and assigns
/// the same synthetic decreasing scores the fallback path uses, so
/// downstream code cannot distinguish "disabled" from "fell back".
pub struct NoneReranker {
    pub min_score: f32,
}

#[async_trait]
impl Reranker for NoneReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: Vec<RerankCandidate>,
        top_k: usize,
    ) -> Vec<RerankedCandidate> {
        apply_min_score_and_top_k(fallback_order(candidates), self.min_score, top_k)
    }
}

/// `provider ∈ {external_a, external_b}`: an LLM-backed relevance scorer,
/// circuit-broken and timeout-bounded. On any failure path — timeout,
/// open circuit, missing credentials (no `llm` configured) — falls back
/// to [`fallback_order`] rather than propagating an error, since
/// reranking is always an optimization, never a correctness requirement
/// (§4.8, §7).
pub struct ExternalReranker {
    llm: Option<Arc<dyn LLMCapability>>,
    breaker: CircuitBreaker,
    timeout: Duration,
    min_score: f32,
    name: String,
}

impl ExternalReranker {
    #[must_use]
    pub fn new(name: impl Into<String>, llm: Option<Arc<dyn LLMCapability>>, timeout_ms: u64, min_score: f32) -> Self {
        let name = name.into();
        Self {
            llm,
            breaker: CircuitBreaker::new(name.clone(), CircuitBreakerConfig::default()),
            timeout: Duration::from_millis(timeout_ms),
            min_score,
            name,
        }
    }

    /// Asks the LLM to score each candidate 0.0-1.0 against `query`,
    /// parsing a line-per-candidate `index: score` response. Any parse
    /// failure scores that candidate via the fallback's position-based
    /// synthetic score instead of failing the whole rerank.
    async fn score_with_llm(
        &self,
        llm: &Arc<dyn LLMCapability>,
        query: &str,
        candidates: &[RerankCandidate],
    ) -> Result<Vec<f32>> {
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{i}: {}", c.chunk_text.chars().take(500).collect::<String>()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Score each passage's relevance to the query on a 0.0-1.0 scale.\nQuery: {query}\nPassages:\n{listing}\n\nRespond with one line per passage: `<index>: <score>`."
        );
        let output = llm
            .complete(
                "You are a precise relevance-scoring assistant.",
                &prompt,
                &kgrag_providers::capability::LLMOptions::default(),
            )
            .await?;

        let mut scores = vec![None; candidates.len()];
        for line in output.text.lines() {
            let Some((idx_raw, score_raw)) = line.split_once(':') else {
                continue;
            };
            let Ok(idx) = idx_raw.trim().parse::<usize>() else {
                continue;
            };
            let Ok(score) = score_raw.trim().parse::<f32>() else {
                continue;
            };
            if idx < scores.len() {
                scores[idx] = Some(score.clamp(0.0, 1.0));
            }
        }
        Ok(scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.unwrap_or_else(|| (1.0 - 0.05 * i as f32).max(0.1)))
            .collect())
    }
}

#[async_trait]
impl Reranker for ExternalReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate>,
        top_k: usize,
    ) -> Vec<RerankedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let Some(llm) = self.llm.as_ref() else {
            warn!(reranker = %self.name, "missing provider credentials, falling back to original order");
            return apply_min_score_and_top_k(fallback_order(candidates), self.min_score, top_k);
        };

        if !self.breaker.can_execute() {
            debug!(reranker = %self.name, "circuit open, falling back to original order");
            return apply_min_score_and_top_k(fallback_order(candidates), self.min_score, top_k);
        }

        let scoring = self.score_with_llm(llm, query, &candidates);
        match tokio::time::timeout(self.timeout, scoring).await {
            Ok(Ok(scores)) => {
                self.breaker.record_success();
                let ranked = candidates
                    .into_iter()
                    .zip(scores)
                    .map(|(candidate, score)| RerankedCandidate { candidate, score })
                    .collect();
                apply_min_score_and_top_k(ranked, self.min_score, top_k)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                warn!(reranker = %self.name, error = %e, "rerank call failed, falling back to original order");
                apply_min_score_and_top_k(fallback_order(candidates), self.min_score, top_k)
            }
            Err(_) => {
                self.breaker.record_failure();
                warn!(reranker = %self.name, timeout_ms = self.timeout.as_millis() as u64, "rerank timed out, falling back to original order");
                apply_min_score_and_top_k(fallback_order(candidates), self.min_score, top_k)
            }
        }
    }
}

/// Constructs the configured reranker. A missing `llm` with a non-`none`
/// provider is not a startup error (§4.8 treats it as "missing
/// credentials", a runtime fallback condition, not a configuration
/// error) — `ExternalReranker::new` simply accepts `None`.
#[must_use]
pub fn build_reranker(
    provider: kgrag_config::RerankerProvider,
    llm: Option<Arc<dyn LLMCapability>>,
    timeout_ms: u64,
    min_score: f32,
) -> Arc<dyn Reranker> {
    match provider {
        kgrag_config::RerankerProvider::None => Arc::new(NoneReranker { min_score }),
        kgrag_config::RerankerProvider::ExternalA => {
            Arc::new(ExternalReranker::new("external_a", llm, timeout_ms, min_score))
        }
        kgrag_config::RerankerProvider::ExternalB => {
            Arc::new(ExternalReranker::new("external_b", llm, timeout_ms, min_score))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str) -> RerankCandidate {
        RerankCandidate {
            chunk_text: text.to_string(),
            document_id: Some("doc-1".to_string()),
            chunk_index: Some(0),
            source: "vector".to_string(),
            similarity: Some(0.9),
            dedup_key: format!("doc-1:{text}"),
        }
    }

    #[test]
    fn fallback_scores_decrease_and_floor_at_point_one() {
        let candidates = (0..25).map(|i| candidate(&format!("chunk {i}"))).collect();
        let ranked = fallback_order(candidates);
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(ranked[1].score, 0.95);
        assert_eq!(ranked.last().unwrap().score, 0.1);
    }

    #[tokio::test]
    async fn none_reranker_preserves_order() {
        let reranker = NoneReranker { min_score: 0.1 };
        let candidates = vec![candidate("a"), candidate("b"), candidate("c")];
        let ranked = reranker.rerank("query", candidates, 5).await;
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].candidate.chunk_text, "a");
        assert_eq!(ranked[1].candidate.chunk_text, "b");
    }

    #[tokio::test]
    async fn external_reranker_without_credentials_falls_back() {
        let reranker = ExternalReranker::new("external_a", None, 2000, 0.1);
        let candidates = vec![candidate("a"), candidate("b")];
        let ranked = reranker.rerank("query", candidates, 5).await;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, 1.0);
    }

    #[tokio::test]
    async fn min_score_filters_low_scoring_candidates() {
        let reranker = NoneReranker { min_score: 0.92 };
        let candidates = (0..5).map(|i| candidate(&format!("c{i}"))).collect();
        let ranked = reranker.rerank("q", candidates, 10).await;
        // only the first two fallback scores (1.0, 0.95) clear 0.92.
        assert_eq!(ranked.len(), 2);
    }
}
