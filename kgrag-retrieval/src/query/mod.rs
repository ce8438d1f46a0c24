//! Query executors (C9): NAIVE, LOCAL, GLOBAL, HYBRID, MIX (§4.9).
//!
//! Five candidate-gathering strategies (embed query -> vector search ->
//! optional graph expansion) share one downstream tail: rerank, truncate
//! to `chunkTopK`, assemble a cited prompt, call the LLM, strip citations
//! when no chunk has a document id.

use crate::rerank::{Reranker, RerankCandidate, RerankedCandidate};
use kgrag_core::error::{KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::EmbeddingOwnerType;
use kgrag_observability::{EventContext, QueryCompletedFields};
use kgrag_providers::capability::{ChatMessage, ChatRole, EmbeddingCapability, LLMCapability, LLMOptions};
use kgrag_storage::StorageBackend;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Project-scoped key prefix under which the ingestion orchestrator
/// records which entities a chunk contributed (§4.10), since
/// `GraphStorage` has no native chunk -> entity index. LOCAL mode reads
/// this back to find a retrieved chunk's "linked entities".
pub const CHUNK_ENTITIES_KV_PREFIX: &str = "chunk_entities";

#[must_use]
pub fn chunk_entities_key(chunk_id: &str) -> String {
    format!("{CHUNK_ENTITIES_KV_PREFIX}:{chunk_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Naive,
    Local,
    Global,
    Hybrid,
    Mix,
}

impl QueryMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Naive => "NAIVE",
            Self::Local => "LOCAL",
            Self::Global => "GLOBAL",
            Self::Hybrid => "HYBRID",
            Self::Mix => "MIX",
        }
    }
}

/// One returned source (§4.9 response shape). `document_id`/`chunk_index`
/// are both `None` for the graph-synthesized pseudo-chunk and for
/// BFS-expanded entity descriptions (MIX).
#[derive(Debug, Clone)]
pub struct QuerySource {
    pub chunk_text: String,
    pub document_id: Option<String>,
    pub chunk_index: Option<usize>,
    pub source: String,
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<QuerySource>,
    pub mode: QueryMode,
    pub total_sources: usize,
}

#[derive(Debug, Clone)]
pub struct QueryEngineConfig {
    pub top_k: usize,
    pub chunk_top_k: usize,
    pub mix_bfs_max_depth: usize,
    pub mix_bfs_max_nodes: usize,
    pub whole_query_timeout_ms: u64,
}

impl Default for QueryEngineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            chunk_top_k: 5,
            mix_bfs_max_depth: 2,
            mix_bfs_max_nodes: 50,
            whole_query_timeout_ms: 120_000,
        }
    }
}

pub struct QueryEngine {
    storage: StorageBackend,
    llm: Arc<dyn LLMCapability>,
    embedder: Arc<dyn EmbeddingCapability>,
    reranker: Arc<dyn Reranker>,
    config: QueryEngineConfig,
}

fn parse_chunk_owner_id(owner_id: &str) -> Option<(String, usize)> {
    let (document_id, suffix) = owner_id.rsplit_once(":chunk-")?;
    let chunk_index = suffix.parse().ok()?;
    Some((document_id.to_string(), chunk_index))
}

impl QueryEngine {
    #[must_use]
    pub fn new(
        storage: StorageBackend,
        llm: Arc<dyn LLMCapability>,
        embedder: Arc<dyn EmbeddingCapability>,
        reranker: Arc<dyn Reranker>,
        config: QueryEngineConfig,
    ) -> Self {
        Self {
            storage,
            llm,
            embedder,
            reranker,
            config,
        }
    }

    #[instrument(skip(self, query_text), fields(%project_id, mode = mode.as_str()))]
    pub async fn query(&self, project_id: ProjectId, query_text: &str, mode: QueryMode) -> Result<QueryResult> {
        let deadline = Duration::from_millis(self.config.whole_query_timeout_ms);
        match tokio::time::timeout(deadline, self.execute(project_id, query_text, mode)).await {
            Ok(result) => result,
            Err(_) => Err(KgError::Timeout {
                elapsed_ms: self.config.whole_query_timeout_ms,
            }),
        }
    }

    async fn execute(&self, project_id: ProjectId, query_text: &str, mode: QueryMode) -> Result<QueryResult> {
        let started = Instant::now();
        let (vectors, _tokens_used) = self.embedder.embed(&[query_text.to_string()]).await?;
        let query_vector = vectors.into_iter().next().ok_or_else(|| KgError::Internal {
            message: "embedder returned no vector for query".to_string(),
        })?;

        let candidates = match mode {
            QueryMode::Naive => self.naive_candidates(project_id, &query_vector).await?,
            QueryMode::Local => self.local_candidates(project_id, &query_vector).await?,
            QueryMode::Global => self.global_candidates(project_id, query_text, &query_vector).await?,
            QueryMode::Hybrid => self.hybrid_candidates(project_id, query_text, &query_vector).await?,
            QueryMode::Mix => self.mix_candidates(project_id, query_text, &query_vector).await?,
        };

        let total_sources = candidates.len();
        let reranked = self
            .reranker
            .rerank(query_text, candidates, self.config.chunk_top_k)
            .await;

        let answer = self.synthesize_answer(query_text, &reranked).await?;
        let has_chunk_citation = reranked.iter().any(|r| r.candidate.document_id.is_some());
        let answer = if has_chunk_citation {
            answer
        } else {
            strip_citation_tokens(&answer)
        };

        let sources = reranked
            .into_iter()
            .map(|r| QuerySource {
                chunk_text: r.candidate.chunk_text,
                document_id: r.candidate.document_id,
                chunk_index: r.candidate.chunk_index,
                source: r.candidate.source,
                similarity: r.candidate.similarity,
            })
            .collect();

        kgrag_observability::query_completed(
            &EventContext::new("query.execute").with_project(project_id),
            QueryCompletedFields {
                mode: mode.as_str().to_string(),
                sources: total_sources,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );

        Ok(QueryResult {
            answer,
            sources,
            mode,
            total_sources,
        })
    }

    /// NAIVE (§4.9): embed query, vector search over chunk embeddings,
    /// resolve the matched chunks' content from `ChunkStorage`.
    async fn naive_candidates(&self, project_id: ProjectId, query_vector: &[f32]) -> Result<Vec<RerankCandidate>> {
        let matches = self
            .storage
            .vector
            .query(project_id, query_vector, self.config.top_k, Some(EmbeddingOwnerType::Chunk))
            .await?;

        let mut candidates = Vec::with_capacity(matches.len());
        let mut chunk_cache: std::collections::HashMap<String, Vec<kgrag_core::types::Chunk>> =
            std::collections::HashMap::new();

        for m in matches {
            let Some((document_id, chunk_index)) = parse_chunk_owner_id(&m.owner_id) else {
                continue;
            };
            if !chunk_cache.contains_key(&document_id) {
                let chunks = self.storage.chunks.get_chunks(&document_id).await?;
                chunk_cache.insert(document_id.clone(), chunks);
            }
            let Some(chunk) = chunk_cache[&document_id].iter().find(|c| c.chunk_index == chunk_index) else {
                continue;
            };
            candidates.push(RerankCandidate {
                chunk_text: chunk.content.clone(),
                document_id: Some(document_id.clone()),
                chunk_index: Some(chunk_index),
                source: "vector".to_string(),
                similarity: Some(m.similarity),
                dedup_key: m.owner_id,
            });
        }
        Ok(candidates)
    }

    /// LOCAL (§4.9): NAIVE plus, for each retrieved chunk, its linked
    /// entities' 1-hop neighbor descriptions.
    async fn local_candidates(&self, project_id: ProjectId, query_vector: &[f32]) -> Result<Vec<RerankCandidate>> {
        let naive = self.naive_candidates(project_id, query_vector).await?;
        let mut extra = Vec::new();

        for candidate in &naive {
            let Some(document_id) = &candidate.document_id else {
                continue;
            };
            let Some(chunk_index) = candidate.chunk_index else {
                continue;
            };
            let chunk_id = format!("{document_id}:chunk-{chunk_index}");
            let Some(linked) = self
                .storage
                .kv
                .get(project_id, &chunk_entities_key(&chunk_id))
                .await?
            else {
                continue;
            };
            let entity_names: Vec<String> = serde_json::from_value(linked).unwrap_or_default();

            for name in entity_names {
                for relation in self.storage.graph.get_relations_for_entity(project_id, &name).await? {
                    let neighbor_name = if kgrag_core::ids::normalize_entity_name(&relation.src_id)
                        == kgrag_core::ids::normalize_entity_name(&name)
                    {
                        &relation.tgt_id
                    } else {
                        &relation.src_id
                    };
                    if let Some(neighbor) = self.storage.graph.get_entity(project_id, neighbor_name).await? {
                        extra.push(RerankCandidate {
                            chunk_text: format!("{}: {}", neighbor.entity_name, neighbor.description),
                            document_id: None,
                            chunk_index: None,
                            source: "graph_local".to_string(),
                            similarity: None,
                            dedup_key: format!("entity:{}", neighbor.normalized_key()),
                        });
                    }
                }
            }
        }

        Ok(dedup_candidates(naive.into_iter().chain(extra).collect()))
    }

    /// GLOBAL (§4.9): entity-centric. Vector search over entity
    /// embeddings, fetch each top entity's 1-hop neighborhood, aggregate
    /// descriptions, and synthesize one "graph answer" pseudo-chunk.
    async fn global_candidates(
        &self,
        project_id: ProjectId,
        query_text: &str,
        query_vector: &[f32],
    ) -> Result<Vec<RerankCandidate>> {
        let (descriptions, _) = self.gather_entity_neighborhood(project_id, query_vector, 1).await?;
        if descriptions.is_empty() {
            return Ok(Vec::new());
        }

        let context = descriptions.join("\n");
        let prompt = format!(
            "Using only the following entity/relationship context, answer the question concisely.\nContext:\n{context}\n\nQuestion: {query_text}"
        );
        let output = self
            .llm
            .complete(
                "You are a knowledge-graph question answering assistant.",
                &prompt,
                &LLMOptions::default(),
            )
            .await?;

        debug!(entities = descriptions.len(), "global synthesized graph answer");

        Ok(vec![RerankCandidate {
            chunk_text: output.text,
            document_id: None,
            chunk_index: None,
            source: "graph_global".to_string(),
            similarity: None,
            dedup_key: "graph:global".to_string(),
        }])
    }

    /// HYBRID (§4.9): union of LOCAL and GLOBAL, deduplicated by
    /// `dedup_key`, keeping the max similarity across sources.
    async fn hybrid_candidates(
        &self,
        project_id: ProjectId,
        query_text: &str,
        query_vector: &[f32],
    ) -> Result<Vec<RerankCandidate>> {
        let local = self.local_candidates(project_id, query_vector).await?;
        let global = self.global_candidates(project_id, query_text, query_vector).await?;
        Ok(dedup_candidates(local.into_iter().chain(global).collect()))
    }

    /// MIX (§4.9): HYBRID plus BFS expansion up to `mix_bfs_max_depth`
    /// from the top GLOBAL entities, capped at `mix_bfs_max_nodes`.
    async fn mix_candidates(
        &self,
        project_id: ProjectId,
        query_text: &str,
        query_vector: &[f32],
    ) -> Result<Vec<RerankCandidate>> {
        let hybrid = self.hybrid_candidates(project_id, query_text, query_vector).await?;
        let (_, top_entity_names) = self.gather_entity_neighborhood(project_id, query_vector, 1).await?;

        let mut expanded = Vec::new();
        for name in top_entity_names {
            let steps = self
                .storage
                .graph
                .traverse_bfs(project_id, &name, self.config.mix_bfs_max_depth, self.config.mix_bfs_max_nodes)
                .await?;
            for step in steps.into_iter().filter(|s| s.depth > 0) {
                expanded.push(RerankCandidate {
                    chunk_text: format!("{}: {}", step.entity.entity_name, step.entity.description),
                    document_id: None,
                    chunk_index: None,
                    source: "graph_mix".to_string(),
                    similarity: None,
                    dedup_key: format!("entity:{}", step.entity.normalized_key()),
                });
            }
        }

        Ok(dedup_candidates(hybrid.into_iter().chain(expanded).collect()))
    }

    /// Shared GLOBAL/MIX step: vector search over entity embeddings, then
    /// one-hop neighborhood fetch per top entity. Returns the aggregated
    /// description strings plus the top entity names (for MIX's BFS seed).
    async fn gather_entity_neighborhood(
        &self,
        project_id: ProjectId,
        query_vector: &[f32],
        hop_depth: usize,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let matches = self
            .storage
            .vector
            .query(project_id, query_vector, self.config.top_k, Some(EmbeddingOwnerType::Entity))
            .await?;

        let mut descriptions = Vec::new();
        let mut top_entity_names = Vec::new();

        for m in matches {
            let Some(entity) = self.storage.graph.get_entity(project_id, &m.owner_id).await? else {
                continue;
            };
            descriptions.push(format!("{}: {}", entity.entity_name, entity.description));
            top_entity_names.push(entity.entity_name.clone());

            let steps = self
                .storage
                .graph
                .traverse_bfs(project_id, &entity.entity_name, hop_depth, 0)
                .await?;
            for step in steps.into_iter().filter(|s| s.depth > 0) {
                descriptions.push(format!(
                    "{} --[{}]--> {}",
                    entity.entity_name, step.via_relation, step.entity.entity_name
                ));
            }
        }

        Ok((descriptions, top_entity_names))
    }

    /// Final synthesis call shared by every mode: assemble a system
    /// prompt listing each reranked candidate with its citation tag
    /// (chunk-sourced candidates only), then ask the LLM for an answer.
    async fn synthesize_answer(&self, query_text: &str, reranked: &[RerankedCandidate]) -> Result<String> {
        if reranked.is_empty() {
            return Ok(String::new());
        }

        let mut context = String::new();
        for r in reranked {
            let citation = match (&r.candidate.document_id, r.candidate.chunk_index) {
                (Some(doc), Some(idx)) => format!("[{doc}:chunk-{idx}] "),
                _ => String::new(),
            };
            context.push_str(&citation);
            context.push_str(&r.candidate.chunk_text);
            context.push('\n');
        }

        let messages = vec![
            ChatMessage {
                role: ChatRole::System,
                content: format!(
                    "Answer the user's question using only the provided sources. Cite sources inline using their bracketed tags verbatim.\nSources:\n{context}"
                ),
            },
            ChatMessage {
                role: ChatRole::User,
                content: query_text.to_string(),
            },
        ];

        let output = self.llm.chat(&messages, &LLMOptions::default()).await?;
        Ok(output.text)
    }
}

/// Dedups by `dedup_key`, keeping the candidate with the greater
/// similarity when both appear (§4.9 "per-source relevance taken as max
/// across modes").
fn dedup_candidates(candidates: Vec<RerankCandidate>) -> Vec<RerankCandidate> {
    let mut by_key: std::collections::HashMap<String, RerankCandidate> = std::collections::HashMap::new();
    for candidate in candidates {
        by_key
            .entry(candidate.dedup_key.clone())
            .and_modify(|existing| {
                if candidate.similarity.unwrap_or(0.0) > existing.similarity.unwrap_or(0.0) {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
    by_key.into_values().collect()
}

/// Strips `[...]` citation tokens from an answer when no chunk in the
/// result set has a document id (§4.9: only the graph-synthesized
/// pseudo-chunk is present, so a citation would reference nothing).
fn strip_citation_tokens(answer: &str) -> String {
    static CITATION: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = CITATION.get_or_init(|| regex::Regex::new(r"\[[^\]]*\]").expect("valid citation regex"));
    re.replace_all(answer, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_id_into_document_and_index() {
        assert_eq!(
            parse_chunk_owner_id("doc-42:chunk-3"),
            Some(("doc-42".to_string(), 3))
        );
    }

    #[test]
    fn owner_id_without_chunk_suffix_is_none() {
        assert_eq!(parse_chunk_owner_id("entity-name"), None);
    }

    #[test]
    fn strip_citation_tokens_removes_brackets() {
        let stripped = strip_citation_tokens("This is true [doc-1:chunk-0] and also [doc-2:chunk-1].");
        assert_eq!(stripped, "This is true  and also .".trim_end());
    }

    #[test]
    fn dedup_keeps_higher_similarity() {
        let low = RerankCandidate {
            chunk_text: "a".to_string(),
            document_id: Some("d".to_string()),
            chunk_index: Some(0),
            source: "local".to_string(),
            similarity: Some(0.4),
            dedup_key: "d:0".to_string(),
        };
        let high = RerankCandidate {
            similarity: Some(0.9),
            ..low.clone()
        };
        let result = dedup_candidates(vec![low, high]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].similarity, Some(0.9));
    }
}
