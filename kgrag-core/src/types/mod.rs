//! Domain types from the data model: documents, chunks, embeddings,
//! entities, relations, cache entries, and document status.

use crate::ids::ProjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Source document type. `CODE` participates in structural chunking;
/// everything else is extracted to plain text upstream of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Text,
    Code,
    Pdf,
    Docx,
    Html,
    Web,
}

/// Lifecycle status of a document's ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    NotProcessed,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub project_id: ProjectId,
    pub doc_type: DocumentType,
    pub file_name: String,
    pub raw_content: String,
    pub status: ProcessingStatus,
    pub metadata: HashMap<String, Value>,
}

/// Enclosing scope kind for code-aware chunking metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeType {
    File,
    Class,
    Function,
    Import,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeMetadata {
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub containing_scope: Option<String>,
    pub scope_type: ScopeType,
}

/// `(documentId, chunkIndex)` is unique; chunks are an ordered sequence
/// per document starting at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub project_id: ProjectId,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    pub code_metadata: Option<CodeMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmbeddingOwnerType {
    Chunk,
    Entity,
    Relation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub owner_type: EmbeddingOwnerType,
    pub owner_id: String,
    pub project_id: ProjectId,
    pub vector: Vec<f32>,
    pub model: String,
}

/// Upper bound on `sourceChunkIds` retained per entity/relation; FIFO
/// eviction applies once the cap is reached (§4.7 step 7).
pub const MAX_SOURCE_CHUNK_IDS: usize = 200;

/// Upper bound (in bytes) on a merged entity/relation description.
pub const MAX_DESCRIPTION_LEN: usize = 2000;

/// Merges two descriptions on upsert conflict: `" | "`-joined, skipping the
/// incoming half if it's already a substring of the existing description,
/// then truncated to [`MAX_DESCRIPTION_LEN`] on a char boundary. Shared by
/// the distributed and embedded storage backends so both apply the same
/// upsert-conflict rule.
#[must_use]
pub fn merge_entity_descriptions(existing: &str, incoming: &str) -> String {
    if existing.is_empty() {
        return truncate_description(incoming);
    }
    if incoming.is_empty() || existing.contains(incoming) {
        return truncate_description(existing);
    }
    truncate_description(&format!("{existing} | {incoming}"))
}

fn truncate_description(s: &str) -> String {
    if s.len() <= MAX_DESCRIPTION_LEN {
        return s.to_string();
    }
    let mut end = MAX_DESCRIPTION_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Pushes `chunk_id` onto `ids` if absent, evicting the oldest entry when
/// the cap is reached. Shared by graph-storage upsert merge and the
/// entity-merge service so both paths agree on eviction order.
pub fn push_source_chunk_id(ids: &mut Vec<String>, chunk_id: String) {
    if ids.contains(&chunk_id) {
        return;
    }
    if ids.len() >= MAX_SOURCE_CHUNK_IDS {
        ids.remove(0);
    }
    ids.push(chunk_id);
}

/// Key = `(projectId, normalize(entityName))`. `entity_name` is the raw,
/// display-facing name; callers normalize separately when computing the
/// storage key so the original casing survives in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub project_id: ProjectId,
    pub entity_name: String,
    pub entity_type: String,
    pub description: String,
    pub source_chunk_ids: Vec<String>,
}

impl Entity {
    #[must_use]
    pub fn new(project_id: ProjectId, entity_name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            project_id,
            entity_name: entity_name.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            source_chunk_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn normalized_key(&self) -> String {
        crate::ids::normalize_entity_name(&self.entity_name)
    }
}

/// Key = `(projectId, normalize(srcId), normalize(tgtId))`. `src_id ==
/// tgt_id` under normalized comparison is forbidden (self-loops).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub project_id: ProjectId,
    pub src_id: String,
    pub tgt_id: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub weight: f32,
    pub source_chunk_ids: Vec<String>,
}

impl Relation {
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        crate::ids::normalize_entity_name(&self.src_id)
            == crate::ids::normalize_entity_name(&self.tgt_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionCacheType {
    EntityExtraction,
    Gleaning,
    Summarization,
    KeywordExtraction,
}

/// Unique by `(projectId, cacheType, contentHash)`. `content_hash` is the
/// hex-encoded SHA-256 fingerprint computed in `kgrag-graph::extraction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionCacheEntry {
    pub project_id: ProjectId,
    pub cache_type: ExtractionCacheType,
    pub content_hash: String,
    pub result: Value,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DocStatusCounts {
    pub chunks: u32,
    pub entities: u32,
    pub relations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocStatus {
    pub document_id: String,
    pub processing_status: ProcessingStatus,
    pub counts: DocStatusCounts,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Transient; never persisted. Carried through the resilience layer's
/// retry loop and emitted as `retry.attempt`/`retry.exhausted` events.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub operation: String,
    pub attempt: u32,
    pub delay_ms: u64,
    pub error: String,
}

/// The concrete record behind "a project owns exactly one graph
/// namespace": the embedded backend keys its relational tables by
/// `project_id`, the distributed backend derives its per-project schema
/// name from it via [`ProjectId::graph_namespace`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectGraphNamespace {
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
}

/// Return value of the ingestion orchestrator (§4.10), distinct from the
/// persisted [`DocStatus`] record: the orchestrator can still return a
/// receipt describing what happened even when the `DocStatusStorage`
/// write itself fails transiently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReceipt {
    pub document_id: String,
    pub status: ProcessingStatus,
    pub chunks: u32,
    pub entities: u32,
    pub relations: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Transient output of the entity resolver, consumed by the merge service.
#[derive(Debug, Clone)]
pub struct MergeCluster {
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub members: Vec<Entity>,
    pub merged_description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_descriptions_skips_substring() {
        let merged = merge_entity_descriptions("A large state institution.", "A large state institution.");
        assert_eq!(merged, "A large state institution.");
    }

    #[test]
    fn merge_descriptions_joins_distinct() {
        let merged = merge_entity_descriptions("Founded in 1891.", "Renamed in 1945.");
        assert_eq!(merged, "Founded in 1891. | Renamed in 1945.");
    }

    #[test]
    fn merge_descriptions_truncates() {
        let long = "x".repeat(MAX_DESCRIPTION_LEN + 50);
        let merged = merge_entity_descriptions("", &long);
        assert_eq!(merged.len(), MAX_DESCRIPTION_LEN);
    }

    #[test]
    fn push_source_chunk_id_evicts_oldest() {
        let mut ids: Vec<String> = (0..MAX_SOURCE_CHUNK_IDS).map(|i| i.to_string()).collect();
        push_source_chunk_id(&mut ids, "new".to_string());
        assert_eq!(ids.len(), MAX_SOURCE_CHUNK_IDS);
        assert_eq!(ids.first().unwrap(), "1");
        assert_eq!(ids.last().unwrap(), "new");
    }
}
