//! Storage capability traits: `GraphStorage`, `VectorStorage`, `KvStorage`,
//! `DocStatusStorage`, `ExtractionCacheStorage`.
//!
//! Each trait is `async_trait`, `Result<T>`-returning, and batches
//! multi-key operations at the backend's configured chunk size. Every
//! operation is scoped to a single project's namespace, with the
//! project-scoped lifecycle and traversal operations §4.2 requires.

use crate::error::Result;
use crate::ids::ProjectId;
use crate::types::{
    Chunk, DocStatus, Embedding, EmbeddingOwnerType, Entity, ExtractionCacheEntry,
    ExtractionCacheType,
};
use async_trait::async_trait;
use serde_json::Value;
#[cfg(feature = "test-util")]
use mockall::automock;

/// A vector similarity result: owner id and cosine similarity, descending,
/// ties broken by owner id (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub owner_id: String,
    pub similarity: f32,
}

/// One step of a BFS traversal: the entity reached, its depth from the
/// start node, and the relation name that reached it.
#[derive(Debug, Clone)]
pub struct TraversalStep {
    pub entity: Entity,
    pub depth: usize,
    pub via_relation: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphStats {
    pub entity_count: u64,
    pub relation_count: u64,
}

/// Property-graph operations scoped to a single project's namespace.
///
/// All batched lookups (`get_entities`, `get_node_degrees_batch`) chunk
/// their input at the backend's configured batch size; missing keys produce
/// absence in the result, never an error.
#[cfg_attr(feature = "test-util", automock)]
#[async_trait]
pub trait GraphStorage: Send + Sync {
    async fn create_project_graph(&self, project_id: ProjectId) -> Result<()>;
    async fn delete_project_graph(&self, project_id: ProjectId) -> Result<()>;
    async fn graph_exists(&self, project_id: ProjectId) -> Result<bool>;

    /// Idempotent on normalized `entity_name`. On conflict: descriptions
    /// merge with separator `" | "` (de-duplicated, length-capped), and
    /// `source_chunk_ids` union (FIFO-capped).
    async fn upsert_entity(&self, entity: Entity) -> Result<()>;
    async fn upsert_entities(&self, entities: Vec<Entity>) -> Result<()>;

    /// Idempotent on `(src, tgt)` under normalized comparison. Rejects
    /// self-loops with [`crate::error::ErrorKind::MergeValidation`]. On
    /// conflict: weights sum, keywords union, descriptions merge.
    async fn upsert_relation(&self, relation: crate::types::Relation) -> Result<()>;
    async fn upsert_relations(&self, relations: Vec<crate::types::Relation>) -> Result<()>;

    async fn get_entity(&self, project_id: ProjectId, name: &str) -> Result<Option<Entity>>;
    async fn get_entities(&self, project_id: ProjectId, names: &[String]) -> Result<Vec<Entity>>;

    /// Removes the single entity by normalized name (and any relations
    /// touching it). Used by entity merge (§4.7 step 8) to delete a
    /// redirected-away source entity; distinct from [`Self::delete_by_source_id`],
    /// which removes by chunk provenance instead of by entity identity.
    async fn delete_entity(&self, project_id: ProjectId, name: &str) -> Result<()>;

    /// Degree (0 if missing), batched per the configured chunk size.
    async fn get_node_degrees_batch(
        &self,
        project_id: ProjectId,
        names: &[String],
    ) -> Result<Vec<(String, u32)>>;

    async fn get_relations_for_entity(
        &self,
        project_id: ProjectId,
        name: &str,
    ) -> Result<Vec<crate::types::Relation>>;

    /// Level-by-level BFS from `start_name`. Neighbor order within a level
    /// is deterministic (ascending by neighbor name). `max_nodes == 0`
    /// means unlimited; otherwise traversal stops once that many nodes
    /// (including the start node) have been visited.
    async fn traverse_bfs(
        &self,
        project_id: ProjectId,
        start_name: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<Vec<TraversalStep>>;

    /// BFS shortest path; ties broken by lexicographic neighbor order.
    async fn find_shortest_path(
        &self,
        project_id: ProjectId,
        src: &str,
        tgt: &str,
    ) -> Result<Option<Vec<String>>>;

    /// Removes every entity/relation whose `source_chunk_ids` contains
    /// `source_id`.
    async fn delete_by_source_id(&self, project_id: ProjectId, source_id: &str) -> Result<u64>;

    async fn get_stats(&self, project_id: ProjectId) -> Result<GraphStats>;
}

/// Vector similarity operations scoped to a single project's namespace.
#[cfg_attr(feature = "test-util", automock)]
#[async_trait]
pub trait VectorStorage: Send + Sync {
    async fn upsert(&self, embedding: Embedding) -> Result<()>;
    async fn upsert_batch(&self, embeddings: Vec<Embedding>) -> Result<()>;

    /// Cosine similarity search, descending, ties by owner id. The backend
    /// may use an approximate index (recall >= 0.95 required over uniform
    /// random queries); callers must not assume exact nearest-neighbor.
    async fn query(
        &self,
        project_id: ProjectId,
        query_vector: &[f32],
        top_k: usize,
        owner_type: Option<EmbeddingOwnerType>,
    ) -> Result<Vec<VectorMatch>>;

    async fn delete(&self, project_id: ProjectId, owner_id: &str) -> Result<()>;
    async fn delete_batch(&self, project_id: ProjectId, owner_ids: &[String]) -> Result<()>;
    async fn delete_by_project(&self, project_id: ProjectId) -> Result<u64>;
    async fn delete_entity_embeddings(&self, project_id: ProjectId, names: &[String]) -> Result<()>;

    async fn has_vectors(&self, project_id: ProjectId, document_id: &str) -> Result<bool>;
}

/// General-purpose project-scoped key/value storage, used by components
/// that need small auxiliary state without a dedicated contract (e.g.
/// configuration overrides, resumable-cursor bookkeeping).
#[cfg_attr(feature = "test-util", automock)]
#[async_trait]
pub trait KvStorage: Send + Sync {
    async fn get(&self, project_id: ProjectId, key: &str) -> Result<Option<Value>>;
    async fn put(&self, project_id: ProjectId, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, project_id: ProjectId, key: &str) -> Result<()>;
}

#[cfg_attr(feature = "test-util", automock)]
#[async_trait]
pub trait DocStatusStorage: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Option<DocStatus>>;
    async fn put(&self, status: DocStatus) -> Result<()>;
    async fn delete(&self, document_id: &str) -> Result<()>;
}

#[cfg_attr(feature = "test-util", automock)]
#[async_trait]
pub trait ExtractionCacheStorage: Send + Sync {
    async fn get(
        &self,
        project_id: ProjectId,
        cache_type: ExtractionCacheType,
        content_hash: &str,
    ) -> Result<Option<ExtractionCacheEntry>>;

    async fn put(&self, entry: ExtractionCacheEntry) -> Result<()>;

    async fn delete_by_project(&self, project_id: ProjectId) -> Result<u64>;
}

/// Chunk and chunk-embedding persistence, the portion of C2 the ingestion
/// orchestrator writes through directly rather than via `GraphStorage`.
#[cfg_attr(feature = "test-util", automock)]
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    async fn put_chunks(&self, chunks: Vec<Chunk>) -> Result<()>;
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;
    async fn delete_by_document(&self, document_id: &str) -> Result<u64>;
}
