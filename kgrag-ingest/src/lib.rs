//! Ingestion orchestrator (C10): chunk -> embed -> extract -> resolve ->
//! merge -> persist (§4.10).
//!
//! One struct assembles the pipeline's collaborators (chunker, embedder,
//! extractor, resolver, merge service, storage) and runs each document
//! through the stages in order, with per-stage error context so a
//! failure mid-pipeline reports which stage produced it.

use futures::stream::{FuturesUnordered, StreamExt};
use kgrag_chunker::code::CodeChunker;
use kgrag_chunker::prose::SlidingWindowChunker;
use kgrag_chunker::{ChunkingConfig, ChunkingStrategy};
use kgrag_core::error::{KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::types::{
    push_source_chunk_id, Chunk, DocStatus, DocStatusCounts, DocumentType, Embedding,
    EmbeddingOwnerType, IngestionReceipt, ProcessingStatus, Relation,
};
use kgrag_graph::extraction::{ExtractedEntity, ExtractedRelation, Extractor};
use kgrag_graph::resolution::EntityResolver;
use kgrag_observability::{EventContext, IngestCompletedFields};
use kgrag_providers::capability::EmbeddingCapability;
use kgrag_storage::StorageBackend;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Key the orchestrator writes under in project-scoped KV storage so
/// `kgrag-retrieval`'s LOCAL mode can find a chunk's linked entities
/// without a dedicated chunk -> entity index in `GraphStorage`.
fn chunk_entities_kv_key(chunk_id: &str) -> String {
    format!("chunk_entities:{chunk_id}")
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub chunk: ChunkingConfig,
    pub embedding_batch_size: usize,
    pub extraction_batch_size: usize,
    pub min_success_ratio: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkingConfig::default(),
            embedding_batch_size: 32,
            extraction_batch_size: 20,
            min_success_ratio: 0.5,
        }
    }
}

pub struct IngestionOrchestrator {
    storage: StorageBackend,
    embedder: Arc<dyn EmbeddingCapability>,
    extractor: Arc<dyn Extractor>,
    resolver: Arc<EntityResolver>,
    config: IngestionConfig,
}

impl IngestionOrchestrator {
    #[must_use]
    pub fn new(
        storage: StorageBackend,
        embedder: Arc<dyn EmbeddingCapability>,
        extractor: Arc<dyn Extractor>,
        resolver: Arc<EntityResolver>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            extractor,
            resolver,
            config,
        }
    }

    /// `(projectId, documentId, content, type)` -> ingestion receipt
    /// (§4.10). Idempotent: step 1's `hasVectors` precondition means a
    /// second call on an already-ingested document is a cheap no-op that
    /// returns the prior outcome rather than double-extracting.
    #[instrument(skip(self, content), fields(%project_id, %document_id))]
    pub async fn ingest(
        &self,
        project_id: ProjectId,
        document_id: &str,
        content: &str,
        doc_type: DocumentType,
        file_name: &str,
    ) -> Result<IngestionReceipt> {
        if self.storage.vector.has_vectors(project_id, document_id).await? {
            info!("document already has vectors, returning existing status");
            return Ok(self.receipt_from_existing_status(document_id).await);
        }

        let started_at = chrono::Utc::now();
        self.storage
            .doc_status
            .put(DocStatus {
                document_id: document_id.to_string(),
                processing_status: ProcessingStatus::Processing,
                counts: DocStatusCounts::default(),
                error_message: None,
                started_at,
                completed_at: None,
            })
            .await?;

        match self
            .run_pipeline(project_id, document_id, content, doc_type, file_name, started_at)
            .await
        {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                warn!(error = %e, "ingestion failed, marking document FAILED");
                let completed_at = chrono::Utc::now();
                self.storage
                    .doc_status
                    .put(DocStatus {
                        document_id: document_id.to_string(),
                        processing_status: ProcessingStatus::Failed,
                        counts: DocStatusCounts::default(),
                        error_message: Some(e.to_string()),
                        started_at,
                        completed_at: Some(completed_at),
                    })
                    .await
                    .ok();
                Ok(IngestionReceipt {
                    document_id: document_id.to_string(),
                    status: ProcessingStatus::Failed,
                    chunks: 0,
                    entities: 0,
                    relations: 0,
                    started_at,
                    completed_at: Some(completed_at),
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn receipt_from_existing_status(&self, document_id: &str) -> IngestionReceipt {
        match self.storage.doc_status.get(document_id).await {
            Ok(Some(status)) => IngestionReceipt {
                document_id: document_id.to_string(),
                status: status.processing_status,
                chunks: status.counts.chunks,
                entities: status.counts.entities,
                relations: status.counts.relations,
                started_at: status.started_at,
                completed_at: status.completed_at,
                error: status.error_message,
            },
            _ => IngestionReceipt {
                document_id: document_id.to_string(),
                status: ProcessingStatus::Processed,
                chunks: 0,
                entities: 0,
                relations: 0,
                started_at: chrono::Utc::now(),
                completed_at: Some(chrono::Utc::now()),
                error: None,
            },
        }
    }

    async fn run_pipeline(
        &self,
        project_id: ProjectId,
        document_id: &str,
        content: &str,
        doc_type: DocumentType,
        file_name: &str,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<IngestionReceipt> {
        // Step 3: chunk.
        let raw_chunks = self.chunk_document(content, doc_type, file_name).await?;
        let chunks: Vec<Chunk> = raw_chunks
            .into_iter()
            .enumerate()
            .map(|(index, raw)| Chunk {
                id: format!("{document_id}:chunk-{index}"),
                document_id: document_id.to_string(),
                project_id,
                chunk_index: index,
                content: raw.content,
                token_count: raw.token_count,
                code_metadata: raw.code_metadata,
            })
            .collect();

        // Step 4: embed chunks in batches; persist chunks and chunk embeddings.
        self.storage.chunks.put_chunks(chunks.clone()).await?;
        self.embed_and_persist(project_id, &chunks, |c| c.id.clone(), |c| c.content.clone())
            .await?;

        // Step 5: extract entities/relations per chunk, bounded concurrency.
        let language = chunks.iter().find_map(|c| c.code_metadata.as_ref().map(|m| m.language.clone()));
        let (raw_entities, raw_relations, entity_chunk_ids, successful, attempted) =
            self.extract_all(project_id, &chunks, language.as_deref()).await?;

        if attempted > 0 && (successful as f64 / attempted as f64) < self.config.min_success_ratio {
            return Err(KgError::Internal {
                message: format!(
                    "extraction success ratio {successful}/{attempted} below minimum {}",
                    self.config.min_success_ratio
                ),
            });
        }

        // Step 6: resolve and merge clusters before persistence.
        let (clusters, raw_to_canonical, _report) = self.resolver.resolve(&raw_entities);

        let mut canonical_entities = Vec::with_capacity(clusters.len());
        let mut canonical_chunk_links: HashMap<String, Vec<String>> = HashMap::new();
        for cluster in &clusters {
            let mut entity = cluster.members.first().cloned().unwrap_or_else(|| {
                kgrag_core::types::Entity::new(project_id, cluster.canonical_name.clone(), "UNKNOWN")
            });
            entity.project_id = project_id;
            entity.entity_name = cluster.canonical_name.clone();
            entity.description = cluster.merged_description.clone();
            entity.source_chunk_ids.clear();
            for alias in std::iter::once(&cluster.canonical_name).chain(cluster.aliases.iter()) {
                if let Some(chunk_ids) = entity_chunk_ids.get(alias) {
                    for id in chunk_ids {
                        push_source_chunk_id(&mut entity.source_chunk_ids, id.clone());
                    }
                }
            }
            canonical_chunk_links.insert(cluster.canonical_name.clone(), entity.source_chunk_ids.clone());
            canonical_entities.push(entity);
        }

        let relations = remap_and_dedupe_relations(project_id, &raw_relations, &raw_to_canonical);

        // Step 7: upsert entities and relations in batches; embed entity
        // names and persist entity embeddings.
        self.storage.graph.upsert_entities(canonical_entities.clone()).await?;
        if !relations.is_empty() {
            self.storage.graph.upsert_relations(relations.clone()).await?;
        }
        self.embed_and_persist(
            project_id,
            &canonical_entities,
            |e| e.entity_name.clone(),
            |e| e.entity_name.clone(),
        )
        .await?;

        for (canonical_name, chunk_ids) in &canonical_chunk_links {
            for chunk_id in chunk_ids {
                let mut linked: Vec<String> = match self.storage.kv.get(project_id, &chunk_entities_kv_key(chunk_id)).await? {
                    Some(v) => serde_json::from_value(v).unwrap_or_default(),
                    None => Vec::new(),
                };
                if !linked.contains(canonical_name) {
                    linked.push(canonical_name.clone());
                }
                self.storage
                    .kv
                    .put(project_id, &chunk_entities_kv_key(chunk_id), serde_json::json!(linked))
                    .await?;
            }
        }

        // Step 8: update counts, set status PROCESSED.
        let completed_at = chrono::Utc::now();
        let counts = DocStatusCounts {
            chunks: chunks.len() as u32,
            entities: canonical_entities.len() as u32,
            relations: relations.len() as u32,
        };
        self.storage
            .doc_status
            .put(DocStatus {
                document_id: document_id.to_string(),
                processing_status: ProcessingStatus::Processed,
                counts,
                error_message: None,
                started_at,
                completed_at: Some(completed_at),
            })
            .await?;

        kgrag_observability::ingest_completed(
            &EventContext::new("ingest.run_pipeline").with_project(project_id),
            IngestCompletedFields {
                chunks: counts.chunks,
                entities: counts.entities,
                relations: counts.relations,
                duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            },
        );

        Ok(IngestionReceipt {
            document_id: document_id.to_string(),
            status: ProcessingStatus::Processed,
            chunks: counts.chunks,
            entities: counts.entities,
            relations: counts.relations,
            started_at,
            completed_at: Some(completed_at),
            error: None,
        })
    }

    async fn chunk_document(
        &self,
        content: &str,
        doc_type: DocumentType,
        file_name: &str,
    ) -> Result<Vec<kgrag_chunker::RawChunk>> {
        if matches!(doc_type, DocumentType::Code) {
            CodeChunker::new(file_name).chunk(content, &self.config.chunk).await
        } else {
            SlidingWindowChunker::new().chunk(content, &self.config.chunk).await
        }
    }

    /// Embeds `items` in batches of `embedding_batch_size` and upserts one
    /// [`Embedding`] per item. Used for both chunk embeddings (owner type
    /// `Chunk`) and entity-name embeddings (owner type `Entity`).
    async fn embed_and_persist<T: HasOwnerType>(
        &self,
        project_id: ProjectId,
        items: &[T],
        owner_id: impl Fn(&T) -> String,
        text: impl Fn(&T) -> String,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let owner_type = T::owner_type();
        for batch in items.chunks(self.config.embedding_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(&text).collect();
            let (vectors, _tokens) = self.embedder.embed(&texts).await?;
            let embeddings = batch
                .iter()
                .zip(vectors)
                .map(|(item, vector)| Embedding {
                    id: Uuid::new_v4().to_string(),
                    owner_type,
                    owner_id: owner_id(item),
                    project_id,
                    vector,
                    model: self.embedder.model().to_string(),
                })
                .collect();
            self.storage.vector.upsert_batch(embeddings).await?;
        }
        Ok(())
    }

    /// Extracts every chunk concurrently, bounded by `extraction_batch_size`
    /// in-flight tasks at a time (§4.10 step 5). A single chunk's
    /// extraction failure (after C1's retries are exhausted inside the
    /// extractor) is logged and skipped, not propagated — §4.5's
    /// failure-ratio rule decides the document's overall fate.
    async fn extract_all(
        &self,
        project_id: ProjectId,
        chunks: &[Chunk],
        language: Option<&str>,
    ) -> Result<(Vec<ExtractedEntity>, Vec<(ExtractedRelation, String)>, HashMap<String, Vec<String>>, usize, usize)> {
        let mut in_flight = FuturesUnordered::new();
        let mut remaining = chunks.iter();
        let mut entities = Vec::new();
        let mut relations = Vec::new();
        let mut entity_chunk_ids: HashMap<String, Vec<String>> = HashMap::new();
        let mut successful = 0usize;
        let mut attempted = 0usize;

        let limit = self.config.extraction_batch_size.max(1);
        for chunk in remaining.by_ref().take(limit) {
            in_flight.push(self.extract_one(project_id, chunk, language));
        }

        while let Some((chunk_id, result)) = in_flight.next().await {
            attempted += 1;
            match result {
                Ok(extraction) => {
                    successful += 1;
                    for e in &extraction.entities {
                        entity_chunk_ids.entry(e.name.clone()).or_default().push(chunk_id.clone());
                    }
                    entities.extend(extraction.entities);
                    relations.extend(extraction.relations.into_iter().map(|r| (r, chunk_id.clone())));
                }
                Err(e) => {
                    warn!(chunk_id, error = %e, "chunk extraction failed, skipping");
                }
            }
            if let Some(chunk) = remaining.next() {
                in_flight.push(self.extract_one(project_id, chunk, language));
            }
        }

        Ok((entities, relations, entity_chunk_ids, successful, attempted))
    }

    async fn extract_one(
        &self,
        project_id: ProjectId,
        chunk: &Chunk,
        language: Option<&str>,
    ) -> (String, Result<kgrag_graph::extraction::ExtractionResult>) {
        let result = self.extractor.extract(project_id, &chunk.content, language).await;
        (chunk.id.clone(), result)
    }
}

/// Marker trait pairing a persisted item with the embedding owner type it
/// should be stored under, so [`IngestionOrchestrator::embed_and_persist`]
/// is generic over both chunks and entities without a runtime branch.
trait HasOwnerType {
    fn owner_type() -> EmbeddingOwnerType;
}

impl HasOwnerType for Chunk {
    fn owner_type() -> EmbeddingOwnerType {
        EmbeddingOwnerType::Chunk
    }
}

impl HasOwnerType for kgrag_core::types::Entity {
    fn owner_type() -> EmbeddingOwnerType {
        EmbeddingOwnerType::Entity
    }
}

/// Remaps each extracted relation's endpoints through the resolver's
/// raw-name -> canonical-name map, drops self-loops, and merges
/// duplicate `(src, tgt)` pairs within this document the same way
/// `kgrag_graph::merge::MergeService` merges them across a cluster:
/// weights sum, keywords union, descriptions concatenate.
fn remap_and_dedupe_relations(
    project_id: ProjectId,
    raw_relations: &[(ExtractedRelation, String)],
    raw_to_canonical: &HashMap<String, String>,
) -> Vec<Relation> {
    let mut merged: HashMap<(String, String), Relation> = HashMap::new();

    for (raw, chunk_id) in raw_relations {
        let src = raw_to_canonical.get(&raw.src).cloned().unwrap_or_else(|| raw.src.clone());
        let tgt = raw_to_canonical.get(&raw.tgt).cloned().unwrap_or_else(|| raw.tgt.clone());

        if kgrag_core::ids::normalize_entity_name(&src) == kgrag_core::ids::normalize_entity_name(&tgt) {
            continue;
        }

        let key = (
            kgrag_core::ids::normalize_entity_name(&src),
            kgrag_core::ids::normalize_entity_name(&tgt),
        );

        merged
            .entry(key)
            .and_modify(|existing| {
                existing.weight += raw.weight;
                for kw in &raw.keywords {
                    if !existing.keywords.contains(kw) {
                        existing.keywords.push(kw.clone());
                    }
                }
                existing.description = kgrag_graph::merge::merge_descriptions(
                    &[existing.description.clone(), raw.description.clone()],
                    kgrag_graph::merge::DescriptionMergeStrategy::Concatenate,
                );
                push_source_chunk_id(&mut existing.source_chunk_ids, chunk_id.clone());
            })
            .or_insert_with(|| Relation {
                project_id,
                src_id: src,
                tgt_id: tgt,
                description: raw.description.clone(),
                keywords: raw.keywords.clone(),
                weight: raw.weight,
                source_chunk_ids: vec![chunk_id.clone()],
            });
    }

    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_drops_self_loops_after_canonicalization() {
        let mut map = HashMap::new();
        map.insert("IBM".to_string(), "International Business Machines".to_string());
        map.insert("International Business Machines".to_string(), "International Business Machines".to_string());
        let raw = vec![(
            ExtractedRelation {
                src: "IBM".to_string(),
                tgt: "International Business Machines".to_string(),
                description: "same entity".to_string(),
                keywords: vec![],
                weight: 1.0,
            },
            "doc-1:chunk-0".to_string(),
        )];
        let relations = remap_and_dedupe_relations(ProjectId::new(), &raw, &map);
        assert!(relations.is_empty());
    }

    #[test]
    fn remap_merges_duplicate_pairs() {
        let map = HashMap::new();
        let raw = vec![
            (
                ExtractedRelation {
                    src: "A".to_string(),
                    tgt: "B".to_string(),
                    description: "first".to_string(),
                    keywords: vec!["x".to_string()],
                    weight: 1.0,
                },
                "doc-1:chunk-0".to_string(),
            ),
            (
                ExtractedRelation {
                    src: "A".to_string(),
                    tgt: "B".to_string(),
                    description: "second".to_string(),
                    keywords: vec!["y".to_string()],
                    weight: 2.0,
                },
                "doc-1:chunk-1".to_string(),
            ),
        ];
        let relations = remap_and_dedupe_relations(ProjectId::new(), &raw, &map);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].weight, 3.0);
        assert_eq!(relations[0].keywords.len(), 2);
        assert_eq!(relations[0].source_chunk_ids.len(), 2);
    }
}
