//! Pluggable graph/vector/KV storage backends (C2): a distributed backend
//! (Postgres + pgvector, §4.2/§6) and an embedded backend (single-file
//! libsql, §4.2/§6). Both implement every trait in
//! `kgrag_core::traits::storage`; selection is a startup-time choice
//! (`storage.backend` in `kgrag-config`), never a runtime branch inside a
//! request path — mirroring §9's "polymorphism over storage" design note.

pub mod common;

#[cfg(feature = "distributed")]
pub mod distributed;

#[cfg(feature = "embedded")]
pub mod embedded;

use kgrag_core::traits::storage::{
    ChunkStorage, DocStatusStorage, ExtractionCacheStorage, GraphStorage, KvStorage, VectorStorage,
};
use std::sync::Arc;

/// One fully-constructed backend: the five storage capability traits
/// bundled behind `Arc`s so the ingestion orchestrator, query engine, and
/// project lifecycle service can each hold a cheap clone. Exactly one
/// variant is active per process (§4.2).
#[derive(Clone)]
pub struct StorageBackend {
    pub graph: Arc<dyn GraphStorage>,
    pub vector: Arc<dyn VectorStorage>,
    pub kv: Arc<dyn KvStorage>,
    pub doc_status: Arc<dyn DocStatusStorage>,
    pub cache: Arc<dyn ExtractionCacheStorage>,
    pub chunks: Arc<dyn ChunkStorage>,
}

#[cfg(feature = "distributed")]
impl StorageBackend {
    /// Connects to the distributed backend and runs pending migrations
    /// against the global tables before returning.
    pub async fn connect_distributed(
        config: &distributed::DistributedPoolConfig,
    ) -> kgrag_core::error::Result<Self> {
        let pool = distributed::DistributedPool::connect(config)?;
        pool.run_migrations().await?;
        Ok(Self {
            graph: Arc::new(distributed::DistributedGraphStorage::new(pool.clone())),
            vector: Arc::new(distributed::DistributedVectorStorage::new(pool.clone())),
            kv: Arc::new(distributed::DistributedKvStorage::new(pool.clone())),
            doc_status: Arc::new(distributed::DistributedDocStatusStorage::new(pool.clone())),
            cache: Arc::new(distributed::DistributedExtractionCacheStorage::new(pool.clone())),
            chunks: Arc::new(distributed::DistributedChunkStorage::new(pool)),
        })
    }
}

#[cfg(feature = "embedded")]
impl StorageBackend {
    /// Opens (creating if absent) the single-file embedded backend. The
    /// pool itself applies pragmas and DDL on open (§6).
    pub async fn open_embedded(
        config: &embedded::EmbeddedPoolConfig,
    ) -> kgrag_core::error::Result<Self> {
        let pool = embedded::EmbeddedPool::open(config).await?;
        Ok(Self {
            graph: Arc::new(embedded::EmbeddedGraphStorage::new(pool.clone())),
            vector: Arc::new(embedded::EmbeddedVectorStorage::new(pool.clone())),
            kv: Arc::new(embedded::EmbeddedKvStorage::new(pool.clone())),
            doc_status: Arc::new(embedded::EmbeddedDocStatusStorage::new(pool.clone())),
            cache: Arc::new(embedded::EmbeddedExtractionCacheStorage::new(pool.clone())),
            chunks: Arc::new(embedded::EmbeddedChunkStorage::new(pool)),
        })
    }
}
