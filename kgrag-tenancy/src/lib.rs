//! Project lifecycle (C11, §4.11): per-project graph/vector namespace
//! creation and cascading deletion, with the isolation invariant that no
//! query or traversal started in one project is ever observable from
//! another.
//!
//! `create_project` allocates a graph namespace (idempotent if it
//! already exists); `delete_project` cascades vectors -> graph -> cache
//! in that order, so no dangling reference is ever observable mid-delete.
//! Lifecycle hooks are notified around creation and deletion but never
//! block the transition itself.

use async_trait::async_trait;
use kgrag_core::error::Result;
use kgrag_core::ids::ProjectId;
use kgrag_storage::StorageBackend;
use std::sync::Arc;
use tracing::{info, instrument};

/// Notified around a project's creation and deletion so collaborators
/// don't need to poll. Hook failures are logged, never fatal — a
/// lifecycle observer must not be able to block the project itself from
/// being created or destroyed.
#[async_trait]
pub trait ProjectLifecycleHook: Send + Sync {
    async fn on_project_created(&self, project_id: ProjectId) -> Result<()>;
    async fn on_project_deleting(&self, project_id: ProjectId) -> Result<()>;
    async fn on_project_deleted(&self, project_id: ProjectId) -> Result<()>;
}

/// Allocates and tears down the per-project graph + vector namespaces
/// (§4.11). Document/project relational metadata CRUD is an external
/// collaborator (§1 scope) and is not touched here; this service only
/// owns the storage-layer namespace lifecycle.
pub struct ProjectLifecycle {
    storage: StorageBackend,
    hooks: Vec<Arc<dyn ProjectLifecycleHook>>,
}

impl ProjectLifecycle {
    #[must_use]
    pub fn new(storage: StorageBackend) -> Self {
        Self {
            storage,
            hooks: Vec::new(),
        }
    }

    pub fn add_hook(&mut self, hook: Arc<dyn ProjectLifecycleHook>) {
        self.hooks.push(hook);
    }

    /// Allocates `project_id`'s graph namespace. Idempotent: creating an
    /// already-existing namespace is a no-op rather than an error, since
    /// re-running project setup (e.g. after a partial failure) must
    /// converge the same way re-ingestion does (§7).
    #[instrument(skip(self), fields(%project_id))]
    pub async fn create_project(&self, project_id: ProjectId) -> Result<()> {
        if self.storage.graph.graph_exists(project_id).await? {
            info!("project graph namespace already exists, skipping creation");
        } else {
            self.storage.graph.create_project_graph(project_id).await?;
            info!("created project graph namespace");
        }

        for hook in &self.hooks {
            if let Err(e) = hook.on_project_created(project_id).await {
                tracing::warn!(error = %e, "project-created hook failed");
            }
        }
        Ok(())
    }

    pub async fn project_exists(&self, project_id: ProjectId) -> Result<bool> {
        self.storage.graph.graph_exists(project_id).await
    }

    /// Cascade-deletes `project_id`: vectors, then the graph namespace,
    /// then extraction-cache entries (§4.11's order — "so that dangling
    /// references are never observable"; relational document metadata is
    /// the external collaborator's own cascade, not this service's
    /// concern). Deleting an already-absent project is a success, not an
    /// error (§8 "cascading delete" + §7 "query on non-existent project:
    /// success with 0 sources").
    #[instrument(skip(self), fields(%project_id))]
    pub async fn delete_project(&self, project_id: ProjectId) -> Result<()> {
        for hook in &self.hooks {
            if let Err(e) = hook.on_project_deleting(project_id).await {
                tracing::warn!(error = %e, "project-deleting hook failed");
            }
        }

        let deleted_vectors = self.storage.vector.delete_by_project(project_id).await?;
        self.storage.graph.delete_project_graph(project_id).await?;
        let deleted_cache = self.storage.cache.delete_by_project(project_id).await?;

        info!(deleted_vectors, deleted_cache, "project deleted");

        for hook in &self.hooks {
            if let Err(e) = hook.on_project_deleted(project_id).await {
                tracing::warn!(error = %e, "project-deleted hook failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgrag_core::traits::storage::{
        ChunkStorage, DocStatusStorage, ExtractionCacheStorage, GraphStorage, KvStorage,
        MockChunkStorage, MockDocStatusStorage, MockExtractionCacheStorage, MockGraphStorage,
        MockKvStorage, MockVectorStorage, VectorStorage,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn empty_backend(
        graph: MockGraphStorage,
        vector: MockVectorStorage,
        cache: MockExtractionCacheStorage,
    ) -> StorageBackend {
        StorageBackend {
            graph: Arc::new(graph) as Arc<dyn GraphStorage>,
            vector: Arc::new(vector) as Arc<dyn VectorStorage>,
            kv: Arc::new(MockKvStorage::new()) as Arc<dyn KvStorage>,
            doc_status: Arc::new(MockDocStatusStorage::new()) as Arc<dyn DocStatusStorage>,
            cache: Arc::new(cache) as Arc<dyn ExtractionCacheStorage>,
            chunks: Arc::new(MockChunkStorage::new()) as Arc<dyn ChunkStorage>,
        }
    }

    #[tokio::test]
    async fn create_project_allocates_namespace_when_absent() {
        let mut graph = MockGraphStorage::new();
        graph.expect_graph_exists().returning(|_| Ok(false));
        graph.expect_create_project_graph().times(1).returning(|_| Ok(()));

        let backend = empty_backend(graph, MockVectorStorage::new(), MockExtractionCacheStorage::new());
        let lifecycle = ProjectLifecycle::new(backend);
        lifecycle.create_project(ProjectId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn create_project_is_idempotent_when_namespace_exists() {
        let mut graph = MockGraphStorage::new();
        graph.expect_graph_exists().returning(|_| Ok(true));
        graph.expect_create_project_graph().times(0);

        let backend = empty_backend(graph, MockVectorStorage::new(), MockExtractionCacheStorage::new());
        let lifecycle = ProjectLifecycle::new(backend);
        lifecycle.create_project(ProjectId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_project_cascades_vectors_graph_then_cache() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut graph = MockGraphStorage::new();
        let order_graph = order.clone();
        graph.expect_delete_project_graph().times(1).returning(move |_| {
            order_graph.lock().unwrap().push("graph");
            Ok(())
        });

        let mut vector = MockVectorStorage::new();
        let order_vector = order.clone();
        vector.expect_delete_by_project().times(1).returning(move |_| {
            order_vector.lock().unwrap().push("vector");
            Ok(3u64)
        });

        let mut cache = MockExtractionCacheStorage::new();
        let order_cache = order.clone();
        cache.expect_delete_by_project().times(1).returning(move |_| {
            order_cache.lock().unwrap().push("cache");
            Ok(5u64)
        });

        let backend = empty_backend(graph, vector, cache);
        let lifecycle = ProjectLifecycle::new(backend);
        lifecycle.delete_project(ProjectId::new()).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["vector", "graph", "cache"]);
    }

    struct CountingHook {
        created: AtomicUsize,
        deleting: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl CountingHook {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                deleting: AtomicUsize::new(0),
                deleted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProjectLifecycleHook for CountingHook {
        async fn on_project_created(&self, _project_id: ProjectId) -> Result<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_project_deleting(&self, _project_id: ProjectId) -> Result<()> {
            self.deleting.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_project_deleted(&self, _project_id: ProjectId) -> Result<()> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn hooks_fire_on_create_and_delete() {
        let mut graph = MockGraphStorage::new();
        graph.expect_graph_exists().returning(|_| Ok(false));
        graph.expect_create_project_graph().returning(|_| Ok(()));
        graph.expect_delete_project_graph().returning(|_| Ok(()));

        let mut vector = MockVectorStorage::new();
        vector.expect_delete_by_project().returning(|_| Ok(0));

        let mut cache = MockExtractionCacheStorage::new();
        cache.expect_delete_by_project().returning(|_| Ok(0));

        let backend = empty_backend(graph, vector, cache);
        let mut lifecycle = ProjectLifecycle::new(backend);
        let hook = Arc::new(CountingHook::new());
        lifecycle.add_hook(hook.clone());

        let project_id = ProjectId::new();
        lifecycle.create_project(project_id).await.unwrap();
        lifecycle.delete_project(project_id).await.unwrap();

        assert_eq!(hook.created.load(Ordering::SeqCst), 1);
        assert_eq!(hook.deleting.load(Ordering::SeqCst), 1);
        assert_eq!(hook.deleted.load(Ordering::SeqCst), 1);
    }
}
