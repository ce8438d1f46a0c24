//! `VectorStorage` over the embedded backend: no native ANN index, so
//! `query` scans the project's rows and ranks with
//! [`crate::common::similarity::cosine_similarity`] in memory. Acceptable
//! at embedded scale (single-tenant, local-first deployments per §4.2);
//! the distributed backend is what carries the recall requirement at
//! larger corpus sizes.

use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::{VectorMatch, VectorStorage};
use kgrag_core::types::{Embedding, EmbeddingOwnerType};
use zerocopy::{AsBytes, LayoutVerified};

use super::pool::EmbeddedPool;

pub struct EmbeddedVectorStorage {
    pool: EmbeddedPool,
}

impl EmbeddedVectorStorage {
    #[must_use]
    pub fn new(pool: EmbeddedPool) -> Self {
        Self { pool }
    }
}

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.as_bytes().to_vec()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    LayoutVerified::<_, [f32]>::new_slice(bytes)
        .map(|lv| lv.into_slice().to_vec())
        .unwrap_or_default()
}

fn owner_type_str(owner_type: EmbeddingOwnerType) -> &'static str {
    match owner_type {
        EmbeddingOwnerType::Chunk => "CHUNK",
        EmbeddingOwnerType::Entity => "ENTITY",
        EmbeddingOwnerType::Relation => "RELATION",
    }
}

fn map_sql_err(e: libsql::Error) -> KgError {
    KgError::storage(ErrorKind::TransientStorage, e.to_string())
}

#[async_trait]
impl VectorStorage for EmbeddedVectorStorage {
    async fn upsert(&self, embedding: Embedding) -> Result<()> {
        self.upsert_batch(vec![embedding]).await
    }

    async fn upsert_batch(&self, embeddings: Vec<Embedding>) -> Result<()> {
        if embeddings.is_empty() {
            return Ok(());
        }
        let conn = self.pool.lock().await;
        let tx = conn.transaction().await.map_err(map_sql_err)?;
        for embedding in embeddings {
            tx.execute(
                "INSERT INTO vectors (id, project_id, owner_type, owner_id, model, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (id) DO UPDATE SET
                     embedding = excluded.embedding,
                     model = excluded.model",
                libsql::params![
                    embedding.id,
                    embedding.project_id.to_string(),
                    owner_type_str(embedding.owner_type),
                    embedding.owner_id,
                    embedding.model,
                    vector_to_bytes(&embedding.vector),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        }
        tx.commit().await.map_err(map_sql_err)?;
        Ok(())
    }

    async fn query(
        &self,
        project_id: ProjectId,
        query_vector: &[f32],
        top_k: usize,
        owner_type: Option<EmbeddingOwnerType>,
    ) -> Result<Vec<VectorMatch>> {
        let conn = self.pool.lock().await;
        let pid = project_id.to_string();
        let mut rows = match owner_type {
            Some(ot) => {
                conn.query(
                    "SELECT owner_id, embedding FROM vectors WHERE project_id = ?1 AND owner_type = ?2",
                    libsql::params![pid, owner_type_str(ot)],
                )
                .await
            }
            None => {
                conn.query(
                    "SELECT owner_id, embedding FROM vectors WHERE project_id = ?1",
                    libsql::params![pid],
                )
                .await
            }
        }
        .map_err(map_sql_err)?;

        let mut matches = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql_err)? {
            let owner_id: String = row.get(0).map_err(map_sql_err)?;
            let blob: Vec<u8> = row.get(1).map_err(map_sql_err)?;
            let vector = bytes_to_vector(&blob);
            let similarity = crate::common::cosine_similarity(query_vector, &vector);
            matches.push(VectorMatch { owner_id, similarity });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.owner_id.cmp(&b.owner_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, project_id: ProjectId, owner_id: &str) -> Result<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "DELETE FROM vectors WHERE project_id = ?1 AND owner_id = ?2",
            libsql::params![project_id.to_string(), owner_id],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn delete_batch(&self, project_id: ProjectId, owner_ids: &[String]) -> Result<()> {
        let conn = self.pool.lock().await;
        for owner_id in owner_ids {
            conn.execute(
                "DELETE FROM vectors WHERE project_id = ?1 AND owner_id = ?2",
                libsql::params![project_id.to_string(), owner_id.clone()],
            )
            .await
            .map_err(map_sql_err)?;
        }
        Ok(())
    }

    async fn delete_by_project(&self, project_id: ProjectId) -> Result<u64> {
        let conn = self.pool.lock().await;
        let n = conn
            .execute(
                "DELETE FROM vectors WHERE project_id = ?1",
                libsql::params![project_id.to_string()],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(n)
    }

    async fn delete_entity_embeddings(&self, project_id: ProjectId, names: &[String]) -> Result<()> {
        let conn = self.pool.lock().await;
        for name in names {
            conn.execute(
                "DELETE FROM vectors WHERE project_id = ?1 AND owner_type = 'ENTITY' AND owner_id = ?2",
                libsql::params![project_id.to_string(), name.clone()],
            )
            .await
            .map_err(map_sql_err)?;
        }
        Ok(())
    }

    async fn has_vectors(&self, project_id: ProjectId, document_id: &str) -> Result<bool> {
        let conn = self.pool.lock().await;
        let pattern = format!("{document_id}:%");
        let mut rows = conn
            .query(
                "SELECT 1 FROM vectors WHERE project_id = ?1 AND owner_type = 'CHUNK' AND owner_id LIKE ?2 LIMIT 1",
                libsql::params![project_id.to_string(), pattern],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(rows.next().await.map_err(map_sql_err)?.is_some())
    }
}
