//! `VectorStorage` over the global `vectors` table with a pgvector HNSW
//! index (§4.2: "approximate index, recall >= 0.95 required"). Distance
//! operator `<=>` is cosine distance; similarity is `1 - distance`.

use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::{VectorMatch, VectorStorage};
use kgrag_core::types::{Embedding, EmbeddingOwnerType};
use pgvector::Vector;

use super::pool::DistributedPool;

pub struct DistributedVectorStorage {
    pool: DistributedPool,
}

impl DistributedVectorStorage {
    #[must_use]
    pub fn new(pool: DistributedPool) -> Self {
        Self { pool }
    }
}

fn owner_type_str(owner_type: EmbeddingOwnerType) -> &'static str {
    match owner_type {
        EmbeddingOwnerType::Chunk => "CHUNK",
        EmbeddingOwnerType::Entity => "ENTITY",
        EmbeddingOwnerType::Relation => "RELATION",
    }
}

#[async_trait]
impl VectorStorage for DistributedVectorStorage {
    async fn upsert(&self, embedding: Embedding) -> Result<()> {
        self.upsert_batch(vec![embedding]).await
    }

    async fn upsert_batch(&self, embeddings: Vec<Embedding>) -> Result<()> {
        if embeddings.is_empty() {
            return Ok(());
        }
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        for embedding in embeddings {
            tx.execute(
                "INSERT INTO vectors (id, project_id, owner_type, owner_id, model, embedding)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (id) DO UPDATE SET
                     embedding = EXCLUDED.embedding,
                     model = EXCLUDED.model",
                &[
                    &embedding.id,
                    &embedding.project_id.as_uuid(),
                    &owner_type_str(embedding.owner_type),
                    &embedding.owner_id,
                    &embedding.model,
                    &Vector::from(embedding.vector),
                ],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        project_id: ProjectId,
        query_vector: &[f32],
        top_k: usize,
        owner_type: Option<EmbeddingOwnerType>,
    ) -> Result<Vec<VectorMatch>> {
        let client = self.pool.get().await?;
        let qvec = Vector::from(query_vector.to_vec());
        let rows = match owner_type {
            Some(ot) => {
                client
                    .query(
                        "SELECT owner_id, 1 - (embedding <=> $1) AS similarity FROM vectors
                         WHERE project_id = $2 AND owner_type = $3
                         ORDER BY embedding <=> $1, owner_id ASC
                         LIMIT $4",
                        &[&qvec, &project_id.as_uuid(), &owner_type_str(ot), &(top_k as i64)],
                    )
                    .await
            }
            None => {
                client
                    .query(
                        "SELECT owner_id, 1 - (embedding <=> $1) AS similarity FROM vectors
                         WHERE project_id = $2
                         ORDER BY embedding <=> $1, owner_id ASC
                         LIMIT $3",
                        &[&qvec, &project_id.as_uuid(), &(top_k as i64)],
                    )
                    .await
            }
        }
        .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| VectorMatch {
                owner_id: row.get("owner_id"),
                similarity: row.get::<_, f32>("similarity"),
            })
            .collect())
    }

    async fn delete(&self, project_id: ProjectId, owner_id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM vectors WHERE project_id = $1 AND owner_id = $2",
                &[&project_id.as_uuid(), &owner_id],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn delete_batch(&self, project_id: ProjectId, owner_ids: &[String]) -> Result<()> {
        if owner_ids.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM vectors WHERE project_id = $1 AND owner_id = ANY($2)",
                &[&project_id.as_uuid(), &owner_ids],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn delete_by_project(&self, project_id: ProjectId) -> Result<u64> {
        let client = self.pool.get().await?;
        let n = client
            .execute(
                "DELETE FROM vectors WHERE project_id = $1",
                &[&project_id.as_uuid()],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(n)
    }

    async fn delete_entity_embeddings(&self, project_id: ProjectId, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM vectors WHERE project_id = $1 AND owner_type = 'ENTITY' AND owner_id = ANY($2)",
                &[&project_id.as_uuid(), &names],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn has_vectors(&self, project_id: ProjectId, document_id: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let pattern = format!("{document_id}:%");
        let row = client
            .query_opt(
                "SELECT 1 FROM vectors
                 WHERE project_id = $1 AND owner_type = 'CHUNK' AND owner_id LIKE $2
                 LIMIT 1",
                &[&project_id.as_uuid(), &pattern],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(row.is_some())
    }
}
