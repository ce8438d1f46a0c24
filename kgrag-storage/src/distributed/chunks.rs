use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::traits::storage::ChunkStorage;
use kgrag_core::types::{Chunk, CodeMetadata};

use super::pool::DistributedPool;

pub struct DistributedChunkStorage {
    pool: DistributedPool,
}

impl DistributedChunkStorage {
    #[must_use]
    pub fn new(pool: DistributedPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkStorage for DistributedChunkStorage {
    async fn put_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        for chunk in chunks {
            let code_metadata = chunk
                .code_metadata
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| KgError::storage(ErrorKind::Internal, e.to_string()))?;
            tx.execute(
                "INSERT INTO chunks (id, document_id, project_id, chunk_index, content, token_count, code_metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (document_id, chunk_index) DO UPDATE SET
                     id = EXCLUDED.id,
                     content = EXCLUDED.content,
                     token_count = EXCLUDED.token_count,
                     code_metadata = EXCLUDED.code_metadata",
                &[
                    &chunk.id,
                    &chunk.document_id,
                    &chunk.project_id.as_uuid(),
                    &(chunk.chunk_index as i32),
                    &chunk.content,
                    &(chunk.token_count as i32),
                    &code_metadata,
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

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM chunks WHERE document_id = $1 ORDER BY chunk_index ASC",
                &[&document_id],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        rows.iter()
            .map(|row| {
                let chunk_index: i32 = row.get("chunk_index");
                let token_count: i32 = row.get("token_count");
                let code_metadata_json: Option<serde_json::Value> = row.get("code_metadata");
                let code_metadata = code_metadata_json
                    .map(serde_json::from_value::<CodeMetadata>)
                    .transpose()
                    .map_err(|e| KgError::storage(ErrorKind::Internal, e.to_string()))?;
                Ok(Chunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    project_id: kgrag_core::ids::ProjectId::from_uuid(row.get("project_id")),
                    chunk_index: chunk_index as usize,
                    content: row.get("content"),
                    token_count: token_count as usize,
                    code_metadata,
                })
            })
            .collect()
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let client = self.pool.get().await?;
        let n = client
            .execute(
                "DELETE FROM chunks WHERE document_id = $1",
                &[&document_id],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(n)
    }
}
