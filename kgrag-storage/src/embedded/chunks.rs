use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::ChunkStorage;
use kgrag_core::types::{Chunk, CodeMetadata};

use super::pool::EmbeddedPool;

pub struct EmbeddedChunkStorage {
    pool: EmbeddedPool,
}

impl EmbeddedChunkStorage {
    #[must_use]
    pub fn new(pool: EmbeddedPool) -> Self {
        Self { pool }
    }
}

fn map_sql_err(e: libsql::Error) -> KgError {
    KgError::storage(ErrorKind::TransientStorage, e.to_string())
}

#[async_trait]
impl ChunkStorage for EmbeddedChunkStorage {
    async fn put_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let conn = self.pool.lock().await;
        let tx = conn.transaction().await.map_err(map_sql_err)?;
        for chunk in chunks {
            let code_metadata = chunk
                .code_metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| KgError::storage(ErrorKind::Internal, e.to_string()))?;
            tx.execute(
                "INSERT INTO chunks (id, document_id, project_id, chunk_index, content, token_count, code_metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (document_id, chunk_index) DO UPDATE SET
                     id = excluded.id,
                     content = excluded.content,
                     token_count = excluded.token_count,
                     code_metadata = excluded.code_metadata",
                libsql::params![
                    chunk.id,
                    chunk.document_id,
                    chunk.project_id.to_string(),
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.token_count as i64,
                    code_metadata,
                ],
            )
            .await
            .map_err(map_sql_err)?;
        }
        tx.commit().await.map_err(map_sql_err)?;
        Ok(())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.pool.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, document_id, project_id, chunk_index, content, token_count, code_metadata
                 FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
                libsql::params![document_id.to_string()],
            )
            .await
            .map_err(map_sql_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql_err)? {
            let chunk_index: i64 = row.get(3).map_err(map_sql_err)?;
            let token_count: i64 = row.get(5).map_err(map_sql_err)?;
            let code_metadata_raw: Option<String> = row.get(6).map_err(map_sql_err)?;
            let code_metadata = code_metadata_raw
                .map(|raw| serde_json::from_str::<CodeMetadata>(&raw))
                .transpose()
                .map_err(|e| KgError::storage(ErrorKind::Internal, e.to_string()))?;
            let project_id_raw: String = row.get(2).map_err(map_sql_err)?;
            out.push(Chunk {
                id: row.get(0).map_err(map_sql_err)?,
                document_id: row.get(1).map_err(map_sql_err)?,
                project_id: ProjectId::from_uuid(
                    project_id_raw
                        .parse()
                        .map_err(|e| KgError::storage(ErrorKind::Internal, format!("corrupt project id: {e}")))?,
                ),
                chunk_index: chunk_index as usize,
                content: row.get(4).map_err(map_sql_err)?,
                token_count: token_count as usize,
                code_metadata,
            });
        }
        Ok(out)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let conn = self.pool.lock().await;
        let n = conn
            .execute(
                "DELETE FROM chunks WHERE document_id = ?1",
                libsql::params![document_id.to_string()],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::pool::EmbeddedPoolConfig;

    async fn open_pool() -> EmbeddedPool {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddedPoolConfig {
            path: dir.path().join("chunks.db"),
            ..Default::default()
        };
        let pool = EmbeddedPool::open(&config).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    fn chunk(project: ProjectId, doc: &str, index: usize) -> Chunk {
        Chunk {
            id: format!("{doc}-{index}"),
            document_id: doc.to_string(),
            project_id: project,
            chunk_index: index,
            content: format!("chunk {index}"),
            token_count: 10,
            code_metadata: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_preserves_order() {
        let storage = EmbeddedChunkStorage::new(open_pool().await);
        let project = ProjectId::new();
        storage
            .put_chunks(vec![chunk(project, "doc-1", 1), chunk(project, "doc-1", 0)])
            .await
            .unwrap();
        let chunks = storage.get_chunks("doc-1").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[tokio::test]
    async fn delete_by_document_removes_all() {
        let storage = EmbeddedChunkStorage::new(open_pool().await);
        let project = ProjectId::new();
        storage.put_chunks(vec![chunk(project, "doc-2", 0)]).await.unwrap();
        let deleted = storage.delete_by_document("doc-2").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(storage.get_chunks("doc-2").await.unwrap().is_empty());
    }
}
