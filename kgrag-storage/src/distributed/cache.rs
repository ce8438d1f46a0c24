use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::ExtractionCacheStorage;
use kgrag_core::types::{ExtractionCacheEntry, ExtractionCacheType};

use super::pool::DistributedPool;

pub struct DistributedExtractionCacheStorage {
    pool: DistributedPool,
}

impl DistributedExtractionCacheStorage {
    #[must_use]
    pub fn new(pool: DistributedPool) -> Self {
        Self { pool }
    }
}

fn cache_type_str(cache_type: ExtractionCacheType) -> &'static str {
    match cache_type {
        ExtractionCacheType::EntityExtraction => "ENTITY_EXTRACTION",
        ExtractionCacheType::Gleaning => "GLEANING",
        ExtractionCacheType::Summarization => "SUMMARIZATION",
        ExtractionCacheType::KeywordExtraction => "KEYWORD_EXTRACTION",
    }
}

#[async_trait]
impl ExtractionCacheStorage for DistributedExtractionCacheStorage {
    async fn get(
        &self,
        project_id: ProjectId,
        cache_type: ExtractionCacheType,
        content_hash: &str,
    ) -> Result<Option<ExtractionCacheEntry>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT result, tokens_used FROM extraction_cache
                 WHERE project_id = $1 AND cache_type = $2 AND content_hash = $3",
                &[
                    &project_id.as_uuid(),
                    &cache_type_str(cache_type),
                    &content_hash,
                ],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(row.map(|r| {
            let tokens_used: i32 = r.get("tokens_used");
            ExtractionCacheEntry {
                project_id,
                cache_type,
                content_hash: content_hash.to_string(),
                result: r.get("result"),
                tokens_used: tokens_used as u32,
            }
        }))
    }

    async fn put(&self, entry: ExtractionCacheEntry) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO extraction_cache (project_id, cache_type, content_hash, result, tokens_used)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (project_id, cache_type, content_hash) DO UPDATE SET
                     result = EXCLUDED.result,
                     tokens_used = EXCLUDED.tokens_used",
                &[
                    &entry.project_id.as_uuid(),
                    &cache_type_str(entry.cache_type),
                    &entry.content_hash,
                    &entry.result,
                    &(entry.tokens_used as i32),
                ],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn delete_by_project(&self, project_id: ProjectId) -> Result<u64> {
        let client = self.pool.get().await?;
        let n = client
            .execute(
                "DELETE FROM extraction_cache WHERE project_id = $1",
                &[&project_id.as_uuid()],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(n)
    }
}
