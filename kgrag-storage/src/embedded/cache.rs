use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::ExtractionCacheStorage;
use kgrag_core::types::{ExtractionCacheEntry, ExtractionCacheType};

use super::pool::EmbeddedPool;

pub struct EmbeddedExtractionCacheStorage {
    pool: EmbeddedPool,
}

impl EmbeddedExtractionCacheStorage {
    #[must_use]
    pub fn new(pool: EmbeddedPool) -> Self {
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

fn cache_type_from_str(s: &str) -> ExtractionCacheType {
    match s {
        "GLEANING" => ExtractionCacheType::Gleaning,
        "SUMMARIZATION" => ExtractionCacheType::Summarization,
        "KEYWORD_EXTRACTION" => ExtractionCacheType::KeywordExtraction,
        _ => ExtractionCacheType::EntityExtraction,
    }
}

fn map_sql_err(e: libsql::Error) -> KgError {
    KgError::storage(ErrorKind::TransientStorage, e.to_string())
}

#[async_trait]
impl ExtractionCacheStorage for EmbeddedExtractionCacheStorage {
    async fn get(
        &self,
        project_id: ProjectId,
        cache_type: ExtractionCacheType,
        content_hash: &str,
    ) -> Result<Option<ExtractionCacheEntry>> {
        let conn = self.pool.lock().await;
        let mut rows = conn
            .query(
                "SELECT result, tokens_used FROM extraction_cache
                 WHERE project_id = ?1 AND cache_type = ?2 AND content_hash = ?3",
                libsql::params![
                    project_id.to_string(),
                    cache_type_str(cache_type),
                    content_hash.to_string(),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        let Some(row) = rows.next().await.map_err(map_sql_err)? else {
            return Ok(None);
        };
        let result_raw: String = row.get(0).map_err(map_sql_err)?;
        let tokens_used: i64 = row.get(1).map_err(map_sql_err)?;
        let result = serde_json::from_str(&result_raw)
            .map_err(|e| KgError::storage(ErrorKind::Internal, format!("corrupt cache entry: {e}")))?;
        Ok(Some(ExtractionCacheEntry {
            project_id,
            cache_type,
            content_hash: content_hash.to_string(),
            result,
            tokens_used: tokens_used as u32,
        }))
    }

    async fn put(&self, entry: ExtractionCacheEntry) -> Result<()> {
        let conn = self.pool.lock().await;
        let result_raw = serde_json::to_string(&entry.result)
            .map_err(|e| KgError::storage(ErrorKind::Internal, e.to_string()))?;
        conn.execute(
            "INSERT INTO extraction_cache (project_id, cache_type, content_hash, result, tokens_used)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (project_id, cache_type, content_hash) DO UPDATE SET
                 result = excluded.result,
                 tokens_used = excluded.tokens_used",
            libsql::params![
                entry.project_id.to_string(),
                cache_type_str(entry.cache_type),
                entry.content_hash,
                result_raw,
                entry.tokens_used as i64,
            ],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn delete_by_project(&self, project_id: ProjectId) -> Result<u64> {
        let conn = self.pool.lock().await;
        let n = conn
            .execute(
                "DELETE FROM extraction_cache WHERE project_id = ?1",
                libsql::params![project_id.to_string()],
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
            path: dir.path().join("cache.db"),
            ..Default::default()
        };
        let pool = EmbeddedPool::open(&config).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = EmbeddedExtractionCacheStorage::new(open_pool().await);
        let project = ProjectId::new();
        let entry = ExtractionCacheEntry {
            project_id: project,
            cache_type: ExtractionCacheType::EntityExtraction,
            content_hash: "abc123".to_string(),
            result: serde_json::json!({"entities": []}),
            tokens_used: 42,
        };
        storage.put(entry).await.unwrap();
        let fetched = storage
            .get(project, ExtractionCacheType::EntityExtraction, "abc123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.tokens_used, 42);
    }

    #[tokio::test]
    async fn miss_is_none_not_error() {
        let storage = EmbeddedExtractionCacheStorage::new(open_pool().await);
        let result = storage
            .get(ProjectId::new(), ExtractionCacheType::Gleaning, "missing")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn cache_type_round_trips_through_string() {
        for ty in [
            ExtractionCacheType::EntityExtraction,
            ExtractionCacheType::Gleaning,
            ExtractionCacheType::Summarization,
            ExtractionCacheType::KeywordExtraction,
        ] {
            assert_eq!(cache_type_from_str(cache_type_str(ty)), ty);
        }
    }
}
