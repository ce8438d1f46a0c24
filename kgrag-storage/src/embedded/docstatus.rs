use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::traits::storage::DocStatusStorage;
use kgrag_core::types::{DocStatus, DocStatusCounts, ProcessingStatus};

use super::pool::EmbeddedPool;

pub struct EmbeddedDocStatusStorage {
    pool: EmbeddedPool,
}

impl EmbeddedDocStatusStorage {
    #[must_use]
    pub fn new(pool: EmbeddedPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: ProcessingStatus) -> &'static str {
    match status {
        ProcessingStatus::NotProcessed => "NOT_PROCESSED",
        ProcessingStatus::Processing => "PROCESSING",
        ProcessingStatus::Processed => "PROCESSED",
        ProcessingStatus::Failed => "FAILED",
    }
}

fn status_from_str(s: &str) -> ProcessingStatus {
    match s {
        "PROCESSING" => ProcessingStatus::Processing,
        "PROCESSED" => ProcessingStatus::Processed,
        "FAILED" => ProcessingStatus::Failed,
        _ => ProcessingStatus::NotProcessed,
    }
}

fn map_sql_err(e: libsql::Error) -> KgError {
    KgError::storage(ErrorKind::TransientStorage, e.to_string())
}

#[async_trait]
impl DocStatusStorage for EmbeddedDocStatusStorage {
    async fn get(&self, document_id: &str) -> Result<Option<DocStatus>> {
        let conn = self.pool.lock().await;
        let mut rows = conn
            .query(
                "SELECT document_id, processing_status, chunks_count, entities_count, relations_count,
                        error_message, started_at, completed_at
                 FROM doc_status WHERE document_id = ?1",
                libsql::params![document_id.to_string()],
            )
            .await
            .map_err(map_sql_err)?;
        let Some(row) = rows.next().await.map_err(map_sql_err)? else {
            return Ok(None);
        };
        let status_raw: String = row.get(1).map_err(map_sql_err)?;
        let chunks: i64 = row.get(2).map_err(map_sql_err)?;
        let entities: i64 = row.get(3).map_err(map_sql_err)?;
        let relations: i64 = row.get(4).map_err(map_sql_err)?;
        let started_raw: String = row.get(6).map_err(map_sql_err)?;
        let completed_raw: Option<String> = row.get(7).map_err(map_sql_err)?;

        Ok(Some(DocStatus {
            document_id: row.get(0).map_err(map_sql_err)?,
            processing_status: status_from_str(&status_raw),
            counts: DocStatusCounts {
                chunks: chunks as u32,
                entities: entities as u32,
                relations: relations as u32,
            },
            error_message: row.get(5).map_err(map_sql_err)?,
            started_at: parse_rfc3339(&started_raw)?,
            completed_at: completed_raw.as_deref().map(parse_rfc3339).transpose()?,
        }))
    }

    async fn put(&self, status: DocStatus) -> Result<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO doc_status
               (document_id, processing_status, chunks_count, entities_count, relations_count,
                error_message, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (document_id) DO UPDATE SET
                 processing_status = excluded.processing_status,
                 chunks_count = excluded.chunks_count,
                 entities_count = excluded.entities_count,
                 relations_count = excluded.relations_count,
                 error_message = excluded.error_message,
                 completed_at = excluded.completed_at",
            libsql::params![
                status.document_id,
                status_str(status.processing_status),
                status.counts.chunks as i64,
                status.counts.entities as i64,
                status.counts.relations as i64,
                status.error_message,
                status.started_at.to_rfc3339(),
                status.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "DELETE FROM doc_status WHERE document_id = ?1",
            libsql::params![document_id.to_string()],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KgError::storage(ErrorKind::Internal, format!("corrupt timestamp {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::pool::EmbeddedPoolConfig;

    async fn open_pool() -> EmbeddedPool {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddedPoolConfig {
            path: dir.path().join("docstatus.db"),
            ..Default::default()
        };
        let pool = EmbeddedPool::open(&config).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = EmbeddedDocStatusStorage::new(open_pool().await);
        let status = DocStatus {
            document_id: "doc-1".to_string(),
            processing_status: ProcessingStatus::Processing,
            counts: DocStatusCounts::default(),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        storage.put(status.clone()).await.unwrap();
        let fetched = storage.get("doc-1").await.unwrap().unwrap();
        assert_eq!(fetched.processing_status, ProcessingStatus::Processing);
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let storage = EmbeddedDocStatusStorage::new(open_pool().await);
        assert!(storage.get("nope").await.unwrap().is_none());
    }
}
