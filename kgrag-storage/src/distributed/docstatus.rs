use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::traits::storage::DocStatusStorage;
use kgrag_core::types::{DocStatus, DocStatusCounts, ProcessingStatus};

use super::pool::DistributedPool;

pub struct DistributedDocStatusStorage {
    pool: DistributedPool,
}

impl DistributedDocStatusStorage {
    #[must_use]
    pub fn new(pool: DistributedPool) -> Self {
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

#[async_trait]
impl DocStatusStorage for DistributedDocStatusStorage {
    async fn get(&self, document_id: &str) -> Result<Option<DocStatus>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM doc_status WHERE document_id = $1",
                &[&document_id],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(row.map(|r| {
            let status_raw: String = r.get("processing_status");
            let chunks: i32 = r.get("chunks_count");
            let entities: i32 = r.get("entities_count");
            let relations: i32 = r.get("relations_count");
            DocStatus {
                document_id: r.get("document_id"),
                processing_status: status_from_str(&status_raw),
                counts: DocStatusCounts {
                    chunks: chunks as u32,
                    entities: entities as u32,
                    relations: relations as u32,
                },
                error_message: r.get("error_message"),
                started_at: r.get::<_, DateTime<Utc>>("started_at"),
                completed_at: r.get::<_, Option<DateTime<Utc>>>("completed_at"),
            }
        }))
    }

    async fn put(&self, status: DocStatus) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO doc_status
                   (document_id, processing_status, chunks_count, entities_count, relations_count,
                    error_message, started_at, completed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (document_id) DO UPDATE SET
                     processing_status = EXCLUDED.processing_status,
                     chunks_count = EXCLUDED.chunks_count,
                     entities_count = EXCLUDED.entities_count,
                     relations_count = EXCLUDED.relations_count,
                     error_message = EXCLUDED.error_message,
                     completed_at = EXCLUDED.completed_at",
                &[
                    &status.document_id,
                    &status_str(status.processing_status),
                    &(status.counts.chunks as i32),
                    &(status.counts.entities as i32),
                    &(status.counts.relations as i32),
                    &status.error_message,
                    &status.started_at,
                    &status.completed_at,
                ],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM doc_status WHERE document_id = $1",
                &[&document_id],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }
}
