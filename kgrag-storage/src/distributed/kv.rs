use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::KvStorage;
use serde_json::Value;

use super::pool::DistributedPool;

pub struct DistributedKvStorage {
    pool: DistributedPool,
}

impl DistributedKvStorage {
    #[must_use]
    pub fn new(pool: DistributedPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStorage for DistributedKvStorage {
    async fn get(&self, project_id: ProjectId, key: &str) -> Result<Option<Value>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT value FROM kv_store WHERE project_id = $1 AND key = $2",
                &[&project_id.as_uuid(), &key],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put(&self, project_id: ProjectId, key: &str, value: Value) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO kv_store (project_id, key, value) VALUES ($1, $2, $3)
                 ON CONFLICT (project_id, key) DO UPDATE SET value = EXCLUDED.value",
                &[&project_id.as_uuid(), &key, &value],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, project_id: ProjectId, key: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM kv_store WHERE project_id = $1 AND key = $2",
                &[&project_id.as_uuid(), &key],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }
}
