use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::traits::storage::KvStorage;
use serde_json::Value;

use super::pool::EmbeddedPool;

pub struct EmbeddedKvStorage {
    pool: EmbeddedPool,
}

impl EmbeddedKvStorage {
    #[must_use]
    pub fn new(pool: EmbeddedPool) -> Self {
        Self { pool }
    }
}

fn map_sql_err(e: libsql::Error) -> KgError {
    KgError::storage(ErrorKind::TransientStorage, e.to_string())
}

#[async_trait]
impl KvStorage for EmbeddedKvStorage {
    async fn get(&self, project_id: ProjectId, key: &str) -> Result<Option<Value>> {
        let conn = self.pool.lock().await;
        let mut rows = conn
            .query(
                "SELECT value FROM kv_store WHERE project_id = ?1 AND key = ?2",
                libsql::params![project_id.to_string(), key.to_string()],
            )
            .await
            .map_err(map_sql_err)?;
        let Some(row) = rows.next().await.map_err(map_sql_err)? else {
            return Ok(None);
        };
        let raw: String = row.get(0).map_err(map_sql_err)?;
        let value = serde_json::from_str(&raw)
            .map_err(|e| KgError::storage(ErrorKind::Internal, format!("corrupt kv value: {e}")))?;
        Ok(Some(value))
    }

    async fn put(&self, project_id: ProjectId, key: &str, value: Value) -> Result<()> {
        let conn = self.pool.lock().await;
        let raw = serde_json::to_string(&value)
            .map_err(|e| KgError::storage(ErrorKind::Internal, e.to_string()))?;
        conn.execute(
            "INSERT INTO kv_store (project_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (project_id, key) DO UPDATE SET value = excluded.value",
            libsql::params![project_id.to_string(), key.to_string(), raw],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn delete(&self, project_id: ProjectId, key: &str) -> Result<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "DELETE FROM kv_store WHERE project_id = ?1 AND key = ?2",
            libsql::params![project_id.to_string(), key.to_string()],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::pool::EmbeddedPoolConfig;

    async fn open_pool() -> EmbeddedPool {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddedPoolConfig {
            path: dir.path().join("kv.db"),
            ..Default::default()
        };
        let pool = EmbeddedPool::open(&config).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = EmbeddedKvStorage::new(open_pool().await);
        let project = ProjectId::new();
        storage.put(project, "cursor", serde_json::json!({"n": 3})).await.unwrap();
        let value = storage.get(project, "cursor").await.unwrap().unwrap();
        assert_eq!(value["n"], 3);
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let storage = EmbeddedKvStorage::new(open_pool().await);
        assert!(storage.get(ProjectId::new(), "missing").await.unwrap().is_none());
    }
}
