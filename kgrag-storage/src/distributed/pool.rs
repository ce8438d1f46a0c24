//! Connection pool setup (deadpool_postgres over tokio_postgres, no TLS
//! by default — the deployment is expected to terminate TLS at a
//! sidecar/proxy in front of the database, the same plain-transport
//! stance the HTTP provider adapter takes).

use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use kgrag_core::error::{ErrorKind, KgError, Result};
use tokio_postgres::NoTls;

#[derive(Debug, Clone)]
pub struct DistributedPoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub max_size: usize,
}

impl Default for DistributedPoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "kgrag".to_string(),
            password: String::new(),
            dbname: "kgrag".to_string(),
            max_size: 16,
        }
    }
}

/// Thin wrapper so every backend module depends on `DistributedPool`
/// rather than threading `deadpool_postgres::Pool` through signatures
/// directly.
#[derive(Clone)]
pub struct DistributedPool {
    pub(crate) pool: Pool,
}

impl DistributedPool {
    pub fn connect(config: &DistributedPoolConfig) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.dbname.clone());
        cfg.manager = Some(deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_size));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            KgError::storage(
                ErrorKind::PermanentStorage,
                format!("failed to build postgres pool: {e}"),
            )
        })?;
        Ok(Self { pool })
    }

    /// Checks out one pooled connection. §5's "bounded pool, one connection
    /// per operation" resource model: callers never hold two at once.
    pub async fn get(&self) -> Result<deadpool_postgres::Client> {
        self.pool.get().await.map_err(|e| {
            KgError::storage(
                ErrorKind::TransientStorage,
                format!("pool exhausted or connection failed: {e}"),
            )
        })
    }

    /// Runs the embedded migrations against the global (non-project-scoped)
    /// tables: `vectors`, `chunks`, `doc_status`, `extraction_cache`,
    /// `kv_store`, `project_graphs`.
    pub async fn run_migrations(&self) -> Result<()> {
        let mut client = self.get().await?;
        super::schema::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| {
                KgError::storage(
                    ErrorKind::PermanentStorage,
                    format!("migration failed: {e}"),
                )
            })?;
        Ok(())
    }
}
