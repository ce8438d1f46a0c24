//! Single-file embedded backend (§4.2, §6): one libsql database, WAL
//! journal mode, a busy timeout so concurrent readers don't immediately
//! fail against the single writer. Project isolation is a `project_id`
//! column on every table rather than one file per project — the same
//! choice the distributed backend makes for its registry table, kept
//! consistent so callers can't tell backends apart by isolation shape.

use kgrag_core::error::{ErrorKind, KgError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct EmbeddedPoolConfig {
    pub path: std::path::PathBuf,
    pub busy_timeout_ms: u32,
}

impl Default for EmbeddedPoolConfig {
    fn default() -> Self {
        Self {
            path: std::path::PathBuf::from("kgrag.db"),
            busy_timeout_ms: 5000,
        }
    }
}

/// A single shared connection guarded by an async mutex. libsql's own
/// writer serialization would reject concurrent writers anyway; the mutex
/// just turns that rejection into a wait instead of an error, matching
/// §5's "embedded backend, single in-process writer" resource model.
#[derive(Clone)]
pub struct EmbeddedPool {
    // Kept alive for as long as `conn` borrows from it; never read directly.
    #[allow(dead_code)]
    db: Arc<libsql::Database>,
    conn: Arc<Mutex<libsql::Connection>>,
}

impl EmbeddedPool {
    pub async fn open(config: &EmbeddedPoolConfig) -> Result<Self> {
        let db = libsql::Builder::new_local(&config.path)
            .build()
            .await
            .map_err(|e| {
                KgError::storage(ErrorKind::PermanentStorage, format!("open db file: {e}"))
            })?;
        let conn = db.connect().map_err(|e| {
            KgError::storage(ErrorKind::PermanentStorage, format!("connect: {e}"))
        })?;
        conn.execute("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| KgError::storage(ErrorKind::PermanentStorage, e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_millis(
            u64::from(config.busy_timeout_ms),
        ))
        .map_err(|e| KgError::storage(ErrorKind::PermanentStorage, e.to_string()))?;

        let pool = Self {
            db: Arc::new(db),
            conn: Arc::new(Mutex::new(conn)),
        };
        pool.run_migrations().await?;
        Ok(pool)
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, libsql::Connection> {
        self.conn.lock().await
    }

    async fn run_migrations(&self) -> Result<()> {
        let conn = self.lock().await;
        conn.execute_batch(super::schema::DDL)
            .await
            .map_err(|e| {
                KgError::storage(ErrorKind::PermanentStorage, format!("migrate: {e}"))
            })?;
        Ok(())
    }
}
