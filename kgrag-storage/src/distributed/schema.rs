//! Embedded migrations for the global tables, plus the per-project graph
//! namespace DDL. A project's `entities`/`relations` tables live in their
//! own Postgres schema (named by [`kgrag_core::ids::ProjectId::graph_namespace`])
//! so that `DROP SCHEMA ... CASCADE` is a single statement for the whole
//! project's graph — the distributed analogue of deleting the embedded
//! backend's single file.

use kgrag_core::error::{ErrorKind, KgError, Result};

pub mod migrations {
    refinery::embed_migrations!("src/distributed/migrations");
}

/// `graph_namespace()` is `graph_<12 lowercase hex chars>` — always a safe
/// SQL identifier, but this guard exists so a future change to that format
/// can't accidentally open an injection vector through interpolated DDL.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let is_safe = namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !is_safe || namespace.is_empty() {
        return Err(KgError::storage(
            ErrorKind::Internal,
            format!("unsafe graph namespace: {namespace}"),
        ));
    }
    Ok(())
}

pub fn create_schema_ddl(namespace: &str) -> String {
    format!(
        r#"
        CREATE SCHEMA IF NOT EXISTS "{ns}";

        CREATE TABLE IF NOT EXISTS "{ns}".entities (
            normalized_name TEXT PRIMARY KEY,
            entity_name     TEXT NOT NULL,
            entity_type     TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            source_chunk_ids TEXT[] NOT NULL DEFAULT '{{}}'
        );

        CREATE TABLE IF NOT EXISTS "{ns}".relations (
            normalized_src  TEXT NOT NULL,
            normalized_tgt  TEXT NOT NULL,
            src_id          TEXT NOT NULL,
            tgt_id          TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            keywords        TEXT[] NOT NULL DEFAULT '{{}}',
            weight          REAL NOT NULL DEFAULT 1.0,
            source_chunk_ids TEXT[] NOT NULL DEFAULT '{{}}',
            PRIMARY KEY (normalized_src, normalized_tgt)
        );

        CREATE INDEX IF NOT EXISTS entities_name_idx ON "{ns}".entities (entity_name);
        CREATE INDEX IF NOT EXISTS relations_src_idx ON "{ns}".relations (normalized_src);
        CREATE INDEX IF NOT EXISTS relations_tgt_idx ON "{ns}".relations (normalized_tgt);
        "#,
        ns = namespace
    )
}

pub fn drop_schema_ddl(namespace: &str) -> String {
    format!(r#"DROP SCHEMA IF EXISTS "{namespace}" CASCADE;"#)
}
