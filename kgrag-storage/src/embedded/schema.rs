//! Schema for the embedded backend. One file, every table project-scoped
//! by a `project_id TEXT` column (the project's UUID string form).

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS project_graphs (
    project_id TEXT PRIMARY KEY,
    namespace  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    project_id       TEXT NOT NULL,
    normalized_name  TEXT NOT NULL,
    entity_name      TEXT NOT NULL,
    entity_type      TEXT NOT NULL,
    description      TEXT NOT NULL DEFAULT '',
    source_chunk_ids TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (project_id, normalized_name)
);

CREATE TABLE IF NOT EXISTS relations (
    project_id       TEXT NOT NULL,
    normalized_src   TEXT NOT NULL,
    normalized_tgt   TEXT NOT NULL,
    src_id           TEXT NOT NULL,
    tgt_id           TEXT NOT NULL,
    description      TEXT NOT NULL DEFAULT '',
    keywords         TEXT NOT NULL DEFAULT '[]',
    weight           REAL NOT NULL DEFAULT 1.0,
    source_chunk_ids TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (project_id, normalized_src, normalized_tgt)
);

CREATE INDEX IF NOT EXISTS relations_src_idx ON relations (project_id, normalized_src);
CREATE INDEX IF NOT EXISTS relations_tgt_idx ON relations (project_id, normalized_tgt);

CREATE TABLE IF NOT EXISTS vectors (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    owner_type TEXT NOT NULL,
    owner_id   TEXT NOT NULL,
    model      TEXT NOT NULL,
    embedding  BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS vectors_project_idx ON vectors (project_id, owner_type);

CREATE TABLE IF NOT EXISTS chunks (
    id            TEXT PRIMARY KEY,
    document_id   TEXT NOT NULL,
    project_id    TEXT NOT NULL,
    chunk_index   INTEGER NOT NULL,
    content       TEXT NOT NULL,
    token_count   INTEGER NOT NULL,
    code_metadata TEXT,
    UNIQUE (document_id, chunk_index)
);

CREATE TABLE IF NOT EXISTS doc_status (
    document_id       TEXT PRIMARY KEY,
    processing_status TEXT NOT NULL,
    chunks_count      INTEGER NOT NULL DEFAULT 0,
    entities_count    INTEGER NOT NULL DEFAULT 0,
    relations_count   INTEGER NOT NULL DEFAULT 0,
    error_message     TEXT,
    started_at        TEXT NOT NULL,
    completed_at      TEXT
);

CREATE TABLE IF NOT EXISTS extraction_cache (
    project_id   TEXT NOT NULL,
    cache_type   TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    result       TEXT NOT NULL,
    tokens_used  INTEGER NOT NULL,
    PRIMARY KEY (project_id, cache_type, content_hash)
);

CREATE TABLE IF NOT EXISTS kv_store (
    project_id TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    PRIMARY KEY (project_id, key)
);
"#;
