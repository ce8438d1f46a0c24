//! Central configuration management for the knowledge-graph RAG core.
//!
//! One top-level `Deserialize` struct composed of per-concern
//! sub-structs, loaded from TOML with environment-variable overrides
//! layered on top via the `config` crate, followed by an explicit
//! `validate()` pass that checks each section and fails on the first
//! hard error.

pub mod validation;

use kgrag_graph::resolution::{ResolutionConfig, SimilarityWeights};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to layer environment overrides: {0}")]
    Layer(#[from] config::ConfigError),

    #[error("invalid configuration field {field}: {message}")]
    Validation { field: String, message: String },
}

/// `storage.backend` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    #[default]
    Distributed,
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Distributed backend: Postgres connection string.
    pub connection_string: Option<String>,
    /// Embedded backend: single-file database path.
    pub file_path: Option<String>,
    /// Batch size for `getEntities`/similar batched lookups (§4.2).
    pub entity_batch_size: usize,
    /// Batch size for `getNodeDegreesBatch` (§4.2).
    pub degree_batch_size: usize,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            connection_string: None,
            file_path: None,
            entity_batch_size: 1000,
            degree_batch_size: 500,
            busy_timeout_ms: 30_000,
        }
    }
}

/// `chunk.size` / `chunk.overlap` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: 1200,
            overlap: 100,
        }
    }
}

/// `query.topK` / `query.chunkTopK` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub top_k: usize,
    pub chunk_top_k: usize,
    /// MIX mode BFS node cap (§4.9), default 50.
    pub mix_bfs_max_nodes: usize,
    pub mix_bfs_max_depth: usize,
    pub whole_query_timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            chunk_top_k: 5,
            mix_bfs_max_nodes: 50,
            mix_bfs_max_depth: 2,
            whole_query_timeout_ms: 120_000,
        }
    }
}

/// `embedding.batch.size` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub batch_size: usize,
    pub dimension: usize,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            dimension: 1536,
            timeout_ms: 30_000,
        }
    }
}

/// `kg.extraction.batch.size` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub batch_size: usize,
    pub known_entity_types: Vec<String>,
    pub llm_timeout_ms: u64,
    /// Fraction of chunks that must extract successfully for the document
    /// to be marked PROCESSED rather than FAILED (§4.5, §7).
    pub min_success_ratio: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            known_entity_types: vec![
                "PERSON".to_string(),
                "ORG".to_string(),
                "LOCATION".to_string(),
                "CONCEPT".to_string(),
                "EVENT".to_string(),
                "PRODUCT".to_string(),
            ],
            llm_timeout_ms: 60_000,
            min_success_ratio: 0.5,
        }
    }
}

/// `entity.resolution.*` (§6, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityResolutionConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub weight_jaccard: f64,
    pub weight_containment: f64,
    pub weight_edit: f64,
    pub weight_acronym: f64,
    pub max_aliases: usize,
    pub parallel_threads: usize,
    pub batch_size: usize,
}

impl Default for EntityResolutionConfig {
    fn default() -> Self {
        let w = SimilarityWeights::default();
        Self {
            enabled: true,
            threshold: 0.75,
            weight_jaccard: w.jaccard,
            weight_containment: w.containment,
            weight_edit: w.edit,
            weight_acronym: w.acronym,
            max_aliases: 5,
            parallel_threads: 4,
            batch_size: 200,
        }
    }
}

impl EntityResolutionConfig {
    #[must_use]
    pub fn to_resolution_config(&self) -> ResolutionConfig {
        ResolutionConfig {
            enabled: self.enabled,
            threshold: self.threshold,
            weights: SimilarityWeights {
                jaccard: self.weight_jaccard,
                containment: self.weight_containment,
                edit: self.weight_edit,
                acronym: self.weight_acronym,
            },
            max_aliases: self.max_aliases,
            parallel_threads: self.parallel_threads,
            batch_size: self.batch_size,
        }
    }
}

/// `retry.*` (§6, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigSection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
    pub max_duration_ms: u64,
}

impl Default for RetryConfigSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
            max_duration_ms: 30_000,
        }
    }
}

impl RetryConfigSection {
    #[must_use]
    pub fn to_retry_config(&self) -> kgrag_resilience::RetryConfig {
        kgrag_resilience::RetryConfig {
            max_attempts: self.max_attempts,
            backoff: kgrag_resilience::BackoffStrategy::Exponential {
                base: std::time::Duration::from_millis(self.initial_delay_ms),
                multiplier: self.backoff_multiplier,
                max: std::time::Duration::from_millis(self.max_duration_ms),
            },
            jitter: kgrag_resilience::JitterStrategy::Uniform(std::time::Duration::from_millis(
                self.jitter_ms,
            )),
            max_duration: std::time::Duration::from_millis(self.max_duration_ms),
        }
    }
}

/// `reranker.{provider,minScore,timeoutMs}` (§6, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RerankerProvider {
    #[default]
    None,
    ExternalA,
    ExternalB,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub provider: RerankerProvider,
    pub min_score: f32,
    pub timeout_ms: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: RerankerProvider::default(),
            min_score: 0.1,
            timeout_ms: 2000,
        }
    }
}

/// `vector.index.*` (§6, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexType {
    #[default]
    Hnsw,
    IvfFlat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub index_type: VectorIndexType,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub ivf_flat_lists: usize,
    pub dimension: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            index_type: VectorIndexType::default(),
            hnsw_m: 16,
            hnsw_ef_construction: 64,
            ivf_flat_lists: 100,
            dimension: 1536,
        }
    }
}

/// Top-level configuration, composed of the per-concern sections above.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KgRagConfig {
    pub storage: StorageConfig,
    pub chunk: ChunkConfig,
    pub query: QueryConfig,
    pub embedding: EmbeddingConfig,
    pub kg_extraction: ExtractionConfig,
    pub entity_resolution: EntityResolutionConfig,
    pub retry: RetryConfigSection,
    pub reranker: RerankerConfig,
    pub vector_index: VectorIndexConfig,
}

impl KgRagConfig {
    /// Parses TOML content, layers `KGRAG_*` environment variable
    /// overrides on top (e.g. `KGRAG_STORAGE__BACKEND=embedded`), then
    /// validates.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let base: toml::Value = toml::from_str(content)?;

        let layered = config::Config::builder()
            .add_source(config::File::from_str(
                &toml::to_string(&base).unwrap_or_default(),
                config::FileFormat::Toml,
            ))
            .add_source(
                config::Environment::with_prefix("KGRAG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = layered.try_deserialize()?;
        validation::validate_config(&config).map_err(|e| ConfigError::Validation {
            field: e.field,
            message: e.message,
        })?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = KgRagConfig::default();
        assert_eq!(config.chunk.size, 1200);
        assert_eq!(config.chunk.overlap, 100);
        assert_eq!(config.query.top_k, 10);
        assert_eq!(config.query.chunk_top_k, 5);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.kg_extraction.batch_size, 20);
        assert_eq!(config.entity_resolution.threshold, 0.75);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.reranker.min_score, 0.1);
        assert_eq!(config.vector_index.hnsw_m, 16);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = KgRagConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = KgRagConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.chunk.size, config.chunk.size);
    }

    #[test]
    fn bad_resolution_weights_fail_validation() {
        let mut config = KgRagConfig::default();
        config.entity_resolution.weight_jaccard = 0.9;
        let toml_str = toml::to_string(&config).unwrap();
        assert!(KgRagConfig::from_toml(&toml_str).is_err());
    }

    #[test]
    fn env_override_applies_on_top_of_toml() {
        std::env::set_var("KGRAG_CHUNK__SIZE", "2000");
        let config = KgRagConfig::from_toml("").unwrap();
        assert_eq!(config.chunk.size, 2000);
        std::env::remove_var("KGRAG_CHUNK__SIZE");
    }
}
