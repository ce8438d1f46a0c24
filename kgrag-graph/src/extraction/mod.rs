//! Entity/relation extraction (C5).

mod fingerprint;
mod llm;

pub use fingerprint::fingerprint;
pub use llm::LlmExtractor;

use async_trait::async_trait;
use kgrag_core::error::Result;
use serde::{Deserialize, Serialize};

/// Raw entity candidate returned by extraction, prior to resolution.
/// Unknown types are retained verbatim but flagged via `type_is_known`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub type_is_known: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub src: String,
    pub tgt: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
    pub tokens_used: u32,
}

/// One extraction call per chunk: cache lookup by fingerprint, LLM call
/// on miss, cache write on miss. Implementations own their own cache
/// storage and known-type list.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        project_id: kgrag_core::ids::ProjectId,
        chunk_content: &str,
        language: Option<&str>,
    ) -> Result<ExtractionResult>;
}
