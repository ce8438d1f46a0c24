//! Prompted LLM extraction per chunk (§4.5): a cache-checked, batched
//! extractor that calls out to an LLM instead of pattern-matching.
//! Caching is keyed by the fingerprint in
//! [`crate::extraction::fingerprint`]; retries go through
//! `kgrag_resilience::with_retry`.

use super::{ExtractedEntity, ExtractedRelation, ExtractionResult, Extractor};
use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::ProjectId;
use kgrag_core::prelude::ExtractionCacheStorage;
use kgrag_core::types::{ExtractionCacheEntry, ExtractionCacheType};
use kgrag_providers::capability::LLMCapability;
use kgrag_providers::token_tracker::TokenTracker;
use kgrag_observability::EventContext;
use kgrag_resilience::{with_retry, RetryConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Default prompt template. `{SOURCE_TYPE}`, `{LANGUAGE}`, and
/// `{SOURCE_TYPE_ARTICLE}` are substituted per-call (§9 design notes);
/// treated as configuration, not code.
pub const DEFAULT_PROMPT_TEMPLATE: &str = include_str!("prompt_template.txt");

/// Wire shape the LLM is instructed to return: a JSON object with
/// `entities` and `relations` arrays.
#[derive(Debug, Deserialize)]
struct LlmExtractionPayload {
    #[serde(default)]
    entities: Vec<LlmEntity>,
    #[serde(default)]
    relations: Vec<LlmRelation>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct LlmEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    description: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct LlmRelation {
    src: String,
    tgt: String,
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default = "default_weight")]
    weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// Cached serialization of an [`ExtractionResult`] (minus `tokens_used`,
/// which is not re-derived from cache — token accounting only reflects
/// real LLM calls).
#[derive(Debug, Serialize, Deserialize)]
struct CachedResult {
    entities: Vec<ExtractedEntity>,
    relations: Vec<ExtractedRelation>,
}

pub struct LlmExtractor {
    llm: Arc<dyn LLMCapability>,
    cache: Arc<dyn ExtractionCacheStorage>,
    tokens: TokenTracker,
    known_types: Vec<String>,
    prompt_template: String,
    retry_config: RetryConfig,
}

impl LlmExtractor {
    #[must_use]
    pub fn new(
        llm: Arc<dyn LLMCapability>,
        cache: Arc<dyn ExtractionCacheStorage>,
        tokens: TokenTracker,
        known_types: Vec<String>,
    ) -> Self {
        Self {
            llm,
            cache,
            tokens,
            known_types,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            retry_config: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    fn render_prompt(&self, language: Option<&str>) -> String {
        let source_type = language.unwrap_or("document");
        let article = if matches!(source_type.chars().next(), Some('a' | 'e' | 'i' | 'o' | 'u')) {
            "an"
        } else {
            "a"
        };
        self.prompt_template
            .replace("{SOURCE_TYPE}", source_type)
            .replace("{SOURCE_TYPE_ARTICLE}", article)
            .replace("{LANGUAGE}", language.unwrap_or(""))
    }

    fn parse_payload(&self, raw: &str) -> Result<LlmExtractionPayload> {
        let trimmed = raw.trim();
        let json_slice = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed)
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(json_slice).map_err(|e| {
            KgError::provider(
                ErrorKind::PermanentProvider,
                "llm-extractor",
                format!("failed to parse extraction JSON: {e}"),
            )
        })
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        project_id: ProjectId,
        chunk_content: &str,
        language: Option<&str>,
    ) -> Result<ExtractionResult> {
        let fingerprint = super::fingerprint::fingerprint(
            &self.prompt_template,
            &self.known_types,
            language,
            chunk_content,
        );

        if let Some(entry) = self
            .cache
            .get(project_id, ExtractionCacheType::EntityExtraction, &fingerprint)
            .await?
        {
            kgrag_observability::extract_cache_hit(
                &EventContext::new("extraction.cache").with_project(project_id),
                &fingerprint,
            );
            let cached: CachedResult = serde_json::from_value(entry.result).map_err(|e| {
                KgError::Internal {
                    message: format!("corrupt extraction cache entry: {e}"),
                }
            })?;
            return Ok(ExtractionResult {
                entities: cached.entities,
                relations: cached.relations,
                tokens_used: 0,
            });
        }

        kgrag_observability::extract_cache_miss(
            &EventContext::new("extraction.cache").with_project(project_id),
            &fingerprint,
        );
        let system_prompt = self.render_prompt(language);
        let llm = self.llm.clone();
        let user_prompt = chunk_content.to_string();
        let retry_config = self.retry_config.clone();

        let (output, _outcome) = with_retry(&retry_config, "extraction.llm_call", move |_attempt| {
            let llm = llm.clone();
            let system_prompt = system_prompt.clone();
            let user_prompt = user_prompt.clone();
            async move {
                llm.complete(&system_prompt, &user_prompt, &Default::default())
                    .await
            }
        })
        .await?;

        self.tokens
            .record("EXTRACTION", output.prompt_tokens, output.completion_tokens);

        let payload = self.parse_payload(&output.text)?;

        let known: std::collections::HashSet<&str> =
            self.known_types.iter().map(String::as_str).collect();

        let entities: Vec<ExtractedEntity> = payload
            .entities
            .into_iter()
            .map(|e| {
                let type_is_known = known.contains(e.entity_type.as_str());
                if !type_is_known {
                    warn!(entity_type = %e.entity_type, "extraction returned unknown entity type, keeping verbatim");
                }
                ExtractedEntity {
                    name: e.name,
                    entity_type: e.entity_type,
                    description: e.description,
                    type_is_known,
                }
            })
            .collect();

        let relations: Vec<ExtractedRelation> = payload
            .relations
            .into_iter()
            .filter(|r| {
                kgrag_core::ids::normalize_entity_name(&r.src)
                    != kgrag_core::ids::normalize_entity_name(&r.tgt)
            })
            .map(|r| ExtractedRelation {
                src: r.src,
                tgt: r.tgt,
                description: r.description,
                keywords: r.keywords,
                weight: r.weight,
            })
            .collect();

        let cached = CachedResult {
            entities: entities.clone(),
            relations: relations.clone(),
        };
        self.cache
            .put(ExtractionCacheEntry {
                project_id,
                cache_type: ExtractionCacheType::EntityExtraction,
                content_hash: fingerprint,
                result: serde_json::to_value(&cached).map_err(|e| KgError::Internal {
                    message: e.to_string(),
                })?,
                tokens_used: output.prompt_tokens + output.completion_tokens,
            })
            .await?;

        Ok(ExtractionResult {
            entities,
            relations,
            tokens_used: output.prompt_tokens + output.completion_tokens,
        })
    }
}
