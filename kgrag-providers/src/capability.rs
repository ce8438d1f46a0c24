//! `LLMCapability` / `EmbeddingCapability` (§4.4): uniform interfaces any
//! concrete provider adapter implements. Both must be safe for concurrent
//! invocation — implementations hold no mutable state beyond an inner
//! `reqwest::Client`, which is itself `Clone + Send + Sync`.

use async_trait::async_trait;
use kgrag_core::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct LLMOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LLMOutput {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub model: String,
}

/// Estimates token count as `chars / 4` when a provider does not report
/// usage, per §4.4.
#[must_use]
pub fn estimate_token_count(text: &str) -> u32 {
    (text.len() as u32 / 4).max(1)
}

/// Non-streaming LLM completion. Implementations must tolerate concurrent
/// calls from many extraction/query tasks at once.
#[async_trait]
pub trait LLMCapability: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &LLMOptions,
    ) -> Result<LLMOutput>;

    async fn chat(&self, messages: &[ChatMessage], options: &LLMOptions) -> Result<LLMOutput>;

    fn model(&self) -> &str;
}

/// Batched embedding generation. Batch size is bounded by the caller
/// (`embedding.batch.size`, default 32); this trait does not itself split
/// batches.
#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<(Vec<Vec<f32>>, u32)>;

    fn dimension(&self) -> usize;

    fn model(&self) -> &str;
}
