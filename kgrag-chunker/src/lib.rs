//! Chunker (C3): sliding-window prose chunking and structural code-aware
//! chunking.
//!
//! The prose chunker slides a fixed-size window of whitespace-delimited
//! tokens over the input, defaulting to 1200-token chunks with 100-token
//! overlap. The code chunker shares the same `ChunkingStrategy` trait
//! shape but splits on structural/statement boundaries instead, using
//! `encoding_rs` for BOM/UTF-8/Latin-1 detection on arbitrary source
//! files.

pub mod code;
pub mod prose;

use async_trait::async_trait;
use kgrag_core::error::Result;
use kgrag_core::types::CodeMetadata;

/// A chunk of text produced by any [`ChunkingStrategy`], prior to
/// assignment of a document id or index (the ingestion orchestrator fills
/// those in).
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub content: String,
    pub token_count: usize,
    pub code_metadata: Option<CodeMetadata>,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            overlap: 100,
        }
    }
}

#[async_trait]
pub trait ChunkingStrategy: Send + Sync {
    async fn chunk(&self, text: &str, config: &ChunkingConfig) -> Result<Vec<RawChunk>>;
    fn name(&self) -> &str;
}

/// Whitespace-and-punctuation based token estimate, not model-specific
/// (§4.3): roughly 4 characters per token, a cheap fallback for when no
/// model-specific tokenizer is configured.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count().max(text.len() / 4)
}
