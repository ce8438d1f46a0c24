//! Sliding-window prose chunker (§4.3).

use crate::{estimate_tokens, ChunkingConfig, ChunkingStrategy, RawChunk};
use async_trait::async_trait;
use kgrag_core::error::Result;

/// Slides a fixed-size window of whitespace-delimited tokens over the
/// input, advancing by `chunk_size - overlap` tokens each step. Chunks are
/// emitted in order starting at index 0 (the caller assigns the index);
/// this type only produces the ordered sequence of [`RawChunk`]s.
pub struct SlidingWindowChunker;

impl SlidingWindowChunker {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn token_spans(text: &str) -> Vec<(usize, usize)> {
        text.split_whitespace()
            .map(|tok| {
                let start = tok.as_ptr() as usize - text.as_ptr() as usize;
                (start, start + tok.len())
            })
            .collect()
    }
}

impl Default for SlidingWindowChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkingStrategy for SlidingWindowChunker {
    async fn chunk(&self, text: &str, config: &ChunkingConfig) -> Result<Vec<RawChunk>> {
        let spans = Self::token_spans(text);
        if spans.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = config.chunk_size.max(1);
        let overlap = config.overlap.min(chunk_size.saturating_sub(1));
        let stride = (chunk_size - overlap).max(1);

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < spans.len() {
            let end = (start + chunk_size).min(spans.len());
            let byte_start = spans[start].0;
            let byte_end = spans[end - 1].1;
            let content = text[byte_start..byte_end].to_string();
            let token_count = end - start;

            chunks.push(RawChunk {
                content,
                token_count,
                code_metadata: None,
            });

            if end == spans.len() {
                break;
            }
            start += stride;
        }

        Ok(chunks)
    }

    fn name(&self) -> &str {
        "sliding_window"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_are_ordered_and_cover_input() {
        let chunker = SlidingWindowChunker::new();
        let text = (0..3000).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let config = ChunkingConfig {
            chunk_size: 1200,
            overlap: 100,
        };
        let chunks = chunker.chunk(&text, &config).await.unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.token_count <= 1200));
        assert_eq!(chunks.first().unwrap().content.starts_with('0'), true);
    }

    #[tokio::test]
    async fn empty_text_yields_no_chunks() {
        let chunker = SlidingWindowChunker::new();
        let chunks = chunker.chunk("", &ChunkingConfig::default()).await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn single_short_chunk_when_under_chunk_size() {
        let chunker = SlidingWindowChunker::new();
        let chunks = chunker
            .chunk("just a few words here", &ChunkingConfig::default())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 5);
    }
}
