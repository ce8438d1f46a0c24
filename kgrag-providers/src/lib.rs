//! Embedding + LLM adapters (C4): uniform capability interfaces over
//! external providers, batching, and token accounting.
//!
//! Two `async_trait` capabilities, `LLMCapability` and
//! `EmbeddingCapability`, each `Result<_, KgError>`-returning so any
//! concrete provider adapter can be swapped in behind the same surface.

pub mod capability;
pub mod config;
pub mod http;
pub mod token_tracker;

pub use capability::{ChatMessage, EmbeddingCapability, LLMCapability, LLMOptions, LLMOutput};
pub use config::ProviderConfig;
pub use token_tracker::{TokenTracker, TokenUsage};
