//! Error taxonomy for the knowledge-graph RAG core.
//!
//! One `thiserror` enum per crate boundary (message + optional `source`),
//! plus an explicit [`ErrorKind`] so the resilience layer
//! (`kgrag-resilience`) can classify failures without string-matching.

use thiserror::Error;

/// Coarse classification used by the retry/circuit-breaker layer.
///
/// Mirrors the classifier table in the storage/provider error design:
/// transient classes retry, permanent classes do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection, pool exhaustion, deadlock, resource contention.
    TransientStorage,
    /// Integrity constraint, authn failure, syntax/access, invalid argument.
    PermanentStorage,
    /// LLM/embedding/rerank 5xx or timeout.
    TransientProvider,
    /// LLM/embedding/rerank 4xx (bad request, missing credentials).
    PermanentProvider,
    /// Chunker rejected the input (e.g. binary content).
    InvalidInput,
    /// Entity merge precondition failed (missing source, validation).
    MergeValidation,
    /// The referenced entity/relation/project/document does not exist.
    NotFound,
    /// Anything not otherwise classified.
    Internal,
}

impl ErrorKind {
    /// Whether the resilience layer should retry an error of this kind.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientStorage | Self::TransientProvider)
    }
}

/// Top-level error type returned by every public operation in the workspace.
#[derive(Debug, Error)]
pub enum KgError {
    #[error("storage error ({kind:?}): {message}")]
    Storage {
        kind: ErrorKind,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("provider error ({kind:?}) from {provider}: {message}")]
    Provider {
        kind: ErrorKind,
        provider: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("chunking rejected input: {message}")]
    Chunking { message: String },

    #[error("merge validation failed: {message}")]
    MergeValidation { message: String },

    #[error("entity resolution configuration invalid: {message}")]
    ResolutionConfig { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl KgError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { kind, .. } | Self::Provider { kind, .. } => *kind,
            Self::Chunking { .. } => ErrorKind::InvalidInput,
            Self::MergeValidation { .. } => ErrorKind::MergeValidation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ResolutionConfig { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                ErrorKind::Internal
            }
            Self::Timeout { .. } => ErrorKind::TransientProvider,
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn storage(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Storage {
            kind,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn provider(kind: ErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }
}

/// Convenience result alias used across the workspace.
pub type Result<T> = std::result::Result<T, KgError>;
