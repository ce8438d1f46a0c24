//! Core domain types, storage traits, and error taxonomy shared by every
//! crate in the knowledge-graph RAG workspace.
//!
//! Nothing in this crate talks to a network, a filesystem, or an LLM —
//! it only defines the shapes other crates agree on.

pub mod error;
pub mod ids;
pub mod traits;
pub mod types;

pub mod prelude {
    pub use crate::error::{ErrorKind, KgError, Result};
    pub use crate::ids::ProjectId;
    pub use crate::traits::storage::{
        DocStatusStorage, ExtractionCacheStorage, GraphStorage, KvStorage, VectorStorage,
    };
    pub use crate::types::*;
}
