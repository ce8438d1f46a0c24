//! Entity/relation extraction (C5), resolution (C6), and merge (C7).
//!
//! `extraction` is a cache-checked, batched LLM-prompted extractor
//! producing `Entity`/relation candidates, keyed by a content-hash
//! fingerprint so an unchanged chunk never re-prompts the model.
//! `resolution` and `merge` build on top: blocking + pairwise-scoring +
//! union-find clustering to find duplicate entities, then a merge pass
//! that redirects relations and reconciles descriptions.

pub mod extraction;
pub mod merge;
pub mod resolution;

pub mod prelude {
    pub use crate::extraction::{ExtractedEntity, ExtractedRelation, Extractor, LlmExtractor};
    pub use crate::merge::{DescriptionMergeStrategy, MergeReport, MergeService};
    pub use crate::resolution::{EntityResolver, ResolutionConfig, ResolutionReport};
}
