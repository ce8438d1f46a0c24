//! Backend-agnostic helpers shared by the distributed and embedded
//! storage implementations: the BFS walk itself (§4.2 `traverseBFS`) and
//! in-memory cosine similarity (§4.2, used directly by the embedded
//! backend and as a recall cross-check for the distributed backend's
//! approximate index).

pub mod bfs;
pub mod similarity;

pub use bfs::run_bfs;
pub use similarity::cosine_similarity;
