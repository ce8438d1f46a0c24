//! Distributed backend (§4.2, §6): a relational database with a
//! vector-index extension (pgvector), implementing property-graph
//! queries over per-project Postgres schemas (`graph_<hex>`, per
//! `ProjectId::graph_namespace`). A registry table (`project_graphs`)
//! tracks namespace lifecycle; `DROP SCHEMA ... CASCADE` deletes a
//! project's whole graph in one statement, the distributed analogue of
//! deleting the embedded backend's single file (see `schema.rs`).
//! Vectors and KV/cache/doc-status rows live in global tables scoped by
//! a mandatory `project_id` column instead, since those don't need
//! schema-level DDL isolation to get an atomic cascade delete.
//!
//! Connection pooling follows `deadpool_postgres`'s standard
//! `Pool`/`Object` shape; every operation checks out at most one
//! connection per §5's "bounded pool, one connection per operation"
//! resource model.

mod cache;
mod chunks;
mod docstatus;
mod graph;
mod kv;
mod pool;
mod schema;
mod vector;

pub use cache::DistributedExtractionCacheStorage;
pub use chunks::DistributedChunkStorage;
pub use docstatus::DistributedDocStatusStorage;
pub use graph::DistributedGraphStorage;
pub use kv::DistributedKvStorage;
pub use pool::{DistributedPool, DistributedPoolConfig};
pub use vector::DistributedVectorStorage;
