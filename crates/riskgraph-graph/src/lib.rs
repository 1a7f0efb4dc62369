//! riskgraph-graph: graph store access for the risk graph.
//!
//! This crate is the single mutation point for the graph. The ingest pipeline
//! only sees the `GraphStore` / `GraphTxn` traits, the scoped
//! `ConnectionManager`, and the idempotent `writer::apply`.

pub mod client;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod session;
pub mod store;
pub mod writer;

pub use client::{GraphClient, GraphConfig};
pub use memory::MemoryStore;
pub use session::{ConnectionManager, Session};
pub use store::{GraphStore, GraphTxn, StoreError};
pub use writer::{apply, ApplyError, ApplyStats};
