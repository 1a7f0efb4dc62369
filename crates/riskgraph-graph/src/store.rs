//! The seam between the ingest pipeline and a concrete graph store.
//!
//! `GraphClient` (Neo4j) and `MemoryStore` both implement these traits; the
//! writer and the batch executor only ever see `GraphTxn`.

use async_trait::async_trait;

use riskgraph_core::{EdgeUpsert, EntityType, NodeKey, NodeUpsert};

/// Errors from the store, split by whether a retry can help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable, credentials rejected, or pool broken. Fatal.
    #[error("Graph store connection error: {0}")]
    Connection(String),

    /// Conflict, timeout, or transient server error. Retried per batch.
    #[error("Graph store transaction error: {0}")]
    Transaction(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// A graph store that hands out transactions.
#[async_trait]
pub trait GraphStore: Send + Sync {
    type Txn: GraphTxn;

    /// Begin a write transaction.
    async fn begin(&self) -> Result<Self::Txn, StoreError>;

    /// Cheap round-trip used to verify the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Ensure a uniqueness constraint on `key` for every entity label.
    async fn ensure_constraints(&self, entities: &[EntityType]) -> Result<(), StoreError>;
}

/// An open write transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait GraphTxn: Send {
    async fn node_exists(&mut self, key: &NodeKey) -> Result<bool, StoreError>;

    /// Find-or-create by `(label, key)`, replacing the property set.
    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<(), StoreError>;

    /// Find-or-create by `(from, to, rel_type)`, replacing the property set.
    /// Both endpoints must exist.
    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
