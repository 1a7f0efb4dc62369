//! Idempotent application of a `MutationDescriptor` inside a transaction.

use riskgraph_core::{MutationDescriptor, RecordError};

use crate::store::{GraphTxn, StoreError};

/// What one descriptor wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub nodes: u64,
    pub edges: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    /// The descriptor was refused and nothing of it was written. The
    /// transaction remains usable for the rest of the batch.
    #[error(transparent)]
    Rejected(RecordError),

    /// The store failed; the transaction must be rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Merge one descriptor's nodes and edges.
///
/// External references (edge endpoints the descriptor does not create) are
/// checked first, so a dangling reference leaves no orphan node or edge behind.
pub async fn apply<T: GraphTxn>(
    txn: &mut T,
    descriptor: &MutationDescriptor,
) -> Result<ApplyStats, ApplyError> {
    for key in descriptor.external_refs() {
        if !txn.node_exists(key).await? {
            return Err(ApplyError::Rejected(RecordError::DanglingReference {
                key: key.clone(),
            }));
        }
    }

    let mut stats = ApplyStats::default();
    for node in &descriptor.nodes {
        txn.merge_node(node).await?;
        stats.nodes += 1;
    }
    for edge in &descriptor.edges {
        txn.merge_edge(edge).await?;
        stats.edges += 1;
    }
    Ok(stats)
}
