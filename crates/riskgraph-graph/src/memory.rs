//! In-process graph store with the same merge semantics as the Neo4j backend.
//!
//! Writes are staged in the transaction and applied atomically on commit.
//! Used for dry runs and by the pipeline tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use riskgraph_core::{EdgeUpsert, EntityType, NodeKey, NodeUpsert, Properties, RelType};

use crate::store::{GraphStore, GraphTxn, StoreError};

type EdgeId = (NodeKey, NodeKey, RelType);

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeKey, Properties>,
    edges: BTreeMap<EdgeId, Properties>,
    constraints: BTreeSet<EntityType>,
    commits: usize,
}

impl GraphState {
    fn apply(&mut self, op: Op) {
        match op {
            Op::Node(node) => {
                self.nodes.insert(node.key, node.properties);
            }
            Op::Edge(edge) => {
                if self.nodes.contains_key(&edge.from) && self.nodes.contains_key(&edge.to) {
                    self.edges
                        .insert((edge.from, edge.to, edge.rel_type), edge.properties);
                }
            }
        }
    }
}

#[derive(Debug)]
enum Op {
    Node(NodeUpsert),
    Edge(EdgeUpsert),
}

/// Shared in-memory graph. Clone is cheap (inner Arc).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<GraphState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn node_count_for(&self, entity: EntityType) -> usize {
        self.lock().nodes.keys().filter(|k| k.entity == entity).count()
    }

    pub fn edge_count(&self) -> usize {
        self.lock().edges.len()
    }

    pub fn edge_count_for(&self, rel_type: RelType) -> usize {
        self.lock()
            .edges
            .keys()
            .filter(|(_, _, rel)| *rel == rel_type)
            .count()
    }

    /// Properties of a committed node.
    pub fn node(&self, key: &NodeKey) -> Option<Properties> {
        self.lock().nodes.get(key).cloned()
    }

    pub fn has_edge(&self, from: &NodeKey, to: &NodeKey, rel_type: RelType) -> bool {
        self.lock()
            .edges
            .contains_key(&(from.clone(), to.clone(), rel_type))
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn has_constraint(&self, entity: EntityType) -> bool {
        self.lock().constraints.contains(&entity)
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn, StoreError> {
        Ok(MemoryTxn {
            store: self.clone(),
            staged: Vec::new(),
            staged_nodes: BTreeSet::new(),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_constraints(&self, entities: &[EntityType]) -> Result<(), StoreError> {
        self.lock().constraints.extend(entities.iter().copied());
        Ok(())
    }
}

/// Staged writes against a `MemoryStore`.
#[derive(Debug)]
pub struct MemoryTxn {
    store: MemoryStore,
    staged: Vec<Op>,
    staged_nodes: BTreeSet<NodeKey>,
}

impl MemoryTxn {
    fn sees(&self, key: &NodeKey) -> bool {
        self.staged_nodes.contains(key) || self.store.lock().nodes.contains_key(key)
    }
}

#[async_trait]
impl GraphTxn for MemoryTxn {
    async fn node_exists(&mut self, key: &NodeKey) -> Result<bool, StoreError> {
        Ok(self.sees(key))
    }

    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<(), StoreError> {
        self.staged_nodes.insert(node.key.clone());
        self.staged.push(Op::Node(node.clone()));
        Ok(())
    }

    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<(), StoreError> {
        // Same as a Cypher MATCH on a missing endpoint: nothing is written.
        if self.sees(&edge.from) && self.sees(&edge.to) {
            self.staged.push(Op::Edge(edge.clone()));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.store.lock();
        for op in self.staged {
            state.apply(op);
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
