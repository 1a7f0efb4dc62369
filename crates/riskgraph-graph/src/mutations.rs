//! Write operations against Neo4j.
//!
//! All mutations use MERGE (upsert) semantics so that re-running an import is
//! a no-op beyond property refresh. Nodes are identified by (label, key);
//! relationships by (from, to, type).

use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Query};

use riskgraph_core::{EdgeUpsert, EntityType, NodeKey, NodeUpsert, Properties, PropertyValue};

use crate::client::GraphClient;
use crate::store::{GraphStore, GraphTxn, StoreError};

/// An open Neo4j transaction.
pub struct Neo4jTxn {
    txn: neo4rs::Txn,
}

#[async_trait]
impl GraphStore for GraphClient {
    type Txn = Neo4jTxn;

    async fn begin(&self) -> Result<Neo4jTxn, StoreError> {
        Ok(Neo4jTxn {
            txn: self.start_txn().await?,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.run(query("RETURN 1")).await
    }

    async fn ensure_constraints(&self, entities: &[EntityType]) -> Result<(), StoreError> {
        for entity in entities {
            self.run(query(&constraint_cypher(*entity))).await?;
        }
        tracing::info!(labels = entities.len(), "Uniqueness constraints ensured");
        Ok(())
    }
}

#[async_trait]
impl GraphTxn for Neo4jTxn {
    async fn node_exists(&mut self, key: &NodeKey) -> Result<bool, StoreError> {
        let cypher = format!(
            "MATCH (n:{label} {{key: $key}})
             RETURN count(n) AS cnt",
            label = key.label()
        );
        let q = query(&cypher).param("key", key.key.clone());

        let mut stream = self.txn.execute(q).await?;
        let cnt = match stream.next(self.txn.handle()).await? {
            Some(row) => row.get::<i64>("cnt").unwrap_or(0),
            None => 0,
        };
        Ok(cnt > 0)
    }

    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<(), StoreError> {
        self.txn.run(node_query(node)).await?;
        Ok(())
    }

    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<(), StoreError> {
        self.txn.run(edge_query(edge)).await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

// ── Cypher Builders ──────────────────────────────────────────────

/// Uniqueness constraint on `key` for one label.
pub fn constraint_cypher(entity: EntityType) -> String {
    let label = entity.label();
    format!(
        "CREATE CONSTRAINT {name}_key IF NOT EXISTS FOR (n:{label}) REQUIRE n.key IS UNIQUE",
        name = label.to_lowercase()
    )
}

/// `SET n = {...}` replaces the whole property map, so properties absent from
/// the latest record do not linger from an earlier one.
pub fn node_cypher(node: &NodeUpsert) -> String {
    format!(
        "MERGE (n:{label} {{key: $key}})
         SET n = {{key: $key, first_seen: coalesce(n.first_seen, $now), last_seen: $now{props}}}",
        label = node.key.label(),
        props = property_map_entries(&node.properties)
    )
}

/// Endpoints are MATCHed, never MERGEd: a missing endpoint writes nothing.
pub fn edge_cypher(edge: &EdgeUpsert) -> String {
    format!(
        "MATCH (a:{from_label} {{key: $from_key}})
         MATCH (b:{to_label} {{key: $to_key}})
         MERGE (a)-[r:{rel_type}]->(b)
         SET r = {{first_seen: coalesce(r.first_seen, $now), last_seen: $now{props}}}",
        from_label = edge.from.label(),
        to_label = edge.to.label(),
        rel_type = edge.rel_type.as_cypher(),
        props = property_map_entries(&edge.properties)
    )
}

fn node_query(node: &NodeUpsert) -> Query {
    let q = query(&node_cypher(node))
        .param("key", node.key.key.clone())
        .param("now", Utc::now().to_rfc3339());
    bind_properties(q, &node.properties)
}

fn edge_query(edge: &EdgeUpsert) -> Query {
    let q = query(&edge_cypher(edge))
        .param("from_key", edge.from.key.clone())
        .param("to_key", edge.to.key.clone())
        .param("now", Utc::now().to_rfc3339());
    bind_properties(q, &edge.properties)
}

/// `, `name`: $p0, `phone`: $p1` for a map literal. Parameters are positional
/// so property names never need to be valid parameter identifiers.
fn property_map_entries(props: &Properties) -> String {
    props
        .keys()
        .enumerate()
        .map(|(i, name)| format!(", `{}`: $p{i}", name.replace('`', "``")))
        .collect()
}

fn bind_properties(mut q: Query, props: &Properties) -> Query {
    for (i, value) in props.values().enumerate() {
        let name = format!("p{i}");
        q = match value {
            PropertyValue::String(s) => q.param(&name, s.clone()),
            PropertyValue::Integer(n) => q.param(&name, *n),
            PropertyValue::Float(f) => q.param(&name, *f),
            PropertyValue::Bool(b) => q.param(&name, *b),
        };
    }
    q
}
