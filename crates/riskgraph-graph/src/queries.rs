//! Read-back queries used to verify an import.

use neo4rs::query;

use riskgraph_core::{EntityType, NodeKey, Properties, PropertyValue, RelType};

use crate::client::GraphClient;
use crate::store::StoreError;

/// A node as read back from Neo4j.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NodeRecord {
    pub key: NodeKey,
    pub properties: Properties,
}

impl GraphClient {
    /// Count nodes carrying an entity's label.
    pub async fn count_nodes(&self, entity: EntityType) -> Result<i64, StoreError> {
        let cypher = format!(
            "MATCH (n:{label})
             RETURN count(n) AS cnt",
            label = entity.label()
        );

        match self.query_one(query(&cypher)).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Count relationships of one type.
    pub async fn count_edges(&self, rel_type: RelType) -> Result<i64, StoreError> {
        let cypher = format!(
            "MATCH ()-[r:{rel}]->()
             RETURN count(r) AS cnt",
            rel = rel_type.as_cypher()
        );

        match self.query_one(query(&cypher)).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Fetch a node by key, if present.
    pub async fn get_node(&self, key: &NodeKey) -> Result<Option<NodeRecord>, StoreError> {
        let cypher = format!(
            "MATCH (n:{label} {{key: $key}})
             RETURN n",
            label = key.label()
        );
        let q = query(&cypher).param("key", key.key.clone());

        let Some(row) = self.query_one(q).await? else {
            return Ok(None);
        };
        let node: neo4rs::Node = row
            .get("n")
            .map_err(|e| StoreError::Transaction(format!("Failed to deserialize node: {e}")))?;

        Ok(Some(NodeRecord {
            key: key.clone(),
            properties: node_properties(&node),
        }))
    }
}

fn node_properties(node: &neo4rs::Node) -> Properties {
    let mut props = Properties::new();
    for name in node.keys() {
        let value = if let Ok(s) = node.get::<String>(name) {
            PropertyValue::String(s)
        } else if let Ok(i) = node.get::<i64>(name) {
            PropertyValue::Integer(i)
        } else if let Ok(f) = node.get::<f64>(name) {
            PropertyValue::Float(f)
        } else if let Ok(b) = node.get::<bool>(name) {
            PropertyValue::Bool(b)
        } else {
            continue;
        };
        props.insert(name.to_string(), value);
    }
    props
}
