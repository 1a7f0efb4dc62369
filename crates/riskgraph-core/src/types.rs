//! Core domain types for the risk graph.
//!
//! Raw records come in as loosely-typed rows; mappers turn them into
//! `MutationDescriptor`s, which are the only thing the graph writer sees.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Entity Types ──────────────────────────────────────────────────

/// The kinds of record the pipeline loads. Each maps to one node label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Account,
    Customer,
    Linkman,
    GpsEvent,
    Order,
    BlacklistEntry,
}

impl EntityType {
    /// Dependency order: every stage only references keys created by the
    /// stages before it.
    pub const LOAD_ORDER: [EntityType; 6] = [
        EntityType::Account,
        EntityType::Customer,
        EntityType::Linkman,
        EntityType::GpsEvent,
        EntityType::Order,
        EntityType::BlacklistEntry,
    ];

    /// The Neo4j label for nodes of this type.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Account => "Account",
            Self::Customer => "Customer",
            Self::Linkman => "Linkman",
            Self::GpsEvent => "GpsEvent",
            Self::Order => "Order",
            Self::BlacklistEntry => "BlacklistEntry",
        }
    }

    /// Position in `LOAD_ORDER`.
    pub fn stage_index(&self) -> usize {
        match self {
            Self::Account => 0,
            Self::Customer => 1,
            Self::Linkman => 2,
            Self::GpsEvent => 3,
            Self::Order => 4,
            Self::BlacklistEntry => 5,
        }
    }

    /// Parse a user-supplied entity name (CLI flags, config keys).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "account" | "login" => Some(Self::Account),
            "customer" => Some(Self::Customer),
            "linkman" | "contact" => Some(Self::Linkman),
            "gps" | "gpsevent" | "gps_event" | "lbs" => Some(Self::GpsEvent),
            "order" => Some(Self::Order),
            "blacklist" | "blacklistentry" | "blacklist_entry" => Some(Self::BlacklistEntry),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Node Identity ─────────────────────────────────────────────────

/// Natural-key identity of a node across a whole import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub entity: EntityType,
    pub key: String,
}

impl NodeKey {
    pub fn new(entity: EntityType, key: impl Into<String>) -> Self {
        Self {
            entity,
            key: key.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.entity.label()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.entity.label(), self.key)
    }
}

// ── Raw Input ─────────────────────────────────────────────────────

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl ScalarValue {
    /// Render the value as trimmed text, or `None` if it carries nothing.
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            Self::Null => return None,
            Self::Text(s) => s.trim().to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Timestamp(ts) => ts.to_rfc3339(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for ScalarValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for ScalarValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for ScalarValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

/// One input row: field name to scalar, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, ScalarValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. A repeated name replaces the earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ScalarValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder-style `insert`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<ScalarValue>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

// ── Mutations ─────────────────────────────────────────────────────

/// A property value as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::String(ts.to_rfc3339())
    }
}

/// Sorted so that generated Cypher and test output are stable.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Relationship types produced by the mappers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    Owns,
    Contacts,
    LocatedAt,
    Placed,
    Flagged,
}

impl RelType {
    /// The Cypher relationship type string.
    pub fn as_cypher(&self) -> &'static str {
        match self {
            Self::Owns => "OWNS",
            Self::Contacts => "CONTACTS",
            Self::LocatedAt => "LOCATED_AT",
            Self::Placed => "PLACED",
            Self::Flagged => "FLAGGED",
        }
    }

    pub const ALL: [RelType; 5] = [
        RelType::Owns,
        RelType::Contacts,
        RelType::LocatedAt,
        RelType::Placed,
        RelType::Flagged,
    ];
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cypher())
    }
}

/// Find-or-create a node by key, then replace its properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpsert {
    pub key: NodeKey,
    pub properties: Properties,
}

impl NodeUpsert {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            properties: Properties::new(),
        }
    }

    /// Set a property; `None` leaves it unset.
    pub fn prop(mut self, name: &str, value: Option<impl Into<PropertyValue>>) -> Self {
        if let Some(v) = value {
            self.properties.insert(name.to_string(), v.into());
        }
        self
    }
}

/// Find-or-create the single `(from)-[rel_type]->(to)` relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeUpsert {
    pub from: NodeKey,
    pub to: NodeKey,
    pub rel_type: RelType,
    pub properties: Properties,
}

impl EdgeUpsert {
    pub fn new(from: NodeKey, to: NodeKey, rel_type: RelType) -> Self {
        Self {
            from,
            to,
            rel_type,
            properties: Properties::new(),
        }
    }

    pub fn prop(mut self, name: &str, value: Option<impl Into<PropertyValue>>) -> Self {
        if let Some(v) = value {
            self.properties.insert(name.to_string(), v.into());
        }
        self
    }
}

/// Everything one record writes to the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationDescriptor {
    pub nodes: Vec<NodeUpsert>,
    pub edges: Vec<EdgeUpsert>,
}

impl MutationDescriptor {
    pub fn node(mut self, node: NodeUpsert) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: EdgeUpsert) -> Self {
        self.edges.push(edge);
        self
    }

    /// Edge endpoints that this descriptor does not create itself.
    /// These must already exist in the store when the descriptor is applied.
    pub fn external_refs(&self) -> Vec<&NodeKey> {
        let mut refs: Vec<&NodeKey> = Vec::new();
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                let own = self.nodes.iter().any(|n| &n.key == endpoint);
                if !own && !refs.contains(&endpoint) {
                    refs.push(endpoint);
                }
            }
        }
        refs
    }

    /// The key of the first node, used to label failures in reports.
    pub fn primary_key(&self) -> Option<&NodeKey> {
        self.nodes.first().map(|n| &n.key)
    }
}
