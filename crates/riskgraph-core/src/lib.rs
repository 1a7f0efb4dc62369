//! riskgraph-core: Shared types, configuration, and error handling for the risk graph importer.
//!
//! This crate provides the foundational types used across the workspace:
//! - Raw input records and their scalar values
//! - Entity types, node keys, and relationship types for the graph
//! - Mutation descriptors: the unit of work handed to the graph writer
//! - Pipeline configuration
//! - Per-record error types

pub mod config;
pub mod error;
pub mod types;

pub use config::PipelineConfig;
pub use error::{ErrorKind, RecordError};
pub use types::{
    EdgeUpsert, EntityType, MutationDescriptor, NodeKey, NodeUpsert, Properties, PropertyValue,
    RawRecord, RelType, ScalarValue,
};
