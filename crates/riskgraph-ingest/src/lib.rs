//! riskgraph-ingest: staged import of customer risk records into the graph.
//!
//! Raw records are mapped into mutation descriptors, batched into bounded
//! transactions, and written one entity type at a time so every edge finds
//! its endpoints already loaded.

pub mod batch;
pub mod config;
pub mod error;
pub mod mapper;
pub mod pipeline;
pub mod report;
pub mod source;

pub use batch::{AbortReason, CancelFlag, MappedRecord};
pub use config::{ImportConfig, SourceFiles};
pub use error::IngestError;
pub use mapper::map_record;
pub use pipeline::{Pipeline, RecordSources, RunAborted};
pub use report::{LoadReport, RecordFailure, RecordRef, RunReport, StageStatus};
