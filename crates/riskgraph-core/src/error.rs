use serde::Serialize;
use thiserror::Error;

use crate::types::NodeKey;

/// A failure confined to a single record.
///
/// These never abort a stage; they are counted in the stage's load report.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
    #[error("Validation error: missing or empty field(s): {}", fields.join(", "))]
    Validation { fields: Vec<String> },

    #[error("Mapping error on field {field}: {reason}")]
    Mapping { field: String, reason: String },

    #[error("Dangling reference: {key} does not exist in the graph")]
    DanglingReference { key: NodeKey },

    #[error("Transaction failed after {attempts} attempt(s): {message}")]
    TransactionExhausted { attempts: u32, message: String },
}

/// Coarse class of a record error, for counting and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Mapping,
    Transaction,
}

impl RecordError {
    pub fn validation<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Validation {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn mapping(field: &str, reason: impl Into<String>) -> Self {
        Self::Mapping {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Dangling references are a mapping-class failure detected at write time.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Mapping { .. } | Self::DanglingReference { .. } => ErrorKind::Mapping,
            Self::TransactionExhausted { .. } => ErrorKind::Transaction,
        }
    }
}
