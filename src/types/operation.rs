//! Update operations flowing through a conflation window

use serde::{Deserialize, Serialize};

use super::row::{Row, RowKey};

/// Kind of row operation delivered by a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Add,
    Update,
    Remove,
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateKind::Add => write!(f, "add"),
            UpdateKind::Update => write!(f, "update"),
            UpdateKind::Remove => write!(f, "remove"),
        }
    }
}

/// One inbound row operation, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperation {
    pub row: Row,
    pub kind: UpdateKind,
    /// Unix milliseconds at which the operation was received
    #[serde(rename = "receivedAt")]
    pub received_at: i64,
}

impl UpdateOperation {
    /// Create an operation stamped with the current time
    pub fn new(row: Row, kind: UpdateKind) -> Self {
        Self {
            row,
            kind,
            received_at: crate::utils::time::now_millis(),
        }
    }

    /// Create an operation with an explicit receipt time
    pub fn at(row: Row, kind: UpdateKind, received_at: i64) -> Self {
        Self {
            row,
            kind,
            received_at,
        }
    }
}

/// An operation whose row key has been validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedOperation {
    pub key: RowKey,
    #[serde(flatten)]
    pub operation: UpdateOperation,
}

impl KeyedOperation {
    pub fn kind(&self) -> UpdateKind {
        self.operation.kind
    }
}
