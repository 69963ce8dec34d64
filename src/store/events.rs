//! Notifications delivered to store subscribers

use serde::{Deserialize, Serialize};

use crate::types::KeyedOperation;

/// Store events broadcast to UI-facing subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// One window's conflated operations, already applied to the snapshot
    Batch { operations: Vec<KeyedOperation> },

    /// The whole snapshot was replaced by a bulk load
    SnapshotReplaced { row_count: usize },

    /// The snapshot was emptied
    Cleared,

    /// A pipeline or feed error; the store remains usable
    Error { message: String },
}

/// Store event wrapper with metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreMessage {
    #[serde(flatten)]
    pub event: StoreEvent,

    /// Feed the event belongs to
    pub feed_id: String,

    /// Monotonically increasing sequence ID for gap detection
    pub sequence_id: u64,

    /// Unix milliseconds when the event was emitted
    pub timestamp: i64,
}
