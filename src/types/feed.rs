//! Feed identity and the provider event contract

use serde::{Deserialize, Serialize};

use super::row::Row;
use crate::config::ConflationConfig;

/// Description of one live feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    /// Stable feed identity used as the registry key
    pub id: String,
    /// Field whose value identifies a row
    pub key_field: String,
    /// Human-readable name for logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Per-feed conflation settings; manager defaults apply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflation: Option<ConflationConfig>,
}

impl FeedConfig {
    /// Create a feed config with default conflation settings
    pub fn new(id: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key_field: key_field.into(),
            name: None,
            conflation: None,
        }
    }

    /// Attach explicit conflation settings
    pub fn with_conflation(mut self, conflation: ConflationConfig) -> Self {
        self.conflation = Some(conflation);
        self
    }

    /// Attach a display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Lifecycle and data events emitted by a feed provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedEvent {
    Connected,

    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    SnapshotStart {
        #[serde(rename = "totalRows", default, skip_serializing_if = "Option::is_none")]
        total_rows: Option<usize>,
    },

    SnapshotData {
        rows: Vec<Row>,
        #[serde(rename = "isLastBatch")]
        is_last_batch: bool,
    },

    SnapshotComplete {
        #[serde(rename = "totalRows")]
        total_rows: usize,
    },

    Update {
        rows: Vec<Row>,
    },

    Error {
        error: String,
    },
}

impl FeedEvent {
    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            FeedEvent::Connected => "connected",
            FeedEvent::Disconnected { .. } => "disconnected",
            FeedEvent::SnapshotStart { .. } => "snapshotStart",
            FeedEvent::SnapshotData { .. } => "snapshotData",
            FeedEvent::SnapshotComplete { .. } => "snapshotComplete",
            FeedEvent::Update { .. } => "update",
            FeedEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_event_parsing() {
        let json = r#"{"type":"snapshotData","rows":[{"id":"a"}],"isLastBatch":true}"#;
        let event: FeedEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            FeedEvent::SnapshotData { ref rows, is_last_batch: true } if rows.len() == 1
        ));
    }

    #[test]
    fn test_disconnected_without_reason() {
        let event: FeedEvent = serde_json::from_str(r#"{"type":"disconnected"}"#).unwrap();
        assert_eq!(event, FeedEvent::Disconnected { reason: None });
        assert_eq!(event.label(), "disconnected");
    }

    #[test]
    fn test_feed_config_defaults() {
        let config: FeedConfig =
            serde_json::from_str(r#"{"id":"fx","keyField":"pair"}"#).unwrap();
        assert_eq!(config.id, "fx");
        assert_eq!(config.key_field, "pair");
        assert!(config.conflation.is_none());
    }
}
