//! Metrics value published by stores and statistics aggregators
//!
//! A `FeedMetrics` is never mutated in place by readers: every update
//! produces a new value that replaces the previous one wholesale.

use serde::{Deserialize, Serialize};

/// Classification of a recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection dropped or could not be established
    Connection,
    /// Error reported by the feed provider
    Feed,
    /// Fault inside the conflation pipeline
    Conflation,
    /// Bulk snapshot load failed
    Snapshot,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Feed => write!(f, "feed"),
            ErrorKind::Conflation => write!(f, "conflation"),
            ErrorKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Details of the most recent error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub message: String,
    pub kind: ErrorKind,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Immutable snapshot of one feed's throughput, latency and memory figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMetrics {
    // Cumulative counters
    pub total_updates_received: u64,
    pub updates_applied: u64,
    pub updates_conflated: u64,
    pub failed_updates: u64,
    /// `updates_conflated / total_updates_received * 100`, one decimal
    pub conflation_ratio: f64,

    // Rates (operations per second)
    pub current_update_rate: f64,
    pub average_update_rate: f64,
    pub peak_update_rate: f64,

    /// Mean buffering latency of the last 100 windows, one decimal
    pub average_latency_ms: f64,
    /// Unix milliseconds of the last applied window
    pub last_update_timestamp: Option<i64>,

    // Memory
    pub snapshot_size: usize,
    pub memory_usage_mb: f64,

    // Bulk snapshot load
    pub snapshot_rows: usize,
    pub snapshot_bytes: u64,
    pub snapshot_duration_ms: Option<u64>,
    pub is_loading_snapshot: bool,

    // Connection
    pub connection_uptime_secs: u64,
    pub reconnect_count: u64,
    pub error_count: u64,
    pub last_error: Option<ErrorDetail>,
}

impl FeedMetrics {
    /// Recompute the conflation ratio from the cumulative counters
    pub fn recompute_conflation_ratio(&mut self) {
        self.conflation_ratio = if self.total_updates_received == 0 {
            0.0
        } else {
            crate::utils::time::round1(
                self.updates_conflated as f64 / self.total_updates_received as f64 * 100.0,
            )
        };
    }
}
