//! Per-window reports and the observer seam used by the manager

use super::rate::RateSample;

/// Summary of one window flush
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlushReport {
    pub received: usize,
    pub applied: usize,
    pub conflated: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub truncated: usize,
    /// Mean time the window's operations spent buffered
    pub latency_ms: f64,
    /// Rates at the end of the flush; zero when metrics are disabled
    pub current_rate: f64,
    pub average_rate: f64,
    pub snapshot_size: usize,
    pub estimated_memory_bytes: u64,
}

/// Snapshot state after a replacement or clear
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SnapshotReport {
    pub snapshot_size: usize,
    pub estimated_memory_bytes: u64,
    /// Rows dropped for lacking a usable key
    pub failed: usize,
}

/// Receives store activity after the store has released its locks
pub trait FlushObserver: Send + Sync {
    /// Called after every non-empty window flush
    fn on_flush(&self, feed_id: &str, report: &FlushReport);

    /// Called when the snapshot is replaced or cleared outside a flush
    fn on_snapshot(&self, _feed_id: &str, _report: &SnapshotReport) {}

    /// Called when an empty window moved the rates, so readers see them decay
    fn on_rates(&self, _feed_id: &str, _rates: &RateSample) {}
}
