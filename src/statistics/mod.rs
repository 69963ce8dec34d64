//! Feed Statistics
//!
//! Per-feed counters, rates, latency and connection figures derived purely
//! from lifecycle calls. Every call replaces the whole `FeedMetrics` value;
//! none of them fail or block on anything but a short lock. Calls made
//! after `destroy` are ignored.

mod export;
mod latency;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::FlushReport;
use crate::types::{ErrorDetail, ErrorKind, FeedMetrics};
use crate::utils::{now_millis, now_rfc3339, round1, Published};

pub use export::{ExportSummary, MetricsExport};
pub use latency::{LatencyWindow, LATENCY_WINDOW};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Default)]
struct ConnectionState {
    connected_at: Option<Instant>,
    /// Set once a connection has been lost; the next connect is a reconnect
    dropped: bool,
}

/// Statistics aggregator for one feed
pub struct FeedStatistics {
    feed_id: String,
    metrics: Published<FeedMetrics>,
    latency: Mutex<LatencyWindow>,
    snapshot_started: Mutex<Option<Instant>>,
    connection: Mutex<ConnectionState>,
    destroyed: AtomicBool,
}

impl FeedStatistics {
    pub fn new(feed_id: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            metrics: Published::new(FeedMetrics::default()),
            latency: Mutex::new(LatencyWindow::default()),
            snapshot_started: Mutex::new(None),
            connection: Mutex::new(ConnectionState::default()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    /// Latest metrics value
    pub fn get_metrics(&self) -> FeedMetrics {
        self.metrics.get()
    }

    /// Push subscription; `None` after `destroy`
    pub fn subscribe(&self) -> Option<watch::Receiver<FeedMetrics>> {
        self.metrics.subscribe()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    // ---- Bulk snapshot load ----

    /// Mark the start of a bulk snapshot load
    pub fn start_snapshot(&self) {
        if self.is_destroyed() {
            return;
        }
        *self.snapshot_started.lock() = Some(Instant::now());
        self.publish(|m| m.is_loading_snapshot = true);
        debug!(feed_id = %self.feed_id, "Snapshot load started");
    }

    /// Record the size of a finished bulk load and how long it took.
    /// Without a matching `start_snapshot` the duration is left unset.
    pub fn complete_snapshot(&self, row_count: usize, bytes: u64) {
        if self.is_destroyed() {
            return;
        }
        let duration_ms = self
            .snapshot_started
            .lock()
            .take()
            .map(|started| started.elapsed().as_millis() as u64);

        self.publish(|m| {
            m.snapshot_rows = row_count;
            m.snapshot_bytes = bytes;
            m.snapshot_duration_ms = duration_ms;
            m.is_loading_snapshot = false;
        });
        info!(
            feed_id = %self.feed_id,
            rows = row_count,
            bytes,
            duration_ms = ?duration_ms,
            "Snapshot load complete"
        );
    }

    // ---- Updates ----

    /// Count one received update as applied or failed
    pub fn record_update(&self, success: bool) {
        if success {
            self.record_updates(1, 0);
        } else {
            self.record_updates(0, 1);
        }
    }

    /// Count a batch of received updates
    pub fn record_updates(&self, applied: u64, failed: u64) {
        if self.is_destroyed() || applied + failed == 0 {
            return;
        }
        self.publish(|m| {
            m.total_updates_received += applied + failed;
            m.updates_applied += applied;
            m.failed_updates += failed;
            m.recompute_conflation_ratio();
            m.last_update_timestamp = Some(now_millis());
        });
    }

    /// Record that `original_count` operations collapsed to `conflated_count`
    pub fn record_conflation(&self, original_count: usize, conflated_count: usize) {
        if self.is_destroyed() {
            return;
        }
        let collapsed = original_count.saturating_sub(conflated_count) as u64;
        self.publish(|m| {
            m.updates_conflated += collapsed;
            m.recompute_conflation_ratio();
        });
    }

    /// Set current and average rates; the peak keeps the highest current rate seen
    pub fn update_rates(&self, current: f64, average: f64) {
        if self.is_destroyed() {
            return;
        }
        self.publish(|m| {
            m.current_update_rate = round1(current);
            m.average_update_rate = round1(average);
            m.peak_update_rate = m.peak_update_rate.max(m.current_update_rate);
        });
    }

    /// Add a latency sample to the 100-sample window
    pub fn record_latency(&self, latency_ms: f64) {
        if self.is_destroyed() {
            return;
        }
        let average = self.latency.lock().record(latency_ms);
        self.publish(|m| m.average_latency_ms = average);
    }

    /// Set the snapshot size and estimated footprint
    pub fn update_memory(&self, snapshot_size: usize, estimated_bytes: u64) {
        if self.is_destroyed() {
            return;
        }
        self.publish(|m| {
            m.snapshot_size = snapshot_size;
            m.memory_usage_mb = estimated_bytes as f64 / BYTES_PER_MB;
        });
    }

    /// Fold one store flush into the counters as a single metrics replacement
    pub fn record_flush(&self, report: &FlushReport) {
        if self.is_destroyed() {
            return;
        }
        let average_latency = self.latency.lock().record(report.latency_ms);
        self.publish(|m| {
            m.total_updates_received += report.received as u64;
            m.updates_applied += report.applied as u64;
            m.updates_conflated += report.conflated as u64;
            m.failed_updates += report.failed as u64;
            m.recompute_conflation_ratio();

            m.current_update_rate = round1(report.current_rate);
            m.average_update_rate = round1(report.average_rate);
            m.peak_update_rate = m.peak_update_rate.max(m.current_update_rate);

            m.average_latency_ms = average_latency;
            m.last_update_timestamp = Some(now_millis());
            m.snapshot_size = report.snapshot_size;
            m.memory_usage_mb = report.estimated_memory_bytes as f64 / BYTES_PER_MB;
        });
    }

    // ---- Connection ----

    /// Count a reconnect explicitly
    pub fn record_reconnect(&self) {
        if self.is_destroyed() {
            return;
        }
        self.publish(|m| m.reconnect_count += 1);
    }

    /// Start timing the connection; counts a reconnect after a drop
    pub fn mark_connected(&self) {
        if self.is_destroyed() {
            return;
        }
        let reconnect = {
            let mut conn = self.connection.lock();
            conn.connected_at = Some(Instant::now());
            std::mem::take(&mut conn.dropped)
        };
        self.publish(|m| {
            m.connection_uptime_secs = 0;
            if reconnect {
                m.reconnect_count += 1;
            }
        });
        info!(feed_id = %self.feed_id, reconnect, "Feed connected");
    }

    /// Stop timing the connection. Uptime keeps its last value.
    pub fn mark_disconnected(&self, reason: Option<&str>) {
        if self.is_destroyed() {
            return;
        }
        self.update_connection_uptime();
        {
            let mut conn = self.connection.lock();
            if conn.connected_at.take().is_some() {
                conn.dropped = true;
            }
        }
        warn!(feed_id = %self.feed_id, reason = reason.unwrap_or("unknown"), "Feed disconnected");
    }

    /// Refresh uptime from the current connection start
    pub fn update_connection_uptime(&self) {
        if self.is_destroyed() {
            return;
        }
        let connected_at = self.connection.lock().connected_at;
        if let Some(started) = connected_at {
            let secs = started.elapsed().as_secs();
            self.publish(|m| m.connection_uptime_secs = secs);
        }
    }

    /// Count an error and keep it as the last error
    pub fn record_error(&self, message: impl Into<String>, kind: ErrorKind) {
        if self.is_destroyed() {
            return;
        }
        let detail = ErrorDetail {
            message: message.into(),
            kind,
            timestamp: now_millis(),
        };
        warn!(feed_id = %self.feed_id, kind = %kind, error = %detail.message, "Feed error recorded");
        self.publish(|m| {
            m.error_count += 1;
            m.last_error = Some(detail);
        });
    }

    // ---- Summary and export ----

    /// Percentage of received updates that did not fail; 100 when idle
    pub fn success_rate(&self) -> f64 {
        let m = self.metrics.get();
        if m.total_updates_received == 0 {
            return 100.0;
        }
        let ok = m.total_updates_received.saturating_sub(m.failed_updates);
        round1(ok as f64 / m.total_updates_received as f64 * 100.0)
    }

    /// Percentage of received updates conflated away
    pub fn conflation_rate(&self) -> f64 {
        self.metrics.get().conflation_ratio
    }

    pub fn summary(&self) -> ExportSummary {
        ExportSummary {
            success_rate: self.success_rate(),
            conflation_rate: self.conflation_rate(),
            peak_rate: self.metrics.get().peak_update_rate,
        }
    }

    /// Pretty-printed JSON of the current metrics and summary
    pub fn export_to_json(&self) -> Result<String> {
        let metrics = self.metrics.get();
        self.export(&metrics).to_json()
    }

    /// `metric,value` CSV of the current metrics and summary
    pub fn export_to_csv(&self) -> String {
        let metrics = self.metrics.get();
        self.export(&metrics).to_csv()
    }

    fn export<'a>(&'a self, metrics: &'a FeedMetrics) -> MetricsExport<'a> {
        MetricsExport {
            exported_at: now_rfc3339(),
            feed_id: &self.feed_id,
            metrics,
            summary: self.summary(),
        }
    }

    // ---- Lifecycle ----

    /// Zero all metrics and drop latency samples
    pub fn reset(&self) {
        if self.is_destroyed() {
            return;
        }
        self.latency.lock().clear();
        self.snapshot_started.lock().take();
        self.metrics.replace(FeedMetrics::default());
        debug!(feed_id = %self.feed_id, "Statistics reset");
    }

    /// Close metric subscriptions; later calls are ignored
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.metrics.close();
        self.latency.lock().clear();
        debug!(feed_id = %self.feed_id, "Statistics destroyed");
    }

    fn publish<F: FnOnce(&mut FeedMetrics)>(&self, f: F) {
        self.metrics.update(f);
    }
}

impl std::fmt::Debug for FeedStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedStatistics")
            .field("feed_id", &self.feed_id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
