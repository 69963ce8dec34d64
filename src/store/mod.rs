//! Conflation Store
//!
//! One store owns one feed's authoritative snapshot and its windowed
//! update pipeline:
//!
//! ```text
//! add_update / add_bulk_updates
//!        │
//!   ┌────▼────┐   every window_ms   ┌──────────┐   ┌──────────┐
//!   │ Window  │────────────────────►│ conflate │──►│ snapshot │
//!   └─────────┘                     └────┬─────┘   └──────────┘
//!                                        │
//!                     ┌──────────────────┼──────────────────┐
//!                     ▼                  ▼                  ▼
//!              batch subscribers   metrics (watch)   FlushObserver
//! ```
//!
//! The timer runs on tokio when a runtime is available (`start`). Without
//! one the store works in manual mode and callers drive `flush` themselves.

mod conflate;
mod events;
mod observer;
mod rate;
mod window;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::config::{ConflationConfig, ConflationConfigUpdate, DEFAULT_ROW_SIZE_BYTES};
use crate::error::{ConflationError, Result};
use crate::statistics::LatencyWindow;
use crate::types::{
    extract_key, ErrorDetail, ErrorKind, FeedMetrics, Row, RowKey, UpdateKind, UpdateOperation,
};
use crate::utils::{elapsed_ms, now_millis, round1, Published};

pub use conflate::{conflate, ConflationOutcome};
pub use events::{StoreEvent, StoreMessage};
pub use observer::{FlushObserver, FlushReport, SnapshotReport};
pub use rate::{RateSample, RateTracker, RATE_WINDOW_MS};
pub use window::ConflationWindow;

/// Buffered notifications per subscriber; slower subscribers lag and
/// should re-read the snapshot
const EVENT_CHANNEL_CAPACITY: usize = 1024;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// What one timer tick did
enum WindowCycle {
    Idle(Option<RateSample>),
    Flushed(FlushReport),
}

/// Windowed conflation store for one feed
pub struct ConflationStore {
    feed_id: String,
    key_field: String,
    row_size_bytes: usize,
    config: RwLock<ConflationConfig>,

    window: Mutex<ConflationWindow>,
    snapshot: RwLock<HashMap<RowKey, Row>>,
    /// Serializes flush, set_snapshot, clear and destroy
    flush_lock: Mutex<()>,

    rates: Mutex<RateTracker>,
    latency: Mutex<LatencyWindow>,
    metrics: Published<FeedMetrics>,

    events_tx: broadcast::Sender<StoreMessage>,
    sequence_counter: AtomicU64,

    observer: Option<Arc<dyn FlushObserver>>,
    pipeline: Mutex<Option<JoinHandle<()>>>,
    reconfigured: Arc<Notify>,
    destroyed: AtomicBool,
}

impl ConflationStore {
    /// Create a store keyed by `key_field`. The timer is not started.
    pub fn new(
        feed_id: impl Into<String>,
        key_field: impl Into<String>,
        config: ConflationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let key_field = key_field.into();
        if key_field.is_empty() {
            return Err(ConflationError::invalid("keyField", "must not be empty"));
        }

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            feed_id: feed_id.into(),
            key_field,
            row_size_bytes: DEFAULT_ROW_SIZE_BYTES,
            config: RwLock::new(config),
            window: Mutex::new(ConflationWindow::new()),
            snapshot: RwLock::new(HashMap::new()),
            flush_lock: Mutex::new(()),
            rates: Mutex::new(RateTracker::new()),
            latency: Mutex::new(LatencyWindow::default()),
            metrics: Published::new(FeedMetrics::default()),
            events_tx,
            sequence_counter: AtomicU64::new(0),
            observer: None,
            pipeline: Mutex::new(None),
            reconfigured: Arc::new(Notify::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Set the per-row size estimate used for memory accounting
    pub fn with_row_size_estimate(mut self, bytes: usize) -> Self {
        self.row_size_bytes = bytes.max(1);
        self
    }

    /// Attach an observer notified after every flush
    pub fn with_observer(mut self, observer: Arc<dyn FlushObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start the window timer on the current tokio runtime.
    ///
    /// Returns `false` (manual mode) when no runtime is available or the
    /// store is destroyed.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(feed_id = %self.feed_id, "No tokio runtime, store runs in manual flush mode");
            return false;
        };

        let store = Arc::downgrade(self);
        let reconfigured = Arc::clone(&self.reconfigured);

        let task = runtime.spawn(async move {
            loop {
                let window = match store.upgrade() {
                    Some(s) if !s.is_destroyed() => s.config().window(),
                    _ => break,
                };

                tokio::select! {
                    _ = tokio::time::sleep(window) => {
                        match store.upgrade() {
                            Some(s) if !s.is_destroyed() => {
                                s.flush();
                            }
                            _ => break,
                        }
                    }
                    // Window length changed: restart the cycle with the new value
                    _ = reconfigured.notified() => {}
                }
            }
        });

        if let Some(previous) = self.pipeline.lock().replace(task) {
            previous.abort();
        }
        debug!(feed_id = %self.feed_id, window_ms = self.config().window_ms, "Window timer started");
        true
    }

    /// Enqueue one operation stamped with the current time
    pub fn add_update(&self, row: Row, kind: UpdateKind) -> Result<()> {
        self.add_operation(UpdateOperation::new(row, kind))
    }

    /// Enqueue one operation that carries its own receipt time
    pub fn add_operation(&self, operation: UpdateOperation) -> Result<()> {
        self.ensure_active()?;
        self.window.lock().push(operation);
        Ok(())
    }

    /// Enqueue many operations of the same kind; equivalent to repeated
    /// `add_update` calls. Returns the number enqueued.
    pub fn add_bulk_updates<I>(&self, rows: I, kind: UpdateKind) -> Result<usize>
    where
        I: IntoIterator<Item = Row>,
    {
        self.ensure_active()?;
        let received_at = now_millis();
        let operations: Vec<UpdateOperation> = rows
            .into_iter()
            .map(|row| UpdateOperation::at(row, kind, received_at))
            .collect();
        let count = operations.len();
        self.window.lock().extend(operations);
        Ok(count)
    }

    /// Replace the whole snapshot. Pending window content is discarded
    /// since it applies to the replaced state.
    ///
    /// Returns the number of rows in the new snapshot.
    pub fn set_snapshot(&self, rows: Vec<Row>) -> Result<usize> {
        self.ensure_active()?;

        let (row_count, failed, discarded) = {
            let _flush = self.flush_lock.lock();
            let discarded = self.window.lock().clear();

            let mut replacement = HashMap::with_capacity(rows.len());
            let mut failed = 0u64;
            for row in rows {
                match extract_key(&row, &self.key_field) {
                    Some(key) => {
                        replacement.insert(key, row);
                    }
                    None => failed += 1,
                }
            }

            let row_count = replacement.len();
            *self.snapshot.write() = replacement;

            if self.config().enable_metrics {
                let memory_mb = self.memory_mb(row_count);
                self.metrics.update(|m| {
                    // Dropped rows still count as received
                    m.total_updates_received += failed;
                    m.failed_updates += failed;
                    m.recompute_conflation_ratio();
                    m.snapshot_size = row_count;
                    m.memory_usage_mb = memory_mb;
                    m.last_update_timestamp = Some(now_millis());
                });
            }
            self.emit(StoreEvent::SnapshotReplaced { row_count });
            (row_count, failed, discarded)
        };

        if failed > 0 {
            warn!(feed_id = %self.feed_id, failed, "Snapshot rows without a usable key were dropped");
        }
        info!(
            feed_id = %self.feed_id,
            rows = row_count,
            discarded_pending = discarded,
            "Snapshot replaced"
        );

        if let Some(observer) = &self.observer {
            let report = SnapshotReport {
                snapshot_size: row_count,
                estimated_memory_bytes: self.memory_bytes(row_count),
                failed: failed as usize,
            };
            observer.on_snapshot(&self.feed_id, &report);
        }
        Ok(row_count)
    }

    /// Current rows, copied out of the last fully applied state
    pub fn get_snapshot(&self) -> Vec<Row> {
        self.snapshot.read().values().cloned().collect()
    }

    /// Copy of the row stored under `key`
    pub fn get_by_key(&self, key: &str) -> Option<Row> {
        self.snapshot.read().get(key).cloned()
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Operations waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.window.lock().len()
    }

    /// Latest metrics value
    pub fn get_metrics(&self) -> FeedMetrics {
        self.metrics.get()
    }

    /// Push subscription to metrics; each flush delivers the latest value
    pub fn subscribe_metrics(&self) -> Result<watch::Receiver<FeedMetrics>> {
        self.metrics
            .subscribe()
            .ok_or_else(|| ConflationError::StoreDestroyed(self.feed_id.clone()))
    }

    /// Metrics subscription as a `Stream`
    pub fn metrics_stream(&self) -> Result<WatchStream<FeedMetrics>> {
        self.subscribe_metrics().map(WatchStream::new)
    }

    /// Subscribe to batch, snapshot and error notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreMessage> {
        self.events_tx.subscribe()
    }

    /// Current sequence ID of emitted events
    pub fn current_sequence_id(&self) -> u64 {
        self.sequence_counter.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> ConflationConfig {
        *self.config.read()
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Approximate snapshot footprint: rows times the row size estimate
    pub fn estimated_memory_bytes(&self) -> u64 {
        self.memory_bytes(self.snapshot_len())
    }

    /// Apply a partial reconfiguration.
    ///
    /// Operations already buffered are flushed under the old settings, so
    /// nothing is lost or applied twice across the boundary; the new
    /// settings govern the next window. An invalid update leaves the
    /// current configuration in effect.
    pub fn update_config(&self, update: &ConflationConfigUpdate) -> Result<ConflationConfig> {
        self.ensure_active()?;
        let next = self.config().merged(update)?;

        self.flush();
        {
            let _flush = self.flush_lock.lock();
            *self.config.write() = next;
            if !next.enable_metrics {
                self.rates.lock().reset();
            }
        }
        self.reconfigured.notify_one();

        info!(
            feed_id = %self.feed_id,
            window_ms = next.window_ms,
            max_batch_size = next.max_batch_size,
            enable_metrics = next.enable_metrics,
            "Store reconfigured"
        );
        Ok(next)
    }

    /// Run one window cycle now: drain, conflate, apply, publish.
    ///
    /// Returns `None` when the window was empty or the store is destroyed.
    /// An empty window still resamples the rates so they decay to zero.
    pub fn flush(&self) -> Option<FlushReport> {
        if self.is_destroyed() {
            return None;
        }

        let cycle = {
            let _flush = self.flush_lock.lock();
            if self.is_destroyed() {
                return None;
            }

            let operations = self.window.lock().drain();
            let config = self.config();
            let now = now_millis();

            if operations.is_empty() {
                WindowCycle::Idle(if config.enable_metrics {
                    self.decay_idle_rates(now)
                } else {
                    None
                })
            } else {
                WindowCycle::Flushed(self.apply_window(operations, config, now))
            }
        };

        match cycle {
            WindowCycle::Idle(decayed) => {
                if let (Some(observer), Some(rates)) = (&self.observer, decayed) {
                    observer.on_rates(&self.feed_id, &rates);
                }
                None
            }
            WindowCycle::Flushed(report) => {
                if let Some(observer) = &self.observer {
                    observer.on_flush(&self.feed_id, &report);
                }
                Some(report)
            }
        }
    }

    /// Conflate a drained window into the snapshot. Caller holds `flush_lock`.
    fn apply_window(
        &self,
        operations: Vec<UpdateOperation>,
        config: ConflationConfig,
        now: i64,
    ) -> FlushReport {
        let mut latency_total = 0u64;
        {
            let mut rates = self.rates.lock();
            for op in &operations {
                latency_total += elapsed_ms(op.received_at, now);
                if config.enable_metrics {
                    rates.record(op.received_at, 1);
                }
            }
        }
        let latency_ms = latency_total as f64 / operations.len() as f64;

        let (outcome, snapshot_size) = {
            let mut snapshot = self.snapshot.write();
            let outcome = conflate(operations, &self.key_field, config.max_batch_size, |key| {
                snapshot.contains_key(key)
            });
            for keyed in &outcome.operations {
                match keyed.operation.kind {
                    UpdateKind::Add | UpdateKind::Update => {
                        snapshot.insert(keyed.key.clone(), keyed.operation.row.clone());
                    }
                    UpdateKind::Remove => {
                        snapshot.remove(&keyed.key);
                    }
                }
            }
            (outcome, snapshot.len())
        };

        if outcome.failed > 0 {
            warn!(
                feed_id = %self.feed_id,
                failed = outcome.failed,
                key_field = %self.key_field,
                "Dropped operations without a usable key"
            );
        }
        if outcome.truncated > 0 {
            warn!(
                feed_id = %self.feed_id,
                truncated = outcome.truncated,
                max_batch_size = config.max_batch_size,
                "Conflated batch exceeded cap, excess keys deferred"
            );
        }

        let mut report = FlushReport {
            received: outcome.received,
            applied: outcome.applied(),
            conflated: outcome.conflated(),
            failed: outcome.failed,
            cancelled: outcome.cancelled,
            truncated: outcome.truncated,
            latency_ms,
            snapshot_size,
            estimated_memory_bytes: self.memory_bytes(snapshot_size),
            ..Default::default()
        };

        if !outcome.operations.is_empty() {
            self.emit(StoreEvent::Batch {
                operations: outcome.operations,
            });
        }

        if config.enable_metrics {
            let rates = self.rates.lock().sample(now);
            let average_latency = self.latency.lock().record(latency_ms);
            report.current_rate = rates.current;
            report.average_rate = rates.average;
            self.publish_flush_metrics(&report, rates, average_latency, now);
        }

        debug!(
            feed_id = %self.feed_id,
            received = report.received,
            applied = report.applied,
            conflated = report.conflated,
            snapshot_size = report.snapshot_size,
            "Window flushed"
        );
        report
    }

    /// Forward an error to subscribers and count it; the store stays usable
    pub fn publish_error(&self, message: impl Into<String>, kind: ErrorKind) {
        let message = message.into();
        if self.is_destroyed() {
            return;
        }
        if self.config().enable_metrics {
            let detail = ErrorDetail {
                message: message.clone(),
                kind,
                timestamp: now_millis(),
            };
            self.metrics.update(|m| {
                m.error_count += 1;
                m.last_error = Some(detail);
            });
        }
        warn!(feed_id = %self.feed_id, kind = %kind, error = %message, "Store error");
        self.emit(StoreEvent::Error { message });
    }

    /// Empty the snapshot and pending window and reset metrics. Idempotent.
    pub fn clear(&self) {
        if self.is_destroyed() {
            return;
        }
        {
            let _flush = self.flush_lock.lock();
            self.window.lock().clear();
            self.snapshot.write().clear();
            self.rates.lock().reset();
            self.latency.lock().clear();
            self.metrics.replace(FeedMetrics::default());
            self.emit(StoreEvent::Cleared);
        }
        debug!(feed_id = %self.feed_id, "Store cleared");

        if let Some(observer) = &self.observer {
            observer.on_snapshot(&self.feed_id, &SnapshotReport::default());
        }
    }

    /// Permanently stop the pipeline and release snapshot and metrics.
    ///
    /// A flush already running completes first; none is scheduled after.
    /// Later calls to the ingest methods return `StoreDestroyed`.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.pipeline.lock().take() {
            task.abort();
        }
        self.reconfigured.notify_one();

        let _flush = self.flush_lock.lock();
        let dropped = self.window.lock().clear();
        self.snapshot.write().clear();
        self.metrics.close();

        info!(feed_id = %self.feed_id, dropped_pending = dropped, "Store destroyed");
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(ConflationError::StoreDestroyed(self.feed_id.clone()))
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: StoreEvent) {
        let sequence_id = self.sequence_counter.fetch_add(1, Ordering::SeqCst);
        let msg = StoreMessage {
            event,
            feed_id: self.feed_id.clone(),
            sequence_id,
            timestamp: now_millis(),
        };
        // Ignore send errors - they just mean no receivers are listening
        let _ = self.events_tx.send(msg);
    }

    fn publish_flush_metrics(
        &self,
        report: &FlushReport,
        rates: RateSample,
        average_latency: f64,
        now: i64,
    ) {
        let memory_mb = self.memory_mb(report.snapshot_size);
        self.metrics.update(|m| {
            m.total_updates_received += report.received as u64;
            m.updates_applied += report.applied as u64;
            m.updates_conflated += report.conflated as u64;
            m.failed_updates += report.failed as u64;
            m.recompute_conflation_ratio();
            m.current_update_rate = round1(rates.current);
            m.average_update_rate = round1(rates.average);
            m.peak_update_rate = round1(rates.peak);
            m.average_latency_ms = average_latency;
            m.last_update_timestamp = Some(now);
            m.snapshot_size = report.snapshot_size;
            m.memory_usage_mb = memory_mb;
        });
    }

    /// Keep the current rate honest while no operations arrive.
    ///
    /// Returns the new sample, or `None` once the rates have settled at zero.
    fn decay_idle_rates(&self, now: i64) -> Option<RateSample> {
        let mut rates = self.rates.lock();
        if rates.in_window() == 0 && rates.last().current == 0.0 {
            return None;
        }
        let sample = rates.sample(now);
        drop(rates);
        self.metrics.update(|m| {
            m.current_update_rate = round1(sample.current);
            m.average_update_rate = round1(sample.average);
            m.peak_update_rate = round1(sample.peak);
        });
        Some(sample)
    }

    fn memory_bytes(&self, rows: usize) -> u64 {
        rows as u64 * self.row_size_bytes as u64
    }

    fn memory_mb(&self, rows: usize) -> f64 {
        self.memory_bytes(rows) as f64 / BYTES_PER_MB
    }
}

impl Drop for ConflationStore {
    fn drop(&mut self) {
        if let Some(task) = self.pipeline.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ConflationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflationStore")
            .field("feed_id", &self.feed_id)
            .field("key_field", &self.key_field)
            .field("config", &self.config())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
