//! Feed Bridge
//!
//! Applies provider events to one feed's store and statistics:
//!
//! | Event              | Effect                                                  |
//! |--------------------|---------------------------------------------------------|
//! | `connected`        | statistics connection start (reconnect after a drop)    |
//! | `disconnected`     | statistics connection end                               |
//! | `snapshotStart`    | statistics snapshot timer, pending batches reset        |
//! | `snapshotData`     | rows accumulated; last batch replaces the snapshot      |
//! | `snapshotComplete` | any accumulated rows applied, load size recorded        |
//! | `update`           | rows enqueued into the window as `Update` operations    |
//! | `error`            | recorded in statistics and sent to store subscribers    |

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ConflationError, Result};
use crate::statistics::FeedStatistics;
use crate::store::ConflationStore;
use crate::types::{ErrorKind, FeedEvent, Row, UpdateKind};

/// Routes `FeedEvent`s into a store and its statistics
#[derive(Debug)]
pub struct FeedBridge {
    store: Arc<ConflationStore>,
    statistics: Arc<FeedStatistics>,
    pending_snapshot: Vec<Row>,
    snapshot_bytes: u64,
}

impl FeedBridge {
    pub fn new(store: Arc<ConflationStore>, statistics: Arc<FeedStatistics>) -> Self {
        Self {
            store,
            statistics,
            pending_snapshot: Vec::new(),
            snapshot_bytes: 0,
        }
    }

    pub fn store(&self) -> &Arc<ConflationStore> {
        &self.store
    }

    pub fn statistics(&self) -> &Arc<FeedStatistics> {
        &self.statistics
    }

    /// Apply one provider event.
    ///
    /// Fails only when the store has been destroyed; feed errors are
    /// recorded, not returned.
    pub fn handle(&mut self, event: FeedEvent) -> Result<()> {
        match event {
            FeedEvent::Connected => self.statistics.mark_connected(),

            FeedEvent::Disconnected { reason } => {
                self.statistics.mark_disconnected(reason.as_deref());
            }

            FeedEvent::SnapshotStart { total_rows } => {
                self.pending_snapshot.clear();
                self.snapshot_bytes = 0;
                if let Some(total) = total_rows {
                    self.pending_snapshot.reserve(total);
                }
                self.statistics.start_snapshot();
            }

            FeedEvent::SnapshotData {
                rows,
                is_last_batch,
            } => {
                self.snapshot_bytes += serde_json::to_vec(&rows)?.len() as u64;
                self.pending_snapshot.extend(rows);
                if is_last_batch {
                    self.apply_snapshot()?;
                }
            }

            FeedEvent::SnapshotComplete { total_rows } => {
                if !self.pending_snapshot.is_empty() {
                    self.apply_snapshot()?;
                }
                self.statistics
                    .complete_snapshot(total_rows, std::mem::take(&mut self.snapshot_bytes));
            }

            FeedEvent::Update { rows } => {
                let count = self.store.add_bulk_updates(rows, UpdateKind::Update)?;
                debug!(feed_id = %self.store.feed_id(), count, "Updates enqueued");
            }

            FeedEvent::Error { error } => {
                self.statistics.record_error(error.clone(), ErrorKind::Feed);
                self.store.publish_error(error, ErrorKind::Feed);
            }
        }
        Ok(())
    }

    /// Consume events until the channel closes or the store is destroyed.
    /// Returns the number of events applied.
    pub async fn run(&mut self, mut events: mpsc::Receiver<FeedEvent>) -> usize {
        let mut handled = 0usize;
        while let Some(event) = events.recv().await {
            let label = event.label();
            match self.handle(event) {
                Ok(()) => handled += 1,
                Err(ConflationError::StoreDestroyed(feed_id)) => {
                    info!(feed_id = %feed_id, "Store destroyed, feed bridge stopping");
                    break;
                }
                Err(e) => {
                    warn!(feed_id = %self.store.feed_id(), event = label, error = %e, "Feed event failed");
                    self.statistics
                        .record_error(e.to_string(), ErrorKind::Conflation);
                }
            }
        }
        handled
    }

    fn apply_snapshot(&mut self) -> Result<()> {
        let rows = std::mem::take(&mut self.pending_snapshot);
        self.store.set_snapshot(rows)?;
        Ok(())
    }
}
