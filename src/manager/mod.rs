//! Store Manager
//!
//! Owns one `ConflationStore` and one `FeedStatistics` per feed id and keeps
//! the registry within two bounds:
//!
//! - **Capacity**: at most `max_stores` entries; creating a new feed at
//!   capacity evicts the least recently used entry first.
//! - **Memory**: after every store flush or snapshot change, while the
//!   estimated total exceeds `memory_limit_mb` and more than one entry
//!   remains, the least recently used entry is evicted. The last entry is
//!   never evicted by the memory check.
//!
//! Lookups (`create_store` for an existing id, `get_store`,
//! `get_statistics`, `update_store_config`) refresh recency; the `peek_*`
//! helpers do not.
//!
//! The manager is constructed explicitly and shared as `Arc<StoreManager>`.
//! Dropping it destroys every remaining store.

mod registry;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConflationConfig, ConflationConfigUpdate, ManagerConfig};
use crate::error::{ConflationError, Result};
use crate::feed::FeedBridge;
use crate::statistics::FeedStatistics;
use crate::store::{ConflationStore, FlushObserver, FlushReport, RateSample, SnapshotReport};
use crate::types::FeedConfig;

pub use registry::{EvictionReason, Registry, RegistryEntry};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Registry of per-feed stores with LRU eviction
pub struct StoreManager {
    config: ManagerConfig,
    registry: Mutex<Registry>,
    self_ref: Weak<StoreManager>,
}

impl StoreManager {
    /// Create a manager; the config is validated first
    pub fn new(config: ManagerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            max_stores = config.max_stores,
            memory_limit_mb = config.memory_limit_mb,
            "Store manager created"
        );
        Ok(Arc::new_cyclic(|self_ref| Self {
            config,
            registry: Mutex::new(Registry::new()),
            self_ref: self_ref.clone(),
        }))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Get the store for `feed.id`, creating it (and its statistics) if needed.
    ///
    /// An existing store is returned as-is and marked most recently used;
    /// its configuration is not changed.
    pub fn create_store(&self, feed: FeedConfig) -> Result<Arc<ConflationStore>> {
        let mut evicted = Vec::new();

        let store = {
            let mut registry = self.registry.lock();
            if let Some(entry) = registry.touch(&feed.id) {
                debug!(feed_id = %feed.id, "Returning existing store");
                return Ok(Arc::clone(&entry.store));
            }

            let conflation = feed.conflation.unwrap_or(self.config.default_conflation);
            // Build first so an invalid feed config does not cost an eviction
            let statistics = Arc::new(FeedStatistics::new(feed.id.clone()));
            let observer = Arc::new(ManagerObserver {
                manager: self.self_ref.clone(),
                statistics: Arc::clone(&statistics),
            });
            let store = Arc::new(
                ConflationStore::new(feed.id.clone(), feed.key_field.clone(), conflation)?
                    .with_row_size_estimate(self.config.average_row_size_bytes)
                    .with_observer(observer),
            );

            while registry.len() >= self.config.max_stores {
                match registry.pop_lru() {
                    Some(lru) => evicted.push(lru),
                    None => break,
                }
            }

            let registered = FeedConfig {
                conflation: Some(conflation),
                ..feed.clone()
            };
            registry.insert(registered, Arc::clone(&store), statistics);
            store
        };

        for (id, entry) in evicted {
            Self::teardown(&id, entry, EvictionReason::Capacity);
        }

        store.start();
        info!(
            feed_id = %feed.id,
            name = feed.name.as_deref().unwrap_or(""),
            key_field = %feed.key_field,
            window_ms = store.config().window_ms,
            max_batch_size = store.config().max_batch_size,
            "Store created"
        );
        Ok(store)
    }

    /// Store for `feed_id`, marked most recently used
    pub fn get_store(&self, feed_id: &str) -> Option<Arc<ConflationStore>> {
        self.registry
            .lock()
            .touch(feed_id)
            .map(|entry| Arc::clone(&entry.store))
    }

    /// Statistics for `feed_id`, marked most recently used
    pub fn get_statistics(&self, feed_id: &str) -> Option<Arc<FeedStatistics>> {
        self.registry
            .lock()
            .touch(feed_id)
            .map(|entry| Arc::clone(&entry.statistics))
    }

    /// Store lookup that leaves recency untouched
    pub fn peek_store(&self, feed_id: &str) -> Option<Arc<ConflationStore>> {
        self.registry
            .lock()
            .peek(feed_id)
            .map(|entry| Arc::clone(&entry.store))
    }

    /// Statistics lookup that leaves recency untouched
    pub fn peek_statistics(&self, feed_id: &str) -> Option<Arc<FeedStatistics>> {
        self.registry
            .lock()
            .peek(feed_id)
            .map(|entry| Arc::clone(&entry.statistics))
    }

    /// Config the feed was registered with; `conflation` reflects the
    /// store's current settings. Leaves recency untouched.
    pub fn feed_config(&self, feed_id: &str) -> Option<FeedConfig> {
        let registry = self.registry.lock();
        let entry = registry.peek(feed_id)?;
        Some(FeedConfig {
            conflation: Some(entry.store.config()),
            ..entry.feed_config.clone()
        })
    }

    /// Create or fetch the feed's store and wrap it with its statistics in
    /// a `FeedBridge` for provider events
    pub fn bridge(&self, feed: FeedConfig) -> Result<FeedBridge> {
        let feed_id = feed.id.clone();
        let store = self.create_store(feed)?;
        let statistics = self
            .peek_statistics(&feed_id)
            .ok_or(ConflationError::StoreNotFound(feed_id))?;
        Ok(FeedBridge::new(store, statistics))
    }

    /// Destroy and unregister a feed. Unknown ids are a no-op.
    pub fn remove_store(&self, feed_id: &str) -> bool {
        let removed = self.registry.lock().remove(feed_id);
        match removed {
            Some(entry) => {
                Self::teardown(feed_id, entry, EvictionReason::Removed);
                true
            }
            None => false,
        }
    }

    /// Apply a partial conflation update to one feed's store
    pub fn update_store_config(
        &self,
        feed_id: &str,
        update: &ConflationConfigUpdate,
    ) -> Result<ConflationConfig> {
        let store = self
            .get_store(feed_id)
            .ok_or_else(|| ConflationError::StoreNotFound(feed_id.to_string()))?;
        store.update_config(update)
    }

    /// Evict least recently used stores while the estimated total exceeds
    /// the budget, keeping at least one. Returns the evicted feed ids.
    pub fn check_memory(&self) -> Vec<String> {
        let limit = self.config.memory_limit_bytes();
        let mut evicted = Vec::new();

        {
            let mut registry = self.registry.lock();
            let mut total = total_bytes(&registry);
            while total > limit && registry.len() > 1 {
                let Some((id, entry)) = registry.pop_lru() else {
                    break;
                };
                total -= entry.store.estimated_memory_bytes() as f64;
                evicted.push((id, entry));
            }
            if !evicted.is_empty() {
                warn!(
                    total_mb = total / BYTES_PER_MB,
                    limit_mb = self.config.memory_limit_mb,
                    evicted = evicted.len(),
                    "Memory budget exceeded, evicting least recently used stores"
                );
            } else if total > limit {
                debug!(
                    total_mb = total / BYTES_PER_MB,
                    limit_mb = self.config.memory_limit_mb,
                    "Over memory budget with a single store, keeping it"
                );
            }
        }

        evicted
            .into_iter()
            .map(|(id, entry)| {
                Self::teardown(&id, entry, EvictionReason::Memory);
                id
            })
            .collect()
    }

    /// Destroy every registered store
    pub fn clear(&self) {
        let drained = self.registry.lock().drain();
        let count = drained.len();
        for (id, entry) in drained {
            Self::teardown(&id, entry, EvictionReason::Removed);
        }
        info!(stores = count, "Store manager cleared");
    }

    pub fn store_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Registered feed ids, least recently used first
    pub fn feed_ids(&self) -> Vec<String> {
        self.registry.lock().ids_by_recency()
    }

    /// Estimated memory of all snapshots in MB
    pub fn total_memory_mb(&self) -> f64 {
        total_bytes(&self.registry.lock()) / BYTES_PER_MB
    }

    fn teardown(feed_id: &str, entry: RegistryEntry, reason: EvictionReason) {
        entry.store.destroy();
        entry.statistics.destroy();
        match reason {
            EvictionReason::Removed => info!(feed_id = %feed_id, "Store removed"),
            _ => warn!(feed_id = %feed_id, reason = %reason, "Store evicted"),
        }
    }
}

impl Drop for StoreManager {
    fn drop(&mut self) {
        for (_, entry) in self.registry.get_mut().drain() {
            entry.store.destroy();
            entry.statistics.destroy();
        }
    }
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreManager")
            .field("config", &self.config)
            .field("stores", &self.store_count())
            .finish()
    }
}

fn total_bytes(registry: &Registry) -> f64 {
    registry
        .entries()
        .map(|entry| entry.store.estimated_memory_bytes() as f64)
        .sum()
}

/// Forwards store activity into the feed's statistics and re-checks the
/// memory budget
struct ManagerObserver {
    manager: Weak<StoreManager>,
    statistics: Arc<FeedStatistics>,
}

impl FlushObserver for ManagerObserver {
    fn on_flush(&self, _feed_id: &str, report: &FlushReport) {
        self.statistics.record_flush(report);
        if let Some(manager) = self.manager.upgrade() {
            manager.check_memory();
        }
    }

    fn on_snapshot(&self, _feed_id: &str, report: &SnapshotReport) {
        self.statistics.record_updates(0, report.failed as u64);
        self.statistics
            .update_memory(report.snapshot_size, report.estimated_memory_bytes);
        if let Some(manager) = self.manager.upgrade() {
            manager.check_memory();
        }
    }

    fn on_rates(&self, _feed_id: &str, rates: &RateSample) {
        self.statistics.update_rates(rates.current, rates.average);
    }
}
