//! Registry entries and strict LRU ordering.
//!
//! Access recency is a monotonic tick rather than a wall clock, so two
//! accesses in the same millisecond still have a defined order. Ties, which
//! the tick makes impossible in practice, fall back to registration order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::statistics::FeedStatistics;
use crate::store::ConflationStore;
use crate::types::FeedConfig;

/// Why a store left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Registry was at `max_stores` when a new feed was created
    Capacity,
    /// Estimated memory exceeded the budget
    Memory,
    /// Removed by the caller
    Removed,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Capacity => write!(f, "capacity"),
            EvictionReason::Memory => write!(f, "memory"),
            EvictionReason::Removed => write!(f, "removed"),
        }
    }
}

/// One feed's store and statistics pair, with the config it was created from.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub store: Arc<ConflationStore>,
    pub statistics: Arc<FeedStatistics>,
    pub feed_config: FeedConfig,
    last_access: u64,
    registration: u64,
}

impl RegistryEntry {
    fn recency(&self) -> (u64, u64) {
        (self.last_access, self.registration)
    }
}

/// Feed id to entry map with access ticks.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, RegistryEntry>,
    tick: u64,
    registrations: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Register a pair under `feed_config.id` as the most recently used entry.
    pub fn insert(
        &mut self,
        feed_config: FeedConfig,
        store: Arc<ConflationStore>,
        statistics: Arc<FeedStatistics>,
    ) {
        let last_access = self.next_tick();
        self.registrations += 1;
        let feed_id = feed_config.id.clone();
        let entry = RegistryEntry {
            store,
            statistics,
            feed_config,
            last_access,
            registration: self.registrations,
        };
        self.entries.insert(feed_id, entry);
    }

    /// Look up an entry and mark it most recently used.
    pub fn touch(&mut self, feed_id: &str) -> Option<&RegistryEntry> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(feed_id)?;
        entry.last_access = tick;
        Some(entry)
    }

    /// Look up an entry without affecting recency.
    pub fn peek(&self, feed_id: &str) -> Option<&RegistryEntry> {
        self.entries.get(feed_id)
    }

    pub fn remove(&mut self, feed_id: &str) -> Option<RegistryEntry> {
        self.entries.remove(feed_id)
    }

    /// Least recently used feed id.
    pub fn lru(&self) -> Option<&str> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency())
            .map(|(id, _)| id.as_str())
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(String, RegistryEntry)> {
        let id = self.lru()?.to_string();
        self.entries.remove(&id).map(|entry| (id, entry))
    }

    /// Feed ids from least to most recently used.
    pub fn ids_by_recency(&self) -> Vec<String> {
        let mut ids: Vec<(&String, (u64, u64))> = self
            .entries
            .iter()
            .map(|(id, entry)| (id, entry.recency()))
            .collect();
        ids.sort_by_key(|(_, recency)| *recency);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<(String, RegistryEntry)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
