//! Feed Conflation
//!
//! Windowed conflation of high-rate row updates for real-time grids.
//! Operations are buffered per feed for a short window, collapsed to one
//! net operation per row key, applied to an in-memory snapshot and handed
//! to subscribers as a single batch.
//!
//! # Features
//!
//! - **Key-scoped conflation**: last write wins, Add+Remove pairs cancel
//! - **Bounded batches**: at most `max_batch_size` operations per window
//! - **Live metrics**: throughput, conflation ratio, latency, memory
//! - **Bounded registry**: LRU eviction by store count and memory budget
//! - **Exports**: JSON and CSV statistics snapshots for debugging
//!
//! # Modules
//!
//! - `types`: Rows, operations, metrics and the feed event contract
//! - `config`: Store and manager configuration, environment loading
//! - `store`: The conflation store and its window pipeline
//! - `statistics`: Per-feed statistics aggregator and exports
//! - `manager`: Store registry with LRU and memory eviction
//! - `feed`: Bridge from provider events to a store and its statistics
//! - `utils`: Clock helpers and the metrics publication cell
//!
//! # Example
//!
//! ```no_run
//! use feed_conflation::{FeedConfig, ManagerConfig, StoreManager, UpdateKind};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> feed_conflation::Result<()> {
//!     let manager = StoreManager::new(ManagerConfig::default())?;
//!     let store = manager.create_store(FeedConfig::new("fx-spot", "symbol"))?;
//!
//!     let mut batches = store.subscribe();
//!     let row = json!({ "symbol": "EURUSD", "bid": 1.0842 });
//!     if let serde_json::Value::Object(row) = row {
//!         store.add_update(row, UpdateKind::Add)?;
//!     }
//!
//!     let batch = batches.recv().await;
//!     println!("{:?}", batch);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod manager;
pub mod statistics;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use config::{ConflationConfig, ConflationConfigUpdate, ManagerConfig};
pub use error::{ConflationError, Result};
pub use feed::FeedBridge;
pub use manager::StoreManager;
pub use statistics::FeedStatistics;
pub use store::{ConflationStore, FlushReport, StoreEvent, StoreMessage};
pub use types::{
    FeedConfig, FeedEvent, FeedMetrics, KeyedOperation, Row, RowKey, UpdateKind,
    UpdateOperation,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
