//! Data types shared by stores, statistics and the manager
//!
//! This module contains rows, operations, metrics and the feed event contract.

mod feed;
mod metrics;
mod operation;
mod row;

pub use feed::{FeedConfig, FeedEvent};
pub use metrics::{ErrorDetail, ErrorKind, FeedMetrics};
pub use operation::{KeyedOperation, UpdateKind, UpdateOperation};
pub use row::{extract_key, row_from_value, Row, RowKey};
