//! Utility functions and helpers
//!
//! Timestamp helpers and the whole-value publication cell used for metrics.

pub mod published;
pub mod time;

pub use published::Published;
pub use time::{elapsed_ms, now_millis, now_rfc3339, round1};
