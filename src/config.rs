//! Store and manager configuration
//!
//! Values come from explicit construction, from serde (camelCase keys as a
//! UI would send them) or from `CONFLATION_*` environment variables.
//! Every config is validated before it takes effect.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConflationError, Result};

/// Default conflation window
pub const DEFAULT_WINDOW_MS: u64 = 100;
/// Default cap on operations applied per window
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
/// Longest accepted window
pub const MAX_WINDOW_MS: u64 = 60_000;
/// Default store count bound
pub const DEFAULT_MAX_STORES: usize = 10;
/// Default total memory budget
pub const DEFAULT_MEMORY_LIMIT_MB: f64 = 500.0;
/// Default per-row size estimate used for memory accounting
pub const DEFAULT_ROW_SIZE_BYTES: usize = 1024;

/// Per-store conflation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflationConfig {
    pub window_ms: u64,
    pub max_batch_size: usize,
    pub enable_metrics: bool,
}

impl Default for ConflationConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            enable_metrics: true,
        }
    }
}

impl ConflationConfig {
    /// Create a validated config
    pub fn new(window_ms: u64, max_batch_size: usize, enable_metrics: bool) -> Result<Self> {
        let config = Self {
            window_ms,
            max_batch_size,
            enable_metrics,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `CONFLATION_WINDOW_MS`, `CONFLATION_MAX_BATCH_SIZE` and
    /// `CONFLATION_ENABLE_METRICS`, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            window_ms: env_or("CONFLATION_WINDOW_MS", "windowMs", defaults.window_ms)?,
            max_batch_size: env_or(
                "CONFLATION_MAX_BATCH_SIZE",
                "maxBatchSize",
                defaults.max_batch_size,
            )?,
            enable_metrics: env_or(
                "CONFLATION_ENABLE_METRICS",
                "enableMetrics",
                defaults.enable_metrics,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(ConflationError::invalid("windowMs", "must be greater than zero"));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(ConflationError::invalid(
                "windowMs",
                format!("must not exceed {}ms", MAX_WINDOW_MS),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConflationError::invalid(
                "maxBatchSize",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Window length as a `Duration`
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Merge a partial update, validating the result without modifying `self`
    pub fn merged(&self, update: &ConflationConfigUpdate) -> Result<Self> {
        let merged = Self {
            window_ms: update.window_ms.unwrap_or(self.window_ms),
            max_batch_size: update.max_batch_size.unwrap_or(self.max_batch_size),
            enable_metrics: update.enable_metrics.unwrap_or(self.enable_metrics),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial conflation settings for live reconfiguration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflationConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_metrics: Option<bool>,
}

impl ConflationConfigUpdate {
    pub fn window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = Some(window_ms);
        self
    }

    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = Some(max_batch_size);
        self
    }

    pub fn enable_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = Some(enable_metrics);
        self
    }
}

/// Registry bounds for the store manager
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    pub max_stores: usize,
    #[serde(rename = "memoryLimitMB")]
    pub memory_limit_mb: f64,
    /// Estimated bytes per snapshot row for memory accounting
    #[serde(default = "default_row_size")]
    pub average_row_size_bytes: usize,
    /// Conflation settings for feeds that do not carry their own
    #[serde(default)]
    pub default_conflation: ConflationConfig,
}

fn default_row_size() -> usize {
    DEFAULT_ROW_SIZE_BYTES
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_stores: DEFAULT_MAX_STORES,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            average_row_size_bytes: DEFAULT_ROW_SIZE_BYTES,
            default_conflation: ConflationConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a validated config with default row size and conflation settings
    pub fn new(max_stores: usize, memory_limit_mb: f64) -> Result<Self> {
        let config = Self {
            max_stores,
            memory_limit_mb,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `CONFLATION_MAX_STORES`, `CONFLATION_MEMORY_LIMIT_MB`,
    /// `CONFLATION_ROW_SIZE_BYTES` plus the store-level variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            max_stores: env_or("CONFLATION_MAX_STORES", "maxStores", defaults.max_stores)?,
            memory_limit_mb: env_or(
                "CONFLATION_MEMORY_LIMIT_MB",
                "memoryLimitMB",
                defaults.memory_limit_mb,
            )?,
            average_row_size_bytes: env_or(
                "CONFLATION_ROW_SIZE_BYTES",
                "averageRowSizeBytes",
                defaults.average_row_size_bytes,
            )?,
            default_conflation: ConflationConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_stores == 0 {
            return Err(ConflationError::invalid("maxStores", "must be at least 1"));
        }
        if !self.memory_limit_mb.is_finite() || self.memory_limit_mb <= 0.0 {
            return Err(ConflationError::invalid(
                "memoryLimitMB",
                "must be a positive number",
            ));
        }
        if self.average_row_size_bytes == 0 {
            return Err(ConflationError::invalid(
                "averageRowSizeBytes",
                "must be greater than zero",
            ));
        }
        self.default_conflation.validate()
    }

    /// Memory budget in bytes
    pub fn memory_limit_bytes(&self) -> f64 {
        self.memory_limit_mb * 1024.0 * 1024.0
    }
}

/// Read and parse an environment variable, defaulting when unset
fn env_or<T: FromStr>(var: &str, field: &'static str, default: T) -> Result<T> {
    match env::var(var) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConflationError::invalid(field, format!("cannot parse {}={:?}", var, raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflation_defaults() {
        let config = ConflationConfig::default();
        assert_eq!(config.window_ms, 100);
        assert_eq!(config.max_batch_size, 1000);
        assert!(config.enable_metrics);
        assert_eq!(config.window(), Duration::from_millis(100));
    }

    #[test]
    fn test_conflation_validation() {
        assert!(ConflationConfig::new(0, 10, true).is_err());
        assert!(ConflationConfig::new(10, 0, true).is_err());
        assert!(ConflationConfig::new(MAX_WINDOW_MS + 1, 10, true).is_err());
        assert!(ConflationConfig::new(50, 10, false).is_ok());
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let base = ConflationConfig::default();
        let merged = base
            .merged(&ConflationConfigUpdate::default().window_ms(250))
            .unwrap();
        assert_eq!(merged.window_ms, 250);
        assert_eq!(merged.max_batch_size, base.max_batch_size);
        assert_eq!(merged.enable_metrics, base.enable_metrics);
    }

    #[test]
    fn test_merge_rejects_invalid() {
        let base = ConflationConfig::default();
        let err = base
            .merged(&ConflationConfigUpdate::default().max_batch_size(0))
            .unwrap_err();
        assert!(matches!(
            err,
            ConflationError::InvalidConfig { field: "maxBatchSize", .. }
        ));
    }

    #[test]
    fn test_manager_defaults_and_validation() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_stores, 10);
        assert_eq!(config.memory_limit_mb, 500.0);
        assert!(ManagerConfig::new(0, 100.0).is_err());
        assert!(ManagerConfig::new(2, 0.0).is_err());
        assert!(ManagerConfig::new(2, f64::NAN).is_err());
        assert!(ManagerConfig::new(2, 1.5).is_ok());
    }

    #[test]
    fn test_manager_config_deserialize() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"maxStores":3,"memoryLimitMB":64}"#).unwrap();
        assert_eq!(config.max_stores, 3);
        assert_eq!(config.memory_limit_mb, 64.0);
        assert_eq!(config.average_row_size_bytes, DEFAULT_ROW_SIZE_BYTES);
    }

    #[test]
    fn test_env_or_parses_and_defaults() {
        std::env::set_var("CONFLATION_TEST_ONLY_VALUE", "42");
        let parsed: u64 = env_or("CONFLATION_TEST_ONLY_VALUE", "test", 7).unwrap();
        assert_eq!(parsed, 42);

        std::env::set_var("CONFLATION_TEST_ONLY_BAD", "not-a-number");
        assert!(env_or::<u64>("CONFLATION_TEST_ONLY_BAD", "test", 7).is_err());

        let fallback: u64 = env_or("CONFLATION_TEST_ONLY_UNSET", "test", 7).unwrap();
        assert_eq!(fallback, 7);
    }
}
