//! Update-rate tracking over a rolling ten-second window

use std::collections::VecDeque;

/// Span of the rolling receipt window
pub const RATE_WINDOW_MS: i64 = 10_000;

/// Weight kept from the previous average on each sample
const EMA_SMOOTHING: f64 = 0.9;

/// Elapsed-time floor so a burst inside one millisecond is not infinite
const MIN_ELAPSED_MS: i64 = 1_000;

/// Rates computed at one sampling instant, operations per second
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateSample {
    pub current: f64,
    pub average: f64,
    pub peak: f64,
}

/// Receipt-timestamp window with current, smoothed and peak rates
#[derive(Debug, Default)]
pub struct RateTracker {
    /// (receipt ms, operations received at that ms)
    receipts: VecDeque<(i64, u64)>,
    in_window: u64,
    average: Option<f64>,
    peak: f64,
    last: RateSample,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` operations received at `timestamp_ms`
    pub fn record(&mut self, timestamp_ms: i64, count: u64) {
        if count == 0 {
            return;
        }
        match self.receipts.back_mut() {
            Some((ts, n)) if *ts == timestamp_ms => *n += count,
            _ => self.receipts.push_back((timestamp_ms, count)),
        }
        self.in_window += count;
    }

    /// Expire old receipts and recompute the rates as of `now_ms`
    pub fn sample(&mut self, now_ms: i64) -> RateSample {
        let cutoff = now_ms - RATE_WINDOW_MS;
        while let Some(&(ts, n)) = self.receipts.front() {
            if ts > cutoff {
                break;
            }
            self.receipts.pop_front();
            self.in_window -= n;
        }

        let current = match self.receipts.front() {
            Some(&(oldest, _)) => {
                let elapsed_ms = (now_ms - oldest).max(MIN_ELAPSED_MS);
                self.in_window as f64 / (elapsed_ms as f64 / 1000.0)
            }
            None => 0.0,
        };

        let average = match self.average {
            Some(previous) => previous * EMA_SMOOTHING + current * (1.0 - EMA_SMOOTHING),
            None => current,
        };
        self.average = Some(average);
        self.peak = self.peak.max(current);

        self.last = RateSample {
            current,
            average,
            peak: self.peak,
        };
        self.last
    }

    /// Rates from the most recent sample
    pub fn last(&self) -> RateSample {
        self.last
    }

    /// Operations still inside the rolling window
    pub fn in_window(&self) -> u64 {
        self.in_window
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
