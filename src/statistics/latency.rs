//! Bounded latency sample window

use std::collections::VecDeque;

use crate::utils::round1;

/// Samples kept for latency averaging
pub const LATENCY_WINDOW: usize = 100;

/// Sliding window over the most recent latency samples
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl LatencyWindow {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a sample and return the updated mean (one decimal)
    pub fn record(&mut self, latency_ms: f64) -> f64 {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            return self.average();
        }
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
        self.average()
    }

    /// Arithmetic mean of the window rounded to one decimal, 0 when empty
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().sum();
        round1(sum / self.samples.len() as f64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(LATENCY_WINDOW)
    }
}
