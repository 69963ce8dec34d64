//! Human-readable metrics exports
//!
//! Both formats are debugging snapshots with a fixed field order so two
//! exports diff cleanly. They are not meant to be parsed back.

use serde::Serialize;

use crate::error::Result;
use crate::types::FeedMetrics;

/// Derived percentages and peaks appended to an export
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    /// Share of received updates that were not failed, in percent
    pub success_rate: f64,
    /// Share of received updates that were conflated away, in percent
    pub conflation_rate: f64,
    pub peak_rate: f64,
}

/// JSON export envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsExport<'a> {
    /// RFC 3339
    pub exported_at: String,
    pub feed_id: &'a str,
    pub metrics: &'a FeedMetrics,
    pub summary: ExportSummary,
}

impl MetricsExport<'_> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `metric,value` lines, header first
    pub fn to_csv(&self) -> String {
        let m = self.metrics;
        let last_update = m
            .last_update_timestamp
            .map(|ts| ts.to_string())
            .unwrap_or_default();
        let snapshot_duration = m
            .snapshot_duration_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default();
        let last_error = m
            .last_error
            .as_ref()
            .map(|e| csv_field(&format!("{}: {}", e.kind, e.message)))
            .unwrap_or_default();

        let rows: [(&str, String); 24] = [
            ("exportedAt", self.exported_at.clone()),
            ("feedId", csv_field(self.feed_id)),
            ("totalUpdatesReceived", m.total_updates_received.to_string()),
            ("updatesApplied", m.updates_applied.to_string()),
            ("updatesConflated", m.updates_conflated.to_string()),
            ("failedUpdates", m.failed_updates.to_string()),
            ("conflationRatio", m.conflation_ratio.to_string()),
            ("currentUpdateRate", m.current_update_rate.to_string()),
            ("averageUpdateRate", m.average_update_rate.to_string()),
            ("peakUpdateRate", m.peak_update_rate.to_string()),
            ("averageLatencyMs", m.average_latency_ms.to_string()),
            ("lastUpdateTimestamp", last_update),
            ("snapshotSize", m.snapshot_size.to_string()),
            ("memoryUsageMB", format!("{:.2}", m.memory_usage_mb)),
            ("snapshotRows", m.snapshot_rows.to_string()),
            ("snapshotBytes", m.snapshot_bytes.to_string()),
            ("snapshotDurationMs", snapshot_duration),
            ("connectionUptimeSecs", m.connection_uptime_secs.to_string()),
            ("reconnectCount", m.reconnect_count.to_string()),
            ("errorCount", m.error_count.to_string()),
            ("lastError", last_error),
            ("successRate", self.summary.success_rate.to_string()),
            ("conflationRate", self.summary.conflation_rate.to_string()),
            ("peakRate", self.summary.peak_rate.to_string()),
        ];

        let mut out = String::from("metric,value\n");
        for (name, value) in rows {
            out.push_str(name);
            out.push(',');
            out.push_str(&value);
            out.push('\n');
        }
        out
    }
}

/// Quote a value containing separators
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
