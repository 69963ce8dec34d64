//! Time and rounding helpers

/// Current Unix timestamp in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current time as an RFC 3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Milliseconds elapsed from `earlier` to `later`, never negative
pub fn elapsed_ms(earlier: i64, later: i64) -> u64 {
    later.saturating_sub(earlier).max(0) as u64
}
