//! End-to-end request timing, emitted as one JSON line per inference.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceLog {
    /// Timestamp (ISO 8601, UTC).
    pub ts: String,
    /// Operation name ("proofread" or "translate").
    pub op: String,
    /// Encoder pass duration in milliseconds.
    pub encode_ms: u64,
    /// Decode loop duration in milliseconds.
    pub decode_ms: u64,
    /// Decoder invocations performed.
    pub steps: usize,
    pub total_ms: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_len: Option<usize>,
}

impl InferenceLog {
    pub fn new(
        op: String,
        encode_ms: u64,
        decode_ms: u64,
        steps: usize,
        total_ms: u64,
        ok: bool,
    ) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            ts: format_iso8601(secs),
            op,
            encode_ms,
            decode_ms,
            steps,
            total_ms,
            ok,
            input_len: None,
            output_len: None,
        }
    }

    pub fn with_lengths(mut self, input_len: usize, output_len: usize) -> Self {
        self.input_len = Some(input_len);
        self.output_len = Some(output_len);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Unix seconds to ISO 8601, UTC only, no leap-second handling.
fn format_iso8601(secs: u64) -> String {
    let days = secs / 86400;
    let secs_in_day = secs % 86400;

    let mut year = 1970;
    let mut day_of_year = days as i64;
    loop {
        let is_leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
        let days_in_year = if is_leap { 366 } else { 365 };
        if day_of_year >= days_in_year {
            year += 1;
            day_of_year -= days_in_year;
        } else {
            break;
        }
    }

    let month_days = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let is_leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
    let mut month = 1;
    let mut day = day_of_year as u32 + 1;
    for &base in &month_days {
        let days_in_month = if month == 2 && is_leap { base + 1 } else { base };
        if day > days_in_month {
            day -= days_in_month;
            month += 1;
        } else {
            break;
        }
    }

    let hour = (secs_in_day / 3600) as u32;
    let minute = ((secs_in_day % 3600) / 60) as u32;
    let second = (secs_in_day % 60) as u32;

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

pub struct PerformanceLogger {
    enabled: bool,
}

impl PerformanceLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn log(&self, log: &InferenceLog) {
        if !self.enabled {
            return;
        }
        println!("[PERF] {}", log.to_json());
    }
}

impl Default for PerformanceLogger {
    fn default() -> Self {
        Self { enabled: true }
    }
}
