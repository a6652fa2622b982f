use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token breakdown and cost derived from one record.
///
/// `total_tokens` is always the sum of the four categories.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageMetrics {
    pub new_input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

impl UsageMetrics {
    pub fn cached_tokens(&self) -> u64 {
        self.cache_creation_tokens.saturating_add(self.cache_read_tokens)
    }
}

/// Flattened per-record row kept for re-slicing (hour filters, date ranges).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailedUsageEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub new_input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl DetailedUsageEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        session_id: Option<String>,
        model: String,
        metrics: &UsageMetrics,
    ) -> Self {
        DetailedUsageEntry {
            timestamp,
            session_id,
            model,
            input_tokens: metrics.new_input_tokens,
            output_tokens: metrics.output_tokens,
            cached_tokens: metrics.cached_tokens(),
            total_tokens: metrics.total_tokens,
            cost: metrics.cost,
            new_input_tokens: metrics.new_input_tokens,
            cache_creation_tokens: metrics.cache_creation_tokens,
            cache_read_tokens: metrics.cache_read_tokens,
        }
    }

    pub fn metrics(&self) -> UsageMetrics {
        UsageMetrics {
            new_input_tokens: self.new_input_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
            cache_read_tokens: self.cache_read_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
            cost: self.cost,
        }
    }

    /// UTC calendar day, `YYYY-MM-DD`.
    pub fn day_key(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    /// UTC calendar month, `YYYY-MM`.
    pub fn month_key(&self) -> String {
        self.timestamp.format("%Y-%m").to_string()
    }
}
