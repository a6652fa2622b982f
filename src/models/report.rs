//! The aggregate contract shared by the in-process pipeline and the external
//! processor. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use super::entry::DetailedUsageEntry;

/// Finalized sums for one grouping key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub sessions: usize,
    pub messages: usize,
    pub new_input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

/// Cost rendered with four decimals, the only place rounding happens.
pub fn format_cost(cost: f64) -> String {
    format!("{cost:.4}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    pub cost: String,
    pub sessions: usize,
    pub new_input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl DailyUsage {
    pub fn new(date: String, t: &UsageTotals) -> Self {
        DailyUsage {
            date,
            input_tokens: t.input_tokens,
            output_tokens: t.output_tokens,
            cached_tokens: t.cached_tokens,
            total_tokens: t.total_tokens,
            cost: format_cost(t.cost),
            sessions: t.sessions,
            new_input_tokens: t.new_input_tokens,
            cache_creation_tokens: t.cache_creation_tokens,
            cache_read_tokens: t.cache_read_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyUsage {
    pub month: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    pub cost: String,
    pub sessions: usize,
    pub messages: usize,
    pub new_input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl MonthlyUsage {
    pub fn new(month: String, t: &UsageTotals) -> Self {
        MonthlyUsage {
            month,
            input_tokens: t.input_tokens,
            output_tokens: t.output_tokens,
            cached_tokens: t.cached_tokens,
            total_tokens: t.total_tokens,
            cost: format_cost(t.cost),
            sessions: t.sessions,
            messages: t.messages,
            new_input_tokens: t.new_input_tokens,
            cache_creation_tokens: t.cache_creation_tokens,
            cache_read_tokens: t.cache_read_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    pub cost: String,
    pub sessions: usize,
    pub messages: usize,
    pub new_input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl ModelUsage {
    pub fn new(model: String, t: &UsageTotals) -> Self {
        ModelUsage {
            model,
            input_tokens: t.input_tokens,
            output_tokens: t.output_tokens,
            cached_tokens: t.cached_tokens,
            total_tokens: t.total_tokens,
            cost: format_cost(t.cost),
            sessions: t.sessions,
            messages: t.messages,
            new_input_tokens: t.new_input_tokens,
            cache_creation_tokens: t.cache_creation_tokens,
            cache_read_tokens: t.cache_read_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub name: String,
    pub path: String,
    pub total_tokens: u64,
    pub total_cost: String,
    pub message_count: usize,
    /// RFC 3339, max record timestamp seen in the project
    pub last_activity: Option<String>,
}

/// Hour-of-day bucket over detailed entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourlyUsage {
    pub hour: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    pub cost: String,
    pub sessions: usize,
    pub requests: usize,
    pub avg_cost_per_request: f64,
    pub avg_tokens_per_request: f64,
}

impl HourlyUsage {
    pub fn new(hour: u32, t: &UsageTotals) -> Self {
        let requests = t.messages;
        let (avg_cost, avg_tokens) = if requests > 0 {
            (
                t.cost / requests as f64,
                t.total_tokens as f64 / requests as f64,
            )
        } else {
            (0.0, 0.0)
        };
        HourlyUsage {
            hour,
            input_tokens: t.input_tokens,
            output_tokens: t.output_tokens,
            cached_tokens: t.cached_tokens,
            total_tokens: t.total_tokens,
            cost: format_cost(t.cost),
            sessions: t.sessions,
            requests,
            avg_cost_per_request: avg_cost,
            avg_tokens_per_request: avg_tokens,
        }
    }
}

/// Grand totals over every record a query keeps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_tokens: u64,
    pub total_cost: String,
    pub total_sessions: usize,
    pub total_messages: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub project_count: usize,
    pub last_activity: Option<String>,
}

impl UsageSummary {
    pub fn new(
        t: &UsageTotals,
        total_sessions: usize,
        project_count: usize,
        last_activity: Option<String>,
    ) -> Self {
        UsageSummary {
            total_tokens: t.total_tokens,
            total_cost: format_cost(t.cost),
            total_sessions,
            total_messages: t.messages,
            input_tokens: t.input_tokens,
            output_tokens: t.output_tokens,
            cached_tokens: t.cached_tokens,
            project_count,
            last_activity,
        }
    }
}

/// Full output of one aggregation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub daily_usage: Vec<DailyUsage>,
    pub monthly_usage: Vec<MonthlyUsage>,
    pub model_usage: Vec<ModelUsage>,
    pub projects: Vec<ProjectSummary>,
    pub detailed_usage: Vec<DetailedUsageEntry>,
    pub total_sessions: usize,
}

impl UsageReport {
    pub fn total_tokens(&self) -> u64 {
        self.daily_usage
            .iter()
            .fold(0u64, |acc, d| acc.saturating_add(d.total_tokens))
    }
}
