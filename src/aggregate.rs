//! # Aggregate Module
//!
//! Folds priced records into the daily, monthly, model and project views in
//! one pass, and re-folds detailed entries for filtered views.
//!
//! Every per-key update is a sum or a set union, so arrival order never
//! changes the result. Projects are folded independently and merged, which
//! keeps concurrent ingestion free of shared mutable state.

use chrono::{NaiveDate, SecondsFormat, TimeZone, Timelike};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Result, UsageError};
use crate::ingest::ProjectLogs;
use crate::models::{
    format_cost, DailyUsage, DetailedUsageEntry, HourlyUsage, ModelUsage, MonthlyUsage,
    ProjectSummary, UsageMetrics, UsageReport, UsageTotals,
};
use crate::pricing::PricingResolver;

/// Model key for records that carry usage but no model.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Running sums for one grouping key. Only [`Accumulator::finish`] exposes them.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    new_input: u64,
    cache_creation: u64,
    cache_read: u64,
    output: u64,
    cost: f64,
    sessions: HashSet<String>,
    messages: usize,
}

impl Accumulator {
    pub fn add(&mut self, metrics: &UsageMetrics, session_id: Option<&str>) {
        self.new_input = self.new_input.saturating_add(metrics.new_input_tokens);
        self.cache_creation = self.cache_creation.saturating_add(metrics.cache_creation_tokens);
        self.cache_read = self.cache_read.saturating_add(metrics.cache_read_tokens);
        self.output = self.output.saturating_add(metrics.output_tokens);
        self.cost += metrics.cost;
        if let Some(sid) = session_id {
            self.sessions.insert(sid.to_string());
        }
        self.messages += 1;
    }

    pub fn merge(&mut self, other: Accumulator) {
        self.new_input = self.new_input.saturating_add(other.new_input);
        self.cache_creation = self.cache_creation.saturating_add(other.cache_creation);
        self.cache_read = self.cache_read.saturating_add(other.cache_read);
        self.output = self.output.saturating_add(other.output);
        self.cost += other.cost;
        self.sessions.extend(other.sessions);
        self.messages += other.messages;
    }

    pub fn finish(&self) -> UsageTotals {
        let cached = self.cache_creation.saturating_add(self.cache_read);
        UsageTotals {
            input_tokens: self.new_input,
            output_tokens: self.output,
            cached_tokens: cached,
            total_tokens: self.new_input.saturating_add(cached).saturating_add(self.output),
            cost: self.cost,
            sessions: self.sessions.len(),
            messages: self.messages,
            new_input_tokens: self.new_input,
            cache_creation_tokens: self.cache_creation,
            cache_read_tokens: self.cache_read,
        }
    }
}

/// Day, month and model groupings plus the global session set.
///
/// The same fold runs for the primary pass and for every filtered re-slice.
#[derive(Debug, Clone, Default)]
pub struct UsageFold {
    daily: BTreeMap<String, Accumulator>,
    monthly: BTreeMap<String, Accumulator>,
    models: HashMap<String, Accumulator>,
    sessions: HashSet<String>,
    grand_total: Accumulator,
}

impl UsageFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: &DetailedUsageEntry) {
        let metrics = entry.metrics();
        let sid = entry.session_id.as_deref();
        self.daily
            .entry(entry.day_key())
            .or_default()
            .add(&metrics, sid);
        self.monthly
            .entry(entry.month_key())
            .or_default()
            .add(&metrics, sid);
        self.models
            .entry(entry.model.clone())
            .or_default()
            .add(&metrics, sid);
        if let Some(s) = sid {
            self.sessions.insert(s.to_string());
        }
        self.grand_total.add(&metrics, sid);
    }

    pub fn merge(&mut self, other: UsageFold) {
        for (k, acc) in other.daily {
            self.daily.entry(k).or_default().merge(acc);
        }
        for (k, acc) in other.monthly {
            self.monthly.entry(k).or_default().merge(acc);
        }
        for (k, acc) in other.models {
            self.models.entry(k).or_default().merge(acc);
        }
        self.sessions.extend(other.sessions);
        self.grand_total.merge(other.grand_total);
    }

    /// Totals over every folded record, independent of grouping.
    pub fn grand_total(&self) -> UsageTotals {
        self.grand_total.finish()
    }

    pub fn total_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Ascending by date.
    pub fn daily(&self) -> Vec<DailyUsage> {
        self.daily
            .iter()
            .map(|(k, acc)| DailyUsage::new(k.clone(), &acc.finish()))
            .collect()
    }

    /// Ascending by month; zero-padded keys sort chronologically.
    pub fn monthly(&self) -> Vec<MonthlyUsage> {
        self.monthly
            .iter()
            .map(|(k, acc)| MonthlyUsage::new(k.clone(), &acc.finish()))
            .collect()
    }

    /// Descending by total tokens, ties by model name.
    pub fn models(&self) -> Vec<ModelUsage> {
        let mut out: Vec<ModelUsage> = self
            .models
            .iter()
            .map(|(k, acc)| ModelUsage::new(k.clone(), &acc.finish()))
            .collect();
        out.sort_by(|a, b| {
            b.total_tokens
                .cmp(&a.total_tokens)
                .then_with(|| a.model.cmp(&b.model))
        });
        out
    }
}

/// Partial result for one project, produced independently of other projects.
#[derive(Debug, Clone, Default)]
pub struct ProjectFold {
    pub summary: ProjectSummary,
    pub fold: UsageFold,
    pub detailed: Vec<DetailedUsageEntry>,
    last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

/// Primary aggregation pass: prices records and folds them into all views.
#[derive(Debug)]
pub struct Aggregator<'a> {
    pricing: &'a PricingResolver,
    fold: UsageFold,
    projects: Vec<ProjectFold>,
    detailed: Vec<DetailedUsageEntry>,
}

impl<'a> Aggregator<'a> {
    pub fn new(pricing: &'a PricingResolver) -> Self {
        Aggregator {
            pricing,
            fold: UsageFold::new(),
            projects: Vec::new(),
            detailed: Vec::new(),
        }
    }

    /// Price and fold one project. Takes `&self` so projects can be folded
    /// concurrently and merged afterwards.
    pub fn fold_project(&self, logs: &ProjectLogs) -> ProjectFold {
        let mut fold = UsageFold::new();
        let mut detailed = Vec::new();
        let mut project_acc = Accumulator::default();

        for record in &logs.records {
            let (Some(ts), Some(usage)) = (record.timestamp, record.usage()) else {
                continue;
            };
            let model = record.model();
            let metrics = self.pricing.compute(usage, model);
            let entry = DetailedUsageEntry::new(
                ts,
                record.session_id().map(str::to_string),
                model.unwrap_or(UNKNOWN_MODEL).to_string(),
                &metrics,
            );
            fold.add(&entry);
            project_acc.add(&metrics, entry.session_id.as_deref());
            detailed.push(entry);
        }

        let totals = project_acc.finish();
        ProjectFold {
            summary: ProjectSummary {
                name: logs.name.clone(),
                path: logs.path.to_string_lossy().to_string(),
                total_tokens: totals.total_tokens,
                total_cost: format_cost(totals.cost),
                message_count: logs.message_count,
                last_activity: logs
                    .last_activity
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            },
            fold,
            detailed,
            last_activity: logs.last_activity,
        }
    }

    pub fn merge(&mut self, mut project: ProjectFold) {
        self.fold.merge(std::mem::take(&mut project.fold));
        self.detailed.append(&mut project.detailed);
        self.projects.push(project);
    }

    /// Finalize: counts sessions, formats costs, applies the documented orders.
    pub fn finish(self) -> UsageReport {
        let Aggregator {
            fold,
            mut projects,
            mut detailed,
            ..
        } = self;

        projects.sort_by(|a, b| match (a.last_activity, b.last_activity) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.summary.name.cmp(&b.summary.name)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.summary.name.cmp(&b.summary.name),
        });
        sort_detailed(&mut detailed);

        UsageReport {
            daily_usage: fold.daily(),
            monthly_usage: fold.monthly(),
            model_usage: fold.models(),
            projects: projects.into_iter().map(|p| p.summary).collect(),
            total_sessions: fold.total_sessions(),
            detailed_usage: detailed,
        }
    }
}

/// Chronological, with stable tie-breaks so repeated runs serialize identically.
pub fn sort_detailed(entries: &mut [DetailedUsageEntry]) {
    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.session_id.cmp(&b.session_id))
            .then_with(|| a.model.cmp(&b.model))
            .then_with(|| a.total_tokens.cmp(&b.total_tokens))
            .then_with(|| a.cost.total_cmp(&b.cost))
    });
}

/// Inclusive hour-of-day bounds; `None` is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HourRange {
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl HourRange {
    pub fn new(start: Option<u32>, end: Option<u32>) -> Result<Self> {
        let valid = start.is_none_or(|h| h <= 23)
            && end.is_none_or(|h| h <= 23)
            && match (start, end) {
                (Some(s), Some(e)) => s <= e,
                _ => true,
            };
        if !valid {
            return Err(UsageError::InvalidHourRange { start, end });
        }
        Ok(HourRange { start, end })
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, hour: u32) -> bool {
        self.start.is_none_or(|s| hour >= s) && self.end.is_none_or(|e| hour <= e)
    }
}

/// Inclusive calendar-day bounds (UTC days, matching the daily keys).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(UsageError::InvalidDateRange(format!("{s} is after {e}")));
            }
        }
        Ok(DateRange { start, end })
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, entry: &DetailedUsageEntry) -> bool {
        let day = entry.timestamp.date_naive();
        self.start.is_none_or(|s| day >= s) && self.end.is_none_or(|e| day <= e)
    }
}

/// Re-fold detailed entries whose local hour lies in `hours`, grouped per day.
pub fn fold_filtered<Tz: TimeZone>(
    entries: &[DetailedUsageEntry],
    dates: DateRange,
    hours: HourRange,
    tz: &Tz,
) -> UsageFold {
    let mut fold = UsageFold::new();
    for entry in entries {
        if !dates.contains(entry) {
            continue;
        }
        if !hours.is_unbounded() && !hours.contains(local_hour(entry, tz)) {
            continue;
        }
        fold.add(entry);
    }
    fold
}

/// Daily view restricted to an hour-of-day window.
pub fn daily_for_hours<Tz: TimeZone>(
    entries: &[DetailedUsageEntry],
    hours: HourRange,
    tz: &Tz,
) -> Vec<DailyUsage> {
    fold_filtered(entries, DateRange::default(), hours, tz).daily()
}

/// Hour-of-day profile over the entries inside `dates`, ascending by hour.
pub fn hourly_profile<Tz: TimeZone>(
    entries: &[DetailedUsageEntry],
    dates: DateRange,
    tz: &Tz,
) -> Vec<HourlyUsage> {
    let mut buckets: BTreeMap<u32, Accumulator> = BTreeMap::new();
    for entry in entries.iter().filter(|e| dates.contains(e)) {
        buckets
            .entry(local_hour(entry, tz))
            .or_default()
            .add(&entry.metrics(), entry.session_id.as_deref());
    }
    buckets
        .iter()
        .map(|(h, acc)| HourlyUsage::new(*h, &acc.finish()))
        .collect()
}

fn local_hour<Tz: TimeZone>(entry: &DetailedUsageEntry, tz: &Tz) -> u32 {
    entry.timestamp.with_timezone(tz).hour()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn entry(ts: &str, sid: Option<&str>, model: &str, input: u64, output: u64) -> DetailedUsageEntry {
        let metrics = UsageMetrics {
            new_input_tokens: input,
            output_tokens: output,
            total_tokens: input.saturating_add(output),
            cost: (input as f64 + output as f64) * 1e-6,
            ..Default::default()
        };
        DetailedUsageEntry::new(
            DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc),
            sid.map(str::to_string),
            model.to_string(),
            &metrics,
        )
    }

    fn sample() -> Vec<DetailedUsageEntry> {
        vec![
            entry("2025-01-01T10:00:00Z", Some("s1"), "m-a", 100, 10),
            entry("2025-01-01T23:30:00Z", Some("s2"), "m-b", 200, 20),
            entry("2025-01-31T05:00:00Z", None, "m-a", 300, 30),
            entry("2025-02-01T05:00:00Z", Some("s1"), "m-b", 400, 40),
        ]
    }

    #[test]
    fn test_order_does_not_matter() {
        let mut forward = UsageFold::new();
        sample().iter().for_each(|e| forward.add(e));
        let mut backward = UsageFold::new();
        sample().iter().rev().for_each(|e| backward.add(e));
        assert_eq!(forward.daily(), backward.daily());
        assert_eq!(forward.monthly(), backward.monthly());
        assert_eq!(forward.models(), backward.models());
    }

    #[test]
    fn test_merge_equals_single_fold() {
        let entries = sample();
        let mut whole = UsageFold::new();
        entries.iter().for_each(|e| whole.add(e));

        let mut left = UsageFold::new();
        let mut right = UsageFold::new();
        entries[..2].iter().for_each(|e| left.add(e));
        entries[2..].iter().for_each(|e| right.add(e));
        left.merge(right);

        assert_eq!(whole.daily(), left.daily());
        assert_eq!(whole.models(), left.models());
        assert_eq!(whole.total_sessions(), left.total_sessions());
    }

    #[test]
    fn test_groupings_sum_to_grand_total() {
        let mut fold = UsageFold::new();
        sample().iter().for_each(|e| fold.add(e));
        let grand = fold.grand_total().total_tokens;
        assert_eq!(grand, 1100);
        assert_eq!(fold.daily().iter().map(|d| d.total_tokens).sum::<u64>(), grand);
        assert_eq!(fold.monthly().iter().map(|d| d.total_tokens).sum::<u64>(), grand);
        assert_eq!(fold.models().iter().map(|d| d.total_tokens).sum::<u64>(), grand);
    }

    #[test]
    fn test_sort_orders() {
        let mut fold = UsageFold::new();
        sample().iter().for_each(|e| fold.add(e));
        let days: Vec<String> = fold.daily().into_iter().map(|d| d.date).collect();
        assert_eq!(days, vec!["2025-01-01", "2025-01-31", "2025-02-01"]);
        let months: Vec<String> = fold.monthly().into_iter().map(|m| m.month).collect();
        assert_eq!(months, vec!["2025-01", "2025-02"]);
        let models: Vec<String> = fold.models().into_iter().map(|m| m.model).collect();
        assert_eq!(models, vec!["m-b", "m-a"]);
    }

    #[test]
    fn test_missing_session_excluded_from_count() {
        let mut fold = UsageFold::new();
        sample().iter().for_each(|e| fold.add(e));
        assert_eq!(fold.total_sessions(), 2);
        let jan31 = fold.daily().into_iter().find(|d| d.date == "2025-01-31").unwrap();
        assert_eq!(jan31.sessions, 0);
        assert_eq!(jan31.total_tokens, 330);
    }

    #[test]
    fn test_sums_saturate_instead_of_wrapping() {
        let huge = entry("2025-01-01T10:00:00Z", Some("s1"), "m-a", u64::MAX, 0);
        let small = entry("2025-01-01T11:00:00Z", Some("s2"), "m-a", 5, 5);

        let mut left = UsageFold::new();
        left.add(&huge);
        left.add(&small);
        let mut right = UsageFold::new();
        right.add(&huge);
        left.merge(right);

        let grand = left.grand_total();
        assert_eq!(grand.input_tokens, u64::MAX);
        assert_eq!(grand.total_tokens, u64::MAX);
        assert_eq!(left.daily()[0].total_tokens, u64::MAX);
        assert_eq!(left.models()[0].messages, 3);
    }

    #[test]
    fn test_hour_range_validation() {
        assert!(HourRange::new(Some(0), Some(23)).is_ok());
        assert!(HourRange::new(Some(24), None).is_err());
        assert!(HourRange::new(None, Some(30)).is_err());
        assert!(HourRange::new(Some(18), Some(12)).is_err());
        let r = HourRange::new(Some(12), None).unwrap();
        assert!(r.contains(12) && r.contains(23) && !r.contains(11));
    }

    #[test]
    fn test_daily_for_hours_uses_local_hour() {
        let entries = sample();
        let hours = HourRange::new(Some(9), Some(12)).unwrap();
        let days = daily_for_hours(&entries, hours, &Utc);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, "2025-01-01");
        assert_eq!(days[0].total_tokens, 110);

        // At UTC+2 the 10:00Z record is 12:00 local, the 23:30Z one is 01:30
        let plus_two = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let days = daily_for_hours(&entries, hours, &plus_two);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].total_tokens, 110);
        let early = HourRange::new(Some(0), Some(2)).unwrap();
        let days = daily_for_hours(&entries, early, &plus_two);
        assert_eq!(days.len(), 1);
        // still keyed by the UTC day
        assert_eq!(days[0].date, "2025-01-01");
        assert_eq!(days[0].total_tokens, 220);
    }

    #[test]
    fn test_unbounded_filter_matches_primary_fold() {
        let entries = sample();
        let mut fold = UsageFold::new();
        entries.iter().for_each(|e| fold.add(e));
        let refolded = fold_filtered(&entries, DateRange::default(), HourRange::default(), &Utc);
        assert_eq!(fold.daily(), refolded.daily());
    }

    #[test]
    fn test_date_range() {
        let entries = sample();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 2),
            NaiveDate::from_ymd_opt(2025, 1, 31),
        )
        .unwrap();
        let fold = fold_filtered(&entries, range, HourRange::default(), &Utc);
        assert_eq!(fold.grand_total().total_tokens, 330);
        assert!(DateRange::new(NaiveDate::from_ymd_opt(2025, 2, 1), NaiveDate::from_ymd_opt(2025, 1, 1)).is_err());
    }

    #[test]
    fn test_hourly_profile() {
        let profile = hourly_profile(&sample(), DateRange::default(), &Utc);
        let hours: Vec<u32> = profile.iter().map(|h| h.hour).collect();
        assert_eq!(hours, vec![5, 10, 23]);
        let five = &profile[0];
        assert_eq!(five.requests, 2);
        assert_eq!(five.total_tokens, 770);
        assert!((five.avg_tokens_per_request - 385.0).abs() < 1e-9);
    }
}
