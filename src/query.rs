//! Report queries: which view, over which dates and hours.
//!
//! A query is applied to a finished [`UsageReport`]. Unfiltered day, month
//! and model views come straight from the report; filtered ones are re-folded
//! from `detailedUsage` with the same fold as the primary pass.

use chrono::{NaiveDate, SecondsFormat, TimeZone, Timelike};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::aggregate::{fold_filtered, hourly_profile, sort_detailed, DateRange, HourRange};
use crate::error::Result;
use crate::models::{
    DailyUsage, DetailedUsageEntry, HourlyUsage, ModelUsage, MonthlyUsage, ProjectSummary,
    UsageReport, UsageSummary,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ViewKind {
    #[default]
    Daily,
    Monthly,
    Models,
    Projects,
    Hourly,
    Detailed,
    Summary,
}

impl ViewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::Daily => "daily",
            ViewKind::Monthly => "monthly",
            ViewKind::Models => "models",
            ViewKind::Projects => "projects",
            ViewKind::Hourly => "hourly",
            ViewKind::Detailed => "detailed",
            ViewKind::Summary => "summary",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated request for one view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReportQuery {
    pub view: ViewKind,
    pub dates: DateRange,
    pub hours: HourRange,
}

impl ReportQuery {
    /// Validates hour and date bounds.
    pub fn new(
        view: ViewKind,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        start_hour: Option<u32>,
        end_hour: Option<u32>,
    ) -> Result<Self> {
        Ok(ReportQuery {
            view,
            dates: DateRange::new(start_date, end_date)?,
            hours: HourRange::new(start_hour, end_hour)?,
        })
    }

    pub fn view(view: ViewKind) -> Self {
        ReportQuery {
            view,
            ..Default::default()
        }
    }

    pub fn is_filtered(&self) -> bool {
        !self.dates.is_unbounded() || !self.hours.is_unbounded()
    }

    /// Cache key covering every parameter that changes the result. `zone`
    /// names the time zone the hour of day is read in.
    pub fn cache_key(&self, root: &Path, zone: &str) -> String {
        fn opt<T: fmt::Display>(v: Option<T>) -> String {
            v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string())
        }
        format!(
            "view={}|root={}|zone={}|from={}|to={}|hours={}-{}",
            self.view,
            root.display(),
            zone,
            opt(self.dates.start),
            opt(self.dates.end),
            opt(self.hours.start),
            opt(self.hours.end),
        )
    }

    fn keeps<Tz: TimeZone>(&self, entry: &DetailedUsageEntry, tz: &Tz) -> bool {
        self.dates.contains(entry)
            && (self.hours.is_unbounded()
                || self.hours.contains(entry.timestamp.with_timezone(tz).hour()))
    }

    /// Build the requested view. `tz` decides the hour of day.
    pub fn apply<Tz: TimeZone>(&self, report: &UsageReport, tz: &Tz) -> UsageView {
        let refold = || fold_filtered(&report.detailed_usage, self.dates, self.hours, tz);
        match self.view {
            ViewKind::Daily if !self.is_filtered() => UsageView::Daily(report.daily_usage.clone()),
            ViewKind::Daily => UsageView::Daily(refold().daily()),
            ViewKind::Monthly if !self.is_filtered() => {
                UsageView::Monthly(report.monthly_usage.clone())
            }
            ViewKind::Monthly => UsageView::Monthly(refold().monthly()),
            ViewKind::Models if !self.is_filtered() => {
                UsageView::Models(report.model_usage.clone())
            }
            ViewKind::Models => UsageView::Models(refold().models()),
            // project summaries carry no per-record breakdown to filter
            ViewKind::Projects => UsageView::Projects(report.projects.clone()),
            ViewKind::Hourly => UsageView::Hourly(
                hourly_profile(&report.detailed_usage, self.dates, tz)
                    .into_iter()
                    .filter(|h| self.hours.contains(h.hour))
                    .collect(),
            ),
            ViewKind::Detailed => {
                let mut entries: Vec<DetailedUsageEntry> = report
                    .detailed_usage
                    .iter()
                    .filter(|e| self.keeps(e, tz))
                    .cloned()
                    .collect();
                sort_detailed(&mut entries);
                UsageView::Detailed(entries)
            }
            ViewKind::Summary => {
                let fold = refold();
                let last = report
                    .detailed_usage
                    .iter()
                    .filter(|e| self.keeps(e, tz))
                    .map(|e| e.timestamp)
                    .max()
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true));
                UsageView::Summary(UsageSummary::new(
                    &fold.grand_total(),
                    fold.total_sessions(),
                    report.projects.len(),
                    last,
                ))
            }
        }
    }
}

/// One rendered view, serialized under its contract key.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum UsageView {
    #[serde(rename = "dailyUsage")]
    Daily(Vec<DailyUsage>),
    #[serde(rename = "monthlyUsage")]
    Monthly(Vec<MonthlyUsage>),
    #[serde(rename = "modelUsage")]
    Models(Vec<ModelUsage>),
    #[serde(rename = "projects")]
    Projects(Vec<ProjectSummary>),
    #[serde(rename = "hourlyUsage")]
    Hourly(Vec<HourlyUsage>),
    #[serde(rename = "detailedUsage")]
    Detailed(Vec<DetailedUsageEntry>),
    #[serde(rename = "summary")]
    Summary(UsageSummary),
}

impl UsageView {
    pub fn kind(&self) -> ViewKind {
        match self {
            UsageView::Daily(_) => ViewKind::Daily,
            UsageView::Monthly(_) => ViewKind::Monthly,
            UsageView::Models(_) => ViewKind::Models,
            UsageView::Projects(_) => ViewKind::Projects,
            UsageView::Hourly(_) => ViewKind::Hourly,
            UsageView::Detailed(_) => ViewKind::Detailed,
            UsageView::Summary(_) => ViewKind::Summary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            UsageView::Daily(v) => v.len(),
            UsageView::Monthly(v) => v.len(),
            UsageView::Models(v) => v.len(),
            UsageView::Projects(v) => v.len(),
            UsageView::Hourly(v) => v.len(),
            UsageView::Detailed(v) => v.len(),
            UsageView::Summary(s) => usize::from(s.total_messages > 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UsageError;
    use std::path::PathBuf;

    #[test]
    fn test_cache_key_distinguishes_every_parameter() {
        let root = PathBuf::from("/data/projects");
        let base = ReportQuery::view(ViewKind::Daily);
        let keys = [
            base,
            ReportQuery::view(ViewKind::Monthly),
            ReportQuery::new(ViewKind::Daily, NaiveDate::from_ymd_opt(2025, 1, 1), None, None, None).unwrap(),
            ReportQuery::new(ViewKind::Daily, None, NaiveDate::from_ymd_opt(2025, 1, 1), None, None).unwrap(),
            ReportQuery::new(ViewKind::Daily, None, None, Some(3), None).unwrap(),
            ReportQuery::new(ViewKind::Daily, None, None, None, Some(3)).unwrap(),
        ]
        .map(|q| q.cache_key(&root, "Utc"));
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_ne!(
            base.cache_key(&root, "Utc"),
            base.cache_key(Path::new("/other"), "Utc")
        );
        assert_ne!(base.cache_key(&root, "Utc"), base.cache_key(&root, "+05:00"));
    }

    #[test]
    fn test_invalid_query_rejected() {
        let err = ReportQuery::new(ViewKind::Daily, None, None, Some(18), Some(12)).unwrap_err();
        assert_eq!(err.code(), "INVALID_HOUR_RANGE");
        let err = ReportQuery::new(
            ViewKind::Daily,
            NaiveDate::from_ymd_opt(2025, 2, 1),
            NaiveDate::from_ymd_opt(2025, 1, 1),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, UsageError::InvalidDateRange(_)));
    }

    fn report_with(entries: &[(&str, &str, u64)]) -> UsageReport {
        use chrono::{DateTime, Utc};
        let detailed = entries
            .iter()
            .map(|(ts, sid, tokens)| {
                let metrics = crate::models::UsageMetrics {
                    new_input_tokens: *tokens,
                    total_tokens: *tokens,
                    cost: *tokens as f64 * 1e-6,
                    ..Default::default()
                };
                DetailedUsageEntry::new(
                    DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc),
                    Some(sid.to_string()),
                    "m".to_string(),
                    &metrics,
                )
            })
            .collect();
        UsageReport {
            detailed_usage: detailed,
            projects: vec![ProjectSummary::default(), ProjectSummary::default()],
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_totals() {
        let report = report_with(&[
            ("2025-01-01T10:00:00Z", "s1", 1000),
            ("2025-01-02T15:00:00Z", "s2", 600),
            ("2025-01-03T15:30:00Z", "s2", 400),
        ]);
        let UsageView::Summary(all) = ReportQuery::view(ViewKind::Summary).apply(&report, &chrono::Utc) else {
            panic!("expected summary");
        };
        assert_eq!(all.total_tokens, 2000);
        assert_eq!(all.total_cost, "0.0020");
        assert_eq!(all.total_sessions, 2);
        assert_eq!(all.total_messages, 3);
        assert_eq!(all.project_count, 2);
        assert_eq!(all.last_activity.as_deref(), Some("2025-01-03T15:30:00.000Z"));

        let afternoon = ReportQuery::new(ViewKind::Summary, None, None, Some(12), None).unwrap();
        let UsageView::Summary(pm) = afternoon.apply(&report, &chrono::Utc) else {
            panic!("expected summary");
        };
        assert_eq!(pm.total_tokens, 1000);
        assert_eq!(pm.total_sessions, 1);

        let json = serde_json::to_value(UsageView::Summary(pm)).unwrap();
        assert_eq!(json["summary"]["totalTokens"], 1000);
    }

    #[test]
    fn test_view_serializes_under_contract_key() {
        let v = UsageView::Daily(vec![]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"dailyUsage":[]}"#);
        assert_eq!(v.kind(), ViewKind::Daily);
        assert!(v.is_empty());
    }
}
