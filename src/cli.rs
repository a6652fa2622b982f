use chrono::NaiveDate;
use std::path::PathBuf;

use crate::error::Result;
use crate::query::{ReportQuery, ViewKind};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewArg {
    /// Per-day totals
    Daily,
    /// Per-month totals
    Monthly,
    /// Per-model totals, largest first
    Models,
    /// Per-project summaries, most recently active first
    Projects,
    /// Hour-of-day profile
    Hourly,
    /// One row per record
    Detailed,
    /// Grand totals
    Summary,
}

impl From<ViewArg> for ViewKind {
    fn from(v: ViewArg) -> Self {
        match v {
            ViewArg::Daily => ViewKind::Daily,
            ViewArg::Monthly => ViewKind::Monthly,
            ViewArg::Models => ViewKind::Models,
            ViewArg::Projects => ViewKind::Projects,
            ViewArg::Hourly => ViewKind::Hourly,
            ViewArg::Detailed => ViewKind::Detailed,
            ViewArg::Summary => ViewKind::Summary,
        }
    }
}

#[derive(clap::Parser, Debug)]
#[command(name = "claude-usage", about = "Token usage and cost from Claude CLI logs")]
pub struct Args {
    /// Projects root (one subdirectory per project). Defaults to ~/.claude/projects
    #[arg(long)]
    pub projects_path: Option<PathBuf>,

    /// Which aggregate to print
    #[arg(long, value_enum, default_value_t = ViewArg::Daily)]
    pub view: ViewArg,

    /// Emit JSON instead of a colored table
    #[arg(long)]
    pub json: bool,

    /// First day to include, YYYY-MM-DD (UTC)
    #[arg(long = "since", alias = "start-date")]
    pub start_date: Option<NaiveDate>,

    /// Last day to include, YYYY-MM-DD (UTC)
    #[arg(long = "until", alias = "end-date")]
    pub end_date: Option<NaiveDate>,

    /// First local hour of day to include, 0-23
    #[arg(long)]
    pub start_hour: Option<u32>,

    /// Last local hour of day to include, 0-23
    #[arg(long)]
    pub end_hour: Option<u32>,

    /// Never delegate to the external processor
    #[arg(long)]
    pub no_external: bool,

    /// Path to the external processor executable
    #[arg(long)]
    pub processor: Option<PathBuf>,

    /// External processor time budget in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,

    /// Debug mode: verbose logging on stderr
    #[arg(long, env = "CLAUDE_USAGE_DEBUG")]
    pub debug: bool,
}

impl Args {
    pub fn parse() -> Self {
        <Args as clap::Parser>::parse()
    }

    /// Validated query from the view and filter flags.
    pub fn query(&self) -> Result<ReportQuery> {
        ReportQuery::new(
            self.view.into(),
            self.start_date,
            self.end_date,
            self.start_hour,
            self.end_hour,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_filters() {
        let args = Args::try_parse_from([
            "claude-usage",
            "--view",
            "models",
            "--since",
            "2025-01-01",
            "--start-hour",
            "9",
            "--end-hour",
            "17",
            "--no-external",
        ])
        .unwrap();
        let q = args.query().unwrap();
        assert_eq!(q.view, ViewKind::Models);
        assert_eq!(q.dates.start, NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(q.hours.start, Some(9));
        assert!(args.no_external);
    }

    #[test]
    #[serial]
    fn test_summary_view_arg() {
        let args = Args::try_parse_from(["claude-usage", "--view", "summary"]).unwrap();
        assert_eq!(args.query().unwrap().view, ViewKind::Summary);
    }

    #[test]
    #[serial]
    fn test_bad_hour_rejected_by_query() {
        let args = Args::try_parse_from(["claude-usage", "--start-hour", "25"]).unwrap();
        assert_eq!(args.query().unwrap_err().code(), "INVALID_HOUR_RANGE");
    }
}
