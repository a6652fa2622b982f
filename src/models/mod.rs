pub mod entry;
pub mod record;
pub mod report;

pub use entry::{DetailedUsageEntry, UsageMetrics};
pub use record::{MessageBody, RawLogRecord, RawUsage};
pub use report::{
    format_cost, DailyUsage, HourlyUsage, ModelUsage, MonthlyUsage, ProjectSummary, UsageReport,
    UsageSummary, UsageTotals,
};
