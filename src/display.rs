use serde::Serialize;
use std::env;

#[cfg(feature = "colors")]
use owo_colors::OwoColorize;

// Provide a no-op color shim when "colors" feature is disabled
#[cfg(not(feature = "colors"))]
pub mod color_shim {
    use std::fmt::{self, Display, Formatter};

    #[derive(Clone)]
    pub struct Plain(pub String);

    impl Display for Plain {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    pub trait ColorizeShim {
        fn as_str(&self) -> &str;

        fn bright_black(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_white(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_cyan(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_magenta(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_yellow(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn red(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn green(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bold(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn dimmed(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
    }

    impl ColorizeShim for &str {
        fn as_str(&self) -> &str {
            self
        }
    }
    impl ColorizeShim for String {
        fn as_str(&self) -> &str {
            self.as_str()
        }
    }
    impl ColorizeShim for Plain {
        fn as_str(&self) -> &str {
            &self.0
        }
    }
}

#[cfg(not(feature = "colors"))]
use color_shim::ColorizeShim as OwoColorize;

use crate::error::ErrorBody;
use crate::models::{
    DailyUsage, DetailedUsageEntry, HourlyUsage, ModelUsage, MonthlyUsage, ProjectSummary,
    UsageSummary,
};
use crate::query::UsageView;
use crate::utils::{format_currency, format_path, format_tokens};

fn color_enabled() -> bool {
    env::var("NO_COLOR").is_err()
}

fn paint(s: &str, f: impl Fn(&str) -> String) -> String {
    if color_enabled() {
        f(s)
    } else {
        s.to_string()
    }
}

pub fn model_colored_name(model: &str) -> String {
    let lower = model.to_lowercase();
    if lower.contains("opus") {
        paint(model, |s| s.bright_magenta().to_string())
    } else if lower.contains("sonnet") {
        paint(model, |s| s.bright_yellow().to_string())
    } else if lower.contains("haiku") {
        paint(model, |s| s.bright_cyan().to_string())
    } else {
        paint(model, |s| s.bright_white().to_string())
    }
}

fn cost_cell(cost: &str) -> String {
    let value = cost.parse::<f64>().unwrap_or(0.0);
    paint(&format_currency(value), |s| s.green().to_string())
}

/// Left-aligned first column, right-aligned numeric columns. Widths are
/// measured on the uncolored text.
struct Table {
    headers: Vec<&'static str>,
    rows: Vec<Vec<(String, String)>>,
}

impl Table {
    fn new(headers: Vec<&'static str>) -> Self {
        Table {
            headers,
            rows: Vec::new(),
        }
    }

    /// Each cell is `(plain, painted)`.
    fn push(&mut self, row: Vec<(String, String)>) {
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, (plain, _)) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(plain.chars().count());
                }
            }
        }

        let mut out = String::new();
        let header: Vec<String> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| pad(h, h, widths[i], i == 0))
            .collect();
        out.push_str(&paint(&header.join("  "), |s| s.bold().to_string()));
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, (plain, painted))| pad(plain, painted, widths[i], i == 0))
                .collect();
            out.push_str(cells.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}

fn pad(plain: &str, painted: &str, width: usize, left: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(plain.chars().count()));
    if left {
        format!("{painted}{fill}")
    } else {
        format!("{fill}{painted}")
    }
}

fn plain(s: String) -> (String, String) {
    (s.clone(), s)
}

fn tokens(n: u64) -> (String, String) {
    plain(format_tokens(n))
}

fn cost(c: &str) -> (String, String) {
    let value = c.parse::<f64>().unwrap_or(0.0);
    (format_currency(value), cost_cell(c))
}

fn model(m: &str) -> (String, String) {
    (m.to_string(), model_colored_name(m))
}

fn daily_table(rows: &[DailyUsage]) -> Table {
    let mut t = Table::new(vec!["Date", "Input", "Output", "Cached", "Total", "Cost", "Sessions"]);
    for d in rows {
        t.push(vec![
            plain(d.date.clone()),
            tokens(d.input_tokens),
            tokens(d.output_tokens),
            tokens(d.cached_tokens),
            tokens(d.total_tokens),
            cost(&d.cost),
            plain(d.sessions.to_string()),
        ]);
    }
    t
}

fn monthly_table(rows: &[MonthlyUsage]) -> Table {
    let mut t = Table::new(vec![
        "Month", "Input", "Output", "Cached", "Total", "Cost", "Sessions", "Messages",
    ]);
    for m in rows {
        t.push(vec![
            plain(m.month.clone()),
            tokens(m.input_tokens),
            tokens(m.output_tokens),
            tokens(m.cached_tokens),
            tokens(m.total_tokens),
            cost(&m.cost),
            plain(m.sessions.to_string()),
            plain(m.messages.to_string()),
        ]);
    }
    t
}

fn models_table(rows: &[ModelUsage]) -> Table {
    let mut t = Table::new(vec![
        "Model", "Input", "Output", "Cached", "Total", "Cost", "Sessions", "Messages",
    ]);
    for m in rows {
        t.push(vec![
            model(&m.model),
            tokens(m.input_tokens),
            tokens(m.output_tokens),
            tokens(m.cached_tokens),
            tokens(m.total_tokens),
            cost(&m.cost),
            plain(m.sessions.to_string()),
            plain(m.messages.to_string()),
        ]);
    }
    t
}

fn projects_table(rows: &[ProjectSummary]) -> Table {
    let mut t = Table::new(vec!["Project", "Total", "Cost", "Messages", "Last activity", "Path"]);
    for p in rows {
        let last = p.last_activity.clone().unwrap_or_else(|| "-".to_string());
        let path = format_path(&p.path);
        t.push(vec![
            plain(p.name.clone()),
            tokens(p.total_tokens),
            cost(&p.total_cost),
            plain(p.message_count.to_string()),
            plain(last),
            (path.clone(), paint(&path, |s| s.dimmed().to_string())),
        ]);
    }
    t
}

fn hourly_table(rows: &[HourlyUsage]) -> Table {
    let mut t = Table::new(vec![
        "Hour", "Total", "Cost", "Sessions", "Requests", "Avg cost", "Avg tokens",
    ]);
    for h in rows {
        t.push(vec![
            plain(format!("{:02}:00", h.hour)),
            tokens(h.total_tokens),
            cost(&h.cost),
            plain(h.sessions.to_string()),
            plain(h.requests.to_string()),
            plain(format!("${:.4}", h.avg_cost_per_request)),
            plain(format!("{:.0}", h.avg_tokens_per_request)),
        ]);
    }
    t
}

fn detailed_table(rows: &[DetailedUsageEntry]) -> Table {
    let mut t = Table::new(vec!["Timestamp", "Model", "Session", "Total", "Cost"]);
    for e in rows {
        t.push(vec![
            plain(e.timestamp.to_rfc3339()),
            model(&e.model),
            plain(e.session_id.clone().unwrap_or_else(|| "-".to_string())),
            tokens(e.total_tokens),
            plain(format!("${:.4}", e.cost)),
        ]);
    }
    t
}

fn summary_table(s: &UsageSummary) -> Table {
    let mut t = Table::new(vec![
        "Total", "Input", "Output", "Cached", "Cost", "Sessions", "Messages", "Projects",
        "Last activity",
    ]);
    t.push(vec![
        tokens(s.total_tokens),
        tokens(s.input_tokens),
        tokens(s.output_tokens),
        tokens(s.cached_tokens),
        cost(&s.total_cost),
        plain(s.total_sessions.to_string()),
        plain(s.total_messages.to_string()),
        plain(s.project_count.to_string()),
        plain(s.last_activity.clone().unwrap_or_else(|| "-".to_string())),
    ]);
    t
}

/// Text table for one view.
pub fn render_view(view: &UsageView) -> String {
    if view.is_empty() {
        return paint(&format!("No {} usage found", view.kind()), |s| {
            s.bright_black().to_string()
        }) + "\n";
    }
    let table = match view {
        UsageView::Daily(rows) => daily_table(rows),
        UsageView::Monthly(rows) => monthly_table(rows),
        UsageView::Models(rows) => models_table(rows),
        UsageView::Projects(rows) => projects_table(rows),
        UsageView::Hourly(rows) => hourly_table(rows),
        UsageView::Detailed(rows) => detailed_table(rows),
        UsageView::Summary(summary) => summary_table(summary),
    };
    table.render()
}

pub fn print_text_output(view: &UsageView) {
    print!("{}", render_view(view));
}

pub fn print_json_output<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_error(err: &ErrorBody) {
    eprintln!(
        "{} {}",
        paint(&format!("[{}]", err.code), |s| s.red().to_string()),
        err.message
    );
}
