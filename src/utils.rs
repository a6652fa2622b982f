use std::env;
use std::path::PathBuf;

/// Projects root of the CLI log tree. Prefers `~/.claude/projects`, then the
/// XDG config location; falls back to the first even when neither exists.
pub fn default_projects_root() -> PathBuf {
    let basedirs = directories::BaseDirs::new();
    let home = basedirs
        .as_ref()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~"));
    let xdg_config = basedirs
        .as_ref()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| home.join(".config"));

    let candidates = [
        home.join(".claude").join("projects"),
        xdg_config.join("claude").join("projects"),
    ];
    candidates
        .iter()
        .find(|p| p.is_dir())
        .cloned()
        .unwrap_or_else(|| candidates[0].clone())
}

/// `usage-processor` next to the running executable, if it exists.
pub fn sibling_processor_path() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let name = if cfg!(windows) {
        "usage-processor.exe"
    } else {
        "usage-processor"
    };
    let candidate = exe.parent()?.join(name);
    candidate.is_file().then_some(candidate)
}

pub fn format_path(p: &str) -> String {
    if let Some(b) = directories::BaseDirs::new() {
        let home_s = b.home_dir().to_string_lossy();
        if p.starts_with(&*home_s) {
            return format!("~{}", &p[home_s.len()..]);
        }
    }
    p.to_owned()
}

pub fn format_currency(v: f64) -> String {
    format!("${v:.2}")
}

pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.1}B", n as f64 / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

/// `None` when unset; `Some(false)` only for explicit false-y values.
pub fn parse_bool_env(var: &str) -> Option<bool> {
    let val = env::var(var).ok()?;
    let trimmed = val.trim();
    if trimmed == "1" || trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("yes")
    {
        Some(true)
    } else if trimmed == "0"
        || trimmed.eq_ignore_ascii_case("false")
        || trimmed.eq_ignore_ascii_case("no")
    {
        Some(false)
    } else {
        None
    }
}

pub fn parse_u64_env(var: &str) -> Option<u64> {
    env::var(var)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

pub fn parse_path_env(var: &str) -> Option<PathBuf> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
