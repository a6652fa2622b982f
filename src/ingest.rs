//! # Ingest Module
//!
//! Walks a projects root (one subdirectory per project), reads every `.jsonl`
//! file and parses records tolerantly.
//!
//! ## Failure isolation
//!
//! - A line that no strategy can parse is dropped and not counted
//! - A file that cannot be read is logged and contributes nothing
//! - A project directory that cannot be listed is logged and yields an empty
//!   project; siblings are unaffected
//! - Only a missing or unlistable root is fatal

use chrono::{DateTime, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, UsageError};
use crate::models::RawLogRecord;

/// Extension of record files inside a project directory.
pub const LOG_EXTENSION: &str = "jsonl";

// `[DEBUG] 2025-01-01T00:00:00Z tool_call {...}` style lines
static DEBUG_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\[(?i:debug|trace|info|tool)[^\]\n]*\][^{\n]*(\{.*\})\s*$")
        .expect("debug marker pattern")
});

/// Which strategy produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    JsonArray,
    JsonLine,
    DebugMarker,
}

/// Tagged result of running the strategies over one chunk of input.
#[derive(Debug)]
pub enum Parsed {
    Records(ParseStrategy, Vec<RawLogRecord>),
    Dropped,
}

type Strategy = fn(&str) -> Option<Vec<RawLogRecord>>;

// Tried in order; the first strategy that yields records wins.
const STRATEGIES: &[(ParseStrategy, Strategy)] = &[
    (ParseStrategy::JsonArray, parse_json_array),
    (ParseStrategy::JsonLine, parse_json_line),
    (ParseStrategy::DebugMarker, parse_debug_marker),
];

fn parse_json_array(text: &str) -> Option<Vec<RawLogRecord>> {
    if !text.starts_with('[') {
        return None;
    }
    let values: Vec<serde_json::Value> = serde_json::from_str(text).ok()?;
    let records: Vec<RawLogRecord> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    (!records.is_empty()).then_some(records)
}

fn parse_json_line(text: &str) -> Option<Vec<RawLogRecord>> {
    if !text.starts_with('{') {
        return None;
    }
    serde_json::from_str(text).ok().map(|r| vec![r])
}

fn parse_debug_marker(text: &str) -> Option<Vec<RawLogRecord>> {
    let caps = DEBUG_MARKER_RE.captures(text)?;
    serde_json::from_str(caps.get(1)?.as_str())
        .ok()
        .map(|r| vec![r])
}

/// Run the strategies in order over one chunk, a whole file or one line.
pub fn parse_chunk(text: &str) -> Parsed {
    let t = text.trim();
    if t.is_empty() {
        return Parsed::Dropped;
    }
    STRATEGIES
        .iter()
        .find_map(|(tag, strategy)| strategy(t).map(|records| Parsed::Records(*tag, records)))
        .unwrap_or(Parsed::Dropped)
}

/// Parse a whole file body: first as one chunk (a JSON array file), then line
/// by line. Lines that are not valid UTF-8 are dropped like any other
/// malformed line.
pub fn parse_document(bytes: &[u8]) -> Vec<RawLogRecord> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if let Parsed::Records(strategy, records) = parse_chunk(text) {
            debug!(?strategy, count = records.len(), "Parsed file as one chunk");
            return records;
        }
    }
    bytes
        .split(|b| *b == b'\n')
        .filter_map(|raw| std::str::from_utf8(raw).ok())
        .flat_map(|line| match parse_chunk(line) {
            Parsed::Records(_, records) => records,
            Parsed::Dropped => Vec::new(),
        })
        .collect()
}

/// Everything read from one project directory.
#[derive(Debug, Clone, Default)]
pub struct ProjectLogs {
    pub name: String,
    pub path: PathBuf,
    pub records: Vec<RawLogRecord>,
    /// Parsed records, with or without usage
    pub message_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ProjectLogs {
    fn empty(name: String, path: PathBuf) -> Self {
        ProjectLogs {
            name,
            path,
            ..Default::default()
        }
    }

    fn absorb(&mut self, records: Vec<RawLogRecord>) {
        for r in &records {
            if let Some(ts) = r.timestamp {
                if self.last_activity.is_none_or(|cur| ts > cur) {
                    self.last_activity = Some(ts);
                }
            }
        }
        self.message_count += records.len();
        self.records.extend(records);
    }
}

/// List project directories under the root, sorted by name.
pub async fn list_projects(root: &Path) -> Result<Vec<PathBuf>> {
    let mut rd = tokio::fs::read_dir(root)
        .await
        .map_err(|source| UsageError::RootUnavailable {
            path: root.to_path_buf(),
            source,
        })?;

    let mut dirs = Vec::new();
    loop {
        let entry = match rd.next_entry().await {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Failed to read root entry");
                continue;
            }
        };
        let path = entry.path();
        // follows symlinks, like the is_dir() checks elsewhere
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => dirs.push(path),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable entry"),
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Read and parse one project directory. Never fails.
pub async fn ingest_project(dir: PathBuf) -> ProjectLogs {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("Unknown")
        .to_string();
    let mut project = ProjectLogs::empty(name, dir.clone());

    let files = match list_log_files(&dir).await {
        Ok(f) => f,
        Err(e) => {
            warn!(project = %project.name, error = %e, "Failed to list project directory");
            return project;
        }
    };

    let reads = files.into_iter().map(|path| async move {
        let res = tokio::fs::read(&path).await;
        (path, res)
    });

    for (path, res) in join_all(reads).await {
        match res {
            Ok(bytes) => {
                let records = parse_document(&bytes);
                debug!(file = %path.display(), count = records.len(), "Parsed log file");
                project.absorb(records);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to read log file");
            }
        }
    }
    project
}

async fn list_log_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut rd = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(LOG_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Ingest every project under `root` concurrently.
pub async fn ingest_root(root: &Path) -> Result<Vec<ProjectLogs>> {
    let dirs = list_projects(root).await?;
    debug!(root = %root.display(), projects = dirs.len(), "Found project directories");
    Ok(join_all(dirs.into_iter().map(ingest_project)).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(parsed: Parsed) -> (ParseStrategy, RawLogRecord) {
        match parsed {
            Parsed::Records(tag, mut records) if records.len() == 1 => (tag, records.remove(0)),
            other => panic!("expected one record, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_line() {
        let line = r#"{"timestamp":"2025-01-01T10:00:00Z","sessionId":"s1","model":"claude-sonnet-4-20250514","usage":{"input_tokens":10}}"#;
        let (tag, r) = single(parse_chunk(line));
        assert_eq!(tag, ParseStrategy::JsonLine);
        assert_eq!(r.session_id(), Some("s1"));
        assert_eq!(r.usage().and_then(|u| u.input_tokens), Some(10));
    }

    #[test]
    fn test_nested_message_layout() {
        let line = r#"{"timestamp":"2025-01-01T10:00:00Z","message":{"model":"claude-3-opus-20240229","usage":{"output_tokens":3}}}"#;
        let (_, r) = single(parse_chunk(line));
        assert_eq!(r.model(), Some("claude-3-opus-20240229"));
        assert_eq!(r.usage().and_then(|u| u.output_tokens), Some(3));
    }

    #[test]
    fn test_debug_marker_line() {
        let line = r#"[DEBUG] 2025-01-01T10:00:00Z tool_call {"timestamp":"2025-01-01T10:00:00Z","usage":{"input_tokens":5}}"#;
        let (tag, r) = single(parse_chunk(line));
        assert_eq!(tag, ParseStrategy::DebugMarker);
        assert_eq!(r.usage().and_then(|u| u.input_tokens), Some(5));
    }

    #[test]
    fn test_array_chunk_is_tagged() {
        let text = r#"[{"timestamp":"2025-01-01T10:00:00Z"},{"timestamp":"2025-01-02T10:00:00Z"}]"#;
        match parse_chunk(text) {
            Parsed::Records(tag, records) => {
                assert_eq!(tag, ParseStrategy::JsonArray);
                assert_eq!(records.len(), 2);
            }
            Parsed::Dropped => panic!("array should parse"),
        }
    }

    #[test]
    fn test_malformed_lines_dropped() {
        assert!(matches!(parse_chunk("not json"), Parsed::Dropped));
        assert!(matches!(parse_chunk("{\"timestamp\": "), Parsed::Dropped));
        assert!(matches!(parse_chunk("   "), Parsed::Dropped));
        assert!(matches!(parse_chunk("[1,2,3]"), Parsed::Dropped));
    }

    #[test]
    fn test_bad_timestamp_keeps_record() {
        let (_, r) = single(parse_chunk(r#"{"timestamp":"yesterday","usage":{}}"#));
        assert!(r.timestamp.is_none());
    }

    #[test]
    fn test_document_array_and_lines() {
        let array = br#"[{"timestamp":"2025-01-01T10:00:00Z"},{"timestamp":"2025-01-02T10:00:00Z"}, 7]"#;
        assert_eq!(parse_document(array).len(), 2);

        let mut lines = b"{\"timestamp\":\"2025-01-01T10:00:00Z\"}\ngarbage\n".to_vec();
        lines.extend_from_slice(&[0xff, 0xfe, b'\n']);
        lines.extend_from_slice(b"{\"sessionId\":\"x\"}\n");
        assert_eq!(parse_document(&lines).len(), 2);
    }

    #[tokio::test]
    async fn test_unlistable_project_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let not_a_dir = tmp.path().join("proj");
        std::fs::write(&not_a_dir, "{}").unwrap();
        let project = ingest_project(not_a_dir).await;
        assert_eq!(project.name, "proj");
        assert!(project.records.is_empty());
        assert_eq!(project.message_count, 0);
        assert!(project.last_activity.is_none());
    }
}
