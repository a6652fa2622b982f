use chrono::{Duration, FixedOffset, Utc};
use std::fs::{self, File};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;

use claude_usage::cache::{InvalidationPolicy, UsageCache};
use claude_usage::hybrid::Coordinator;
use claude_usage::query::{ReportQuery, UsageView, ViewKind};

const RECORD: &str = r#"{"timestamp":"2025-01-01T10:00:00Z","sessionId":"s1","usage":{"input_tokens":100}}"#;

fn root_with_log() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("proj");
    fs::create_dir(&dir).unwrap();
    let log = dir.join("log.jsonl");
    fs::write(&log, format!("{RECORD}\n")).unwrap();
    (tmp, log)
}

#[test]
fn fingerprint_policy_misses_after_mtime_change() {
    let (tmp, log) = root_with_log();
    let cache: UsageCache<&str> = UsageCache::new(InvalidationPolicy::Fingerprint {
        root: tmp.path().to_path_buf(),
    });
    cache.set("k", "v", Duration::minutes(5));
    assert_eq!(cache.get("k").as_deref(), Some(&"v"));

    let f = File::options().write(true).open(&log).unwrap();
    f.set_modified(SystemTime::now() + std::time::Duration::from_secs(60))
        .unwrap();

    assert!(cache.get("k").is_none());
    assert!(cache.is_empty());
}

#[test]
fn ttl_policy_ignores_file_changes() {
    let (_tmp, log) = root_with_log();
    let cache: UsageCache<u32> = UsageCache::new(InvalidationPolicy::TtlOnly);
    cache.set("k", 1, Duration::minutes(5));
    fs::write(&log, "changed\n").unwrap();
    assert_eq!(cache.get("k").as_deref(), Some(&1));
}

#[tokio::test]
async fn coordinator_serves_cached_report_until_sources_change() {
    let (tmp, log) = root_with_log();
    let coordinator = Coordinator::in_process(tmp.path());

    let first = coordinator.report().await.unwrap();
    let again = coordinator.report().await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(first.total_tokens(), 100);

    fs::write(
        &log,
        format!("{RECORD}\n{}\n", RECORD.replace("100", "250")),
    )
    .unwrap();
    let f = File::options().write(true).open(&log).unwrap();
    f.set_modified(SystemTime::now() + std::time::Duration::from_secs(60))
        .unwrap();

    let fresh = coordinator.report().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &fresh));
    assert_eq!(fresh.total_tokens(), 350);
}

#[tokio::test]
async fn zero_ttl_never_hits() {
    let (tmp, _log) = root_with_log();
    let coordinator = Coordinator::in_process(tmp.path())
        .with_cache_policy(InvalidationPolicy::TtlOnly)
        .with_ttl(Duration::zero());

    let first = coordinator.report().await.unwrap();
    let second = coordinator.report().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(*first, *second);
}

#[tokio::test]
async fn view_cache_is_keyed_by_time_zone() {
    let (tmp, _log) = root_with_log();
    let coordinator = Coordinator::in_process(tmp.path());
    let query = ReportQuery::view(ViewKind::Hourly);
    let east5 = FixedOffset::east_opt(5 * 3600).unwrap();

    let hours = |view: &UsageView| match view {
        UsageView::Hourly(rows) => rows.iter().map(|h| h.hour).collect::<Vec<_>>(),
        other => panic!("expected hourly view, got {other:?}"),
    };

    let utc = coordinator.view_in(&query, &Utc).await.unwrap();
    let plus5 = coordinator.view_in(&query, &east5).await.unwrap();
    assert_eq!(hours(utc.as_ref()), vec![10]);
    assert_eq!(hours(plus5.as_ref()), vec![15]);

    // each zone still hits its own entry
    let utc_again = coordinator.view_in(&query, &Utc).await.unwrap();
    assert!(Arc::ptr_eq(&utc, &utc_again));
    let plus5_again = coordinator.view_in(&query, &east5).await.unwrap();
    assert!(Arc::ptr_eq(&plus5, &plus5_again));
}
