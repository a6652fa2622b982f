//! # Hybrid Module
//!
//! Runs a full ingest + aggregate pass either through an external executable
//! or in process, behind one [`UsageProcessor`] trait.
//!
//! ## Execution states
//!
//! ```text
//! NotAttempted -> ExternalRunning -> ExternalSucceeded
//!                                 -> ExternalFailed -> FallbackRunning -> FallbackSucceeded
//!                                                                      -> FallbackFailed
//! NotAttempted -> FallbackRunning   (no external processor configured)
//! ```
//!
//! Any external failure is logged and retried in process. Only a failure of
//! the in-process path reaches the caller.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, TimeZone};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::cache::{InvalidationPolicy, UsageCache};
use crate::error::{Result, UsageError};
use crate::ingest::ingest_root;
use crate::models::UsageReport;
use crate::pricing::PricingResolver;
use crate::query::{ReportQuery, UsageView};

/// Default wall-clock budget for the external processor.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on external stdout, 50 MiB.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

// stderr is only kept for the error message
const STDERR_KEEP_BYTES: usize = 16 * 1024;

/// One way of turning a projects root into a [`UsageReport`].
#[async_trait]
pub trait UsageProcessor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn process(&self, root: &Path) -> Result<UsageReport>;
}

/// Ingest and aggregate in this process.
#[derive(Debug, Clone, Default)]
pub struct InProcessProcessor {
    pricing: Arc<PricingResolver>,
}

impl InProcessProcessor {
    pub fn new(pricing: Arc<PricingResolver>) -> Self {
        InProcessProcessor { pricing }
    }
}

#[async_trait]
impl UsageProcessor for InProcessProcessor {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn process(&self, root: &Path) -> Result<UsageReport> {
        let projects = ingest_root(root).await?;
        // each project folds on its own, then the partials merge
        let mut aggregator = Aggregator::new(&self.pricing);
        let partials: Vec<_> = projects.iter().map(|p| aggregator.fold_project(p)).collect();
        for partial in partials {
            aggregator.merge(partial);
        }
        Ok(aggregator.finish())
    }
}

/// Delegates the whole pass to an executable that prints the report as JSON.
#[derive(Debug, Clone)]
pub struct ExternalProcessor {
    executable: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ExternalProcessor {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        ExternalProcessor {
            executable: executable.into(),
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn is_present(&self) -> bool {
        self.executable.is_file()
    }
}

#[async_trait]
impl UsageProcessor for ExternalProcessor {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn process(&self, root: &Path) -> Result<UsageReport> {
        if !self.is_present() {
            return Err(UsageError::ExecutableMissing {
                path: self.executable.clone(),
            });
        }

        let mut child = Command::new(&self.executable)
            .arg(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| UsageError::ExternalSpawn {
                path: self.executable.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("external stdout not captured"))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(drain_capped(s, STDERR_KEEP_BYTES)));

        let limit = self.max_output_bytes;
        let run = async {
            let mut buf = Vec::new();
            stdout.take(limit as u64 + 1).read_to_end(&mut buf).await?;
            if buf.len() > limit {
                return Err(UsageError::OutputTooLarge { limit });
            }
            let status = child.wait().await?;
            Ok::<_, UsageError>((buf, status))
        };

        let (buf, status) = match timeout(self.timeout, run).await {
            Ok(res) => res?,
            Err(_) => {
                let _ = child.start_kill();
                return Err(UsageError::ExternalTimeout {
                    timeout_ms: self.timeout.as_millis(),
                });
            }
        };

        if !status.success() {
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            return Err(UsageError::ExternalExit {
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&buf)?)
    }
}

// Keeps reading to EOF so the child never blocks on a full pipe
async fn drain_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    kept
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    NotAttempted,
    ExternalRunning,
    ExternalSucceeded,
    ExternalFailed,
    FallbackRunning,
    FallbackSucceeded,
    FallbackFailed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::ExternalSucceeded
                | ExecutionState::FallbackSucceeded
                | ExecutionState::FallbackFailed
        )
    }

    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (NotAttempted, ExternalRunning)
                | (NotAttempted, FallbackRunning)
                | (ExternalRunning, ExternalSucceeded)
                | (ExternalRunning, ExternalFailed)
                | (ExternalFailed, FallbackRunning)
                | (FallbackRunning, FallbackSucceeded)
                | (FallbackRunning, FallbackFailed)
        )
    }
}

/// A finished run and the states it went through.
#[derive(Debug, Clone)]
pub struct Execution {
    pub report: UsageReport,
    pub states: Vec<ExecutionState>,
}

impl Execution {
    pub fn final_state(&self) -> ExecutionState {
        self.states
            .last()
            .copied()
            .unwrap_or(ExecutionState::NotAttempted)
    }

    pub fn used_fallback(&self) -> bool {
        self.states.contains(&ExecutionState::FallbackRunning)
    }
}

#[derive(Debug, Default)]
struct StateTrail(Vec<ExecutionState>);

impl StateTrail {
    fn new() -> Self {
        StateTrail(vec![ExecutionState::NotAttempted])
    }

    fn advance(&mut self, next: ExecutionState) {
        let current = self.0.last().copied().unwrap_or(ExecutionState::NotAttempted);
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?}"
        );
        debug!(from = ?current, to = ?next, "Execution state");
        self.0.push(next);
    }
}

/// Picks the execution path per request and caches the results.
pub struct Coordinator {
    root: PathBuf,
    external: Option<Box<dyn UsageProcessor>>,
    fallback: Box<dyn UsageProcessor>,
    reports: UsageCache<UsageReport>,
    views: UsageCache<UsageView>,
    ttl: ChronoDuration,
}

impl Coordinator {
    pub fn new(
        root: impl Into<PathBuf>,
        external: Option<Box<dyn UsageProcessor>>,
        fallback: Box<dyn UsageProcessor>,
    ) -> Self {
        let root = root.into();
        let policy = InvalidationPolicy::Fingerprint { root: root.clone() };
        Coordinator {
            reports: UsageCache::new(policy.clone()),
            views: UsageCache::new(policy),
            root,
            external,
            fallback,
            ttl: ChronoDuration::seconds(crate::cache::DEFAULT_TTL_SECONDS),
        }
    }

    /// In-process only, with a fresh pricing resolver.
    pub fn in_process(root: impl Into<PathBuf>) -> Self {
        Self::new(root, None, Box::new(InProcessProcessor::default()))
    }

    pub fn with_cache_policy(mut self, policy: InvalidationPolicy) -> Self {
        self.reports = UsageCache::new(policy.clone());
        self.views = UsageCache::new(policy);
        self
    }

    pub fn with_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Run one uncached pass: external first when configured, then fallback.
    pub async fn execute(&self) -> Result<Execution> {
        let mut trail = StateTrail::new();

        let external_err = match &self.external {
            Some(external) => {
                trail.advance(ExecutionState::ExternalRunning);
                let started = Instant::now();
                match external.process(&self.root).await {
                    Ok(report) => {
                        trail.advance(ExecutionState::ExternalSucceeded);
                        info!(
                            processor = external.name(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "External processor succeeded"
                        );
                        return Ok(Execution {
                            report,
                            states: trail.0,
                        });
                    }
                    Err(e) => {
                        trail.advance(ExecutionState::ExternalFailed);
                        warn!(
                            processor = external.name(),
                            code = e.code(),
                            error = %e,
                            "External processor failed, falling back"
                        );
                        Some(e)
                    }
                }
            }
            None => None,
        };

        trail.advance(ExecutionState::FallbackRunning);
        match self.fallback.process(&self.root).await {
            Ok(report) => {
                trail.advance(ExecutionState::FallbackSucceeded);
                Ok(Execution {
                    report,
                    states: trail.0,
                })
            }
            Err(fallback) => {
                trail.advance(ExecutionState::FallbackFailed);
                Err(match external_err {
                    Some(external) => UsageError::BothPathsFailed {
                        external: Box::new(external),
                        fallback: Box::new(fallback),
                    },
                    None => fallback,
                })
            }
        }
    }

    fn report_key(&self) -> String {
        format!("report|root={}", self.root.display())
    }

    /// Full report, served from cache while valid.
    pub async fn report(&self) -> Result<Arc<UsageReport>> {
        let key = self.report_key();
        let fp = self.reports.current_fingerprint_async().await;
        if let Some(hit) = self.reports.lookup(&key, chrono::Utc::now(), fp.as_deref()) {
            return Ok(hit);
        }
        debug!(key = %key, "Cache miss");
        let execution = self.execute().await?;
        let report = Arc::new(execution.report);
        // fingerprint from before the run, so writes during the run invalidate
        self.reports
            .insert(&key, Arc::clone(&report), chrono::Utc::now() + self.ttl, fp);
        Ok(report)
    }

    /// One view in local time, cached under the full query.
    pub async fn view(&self, query: &ReportQuery) -> Result<Arc<UsageView>> {
        self.view_in(query, &Local).await
    }

    /// One view with hours read in `tz`. The zone is part of the cache key,
    /// so `Utc` and `+05:00` requests never share an entry.
    pub async fn view_in<Tz>(&self, query: &ReportQuery, tz: &Tz) -> Result<Arc<UsageView>>
    where
        Tz: TimeZone + Sync + fmt::Debug,
    {
        let key = query.cache_key(&self.root, &format!("{tz:?}"));
        let fp = self.views.current_fingerprint_async().await;
        if let Some(hit) = self.views.lookup(&key, chrono::Utc::now(), fp.as_deref()) {
            return Ok(hit);
        }
        let report = self.report().await?;
        let view = Arc::new(query.apply(&report, tz));
        self.views
            .insert(&key, Arc::clone(&view), chrono::Utc::now() + self.ttl, fp);
        Ok(view)
    }

    /// Drop all cached reports and views.
    pub fn invalidate(&self) {
        self.reports.clear();
        self.views.clear();
    }
}
