//! Runtime settings: defaults, then environment, then command-line flags.
//!
//! | Env var | Default |
//! |---|---|
//! | `CLAUDE_PROJECTS_PATH` | `~/.claude/projects` |
//! | `USAGE_PROCESSOR_PATH` | `usage-processor` next to the running binary |
//! | `USE_EXTERNAL_PROCESSOR` | enabled (`false` disables) |
//! | `USAGE_PROCESSOR_TIMEOUT_SECS` | 30 |
//! | `USAGE_PROCESSOR_MAX_OUTPUT_MB` | 50 |
//! | `USAGE_CACHE_TTL_SECS` | 300 |
//! | `USAGE_CACHE_POLICY` | `fingerprint` (or `ttl`) |
//!
//! Malformed values fall back to the default.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{InvalidationPolicy, DEFAULT_TTL_SECONDS};
use crate::cli::Args;
use crate::hybrid::{
    Coordinator, ExternalProcessor, InProcessProcessor, UsageProcessor, DEFAULT_MAX_OUTPUT_BYTES,
    DEFAULT_TIMEOUT,
};
use crate::pricing::PricingResolver;
use crate::utils::{
    default_projects_root, parse_bool_env, parse_path_env, parse_u64_env, sibling_processor_path,
};

pub const ENV_PROJECTS_PATH: &str = "CLAUDE_PROJECTS_PATH";
pub const ENV_PROCESSOR_PATH: &str = "USAGE_PROCESSOR_PATH";
pub const ENV_USE_EXTERNAL: &str = "USE_EXTERNAL_PROCESSOR";
pub const ENV_TIMEOUT_SECS: &str = "USAGE_PROCESSOR_TIMEOUT_SECS";
pub const ENV_MAX_OUTPUT_MB: &str = "USAGE_PROCESSOR_MAX_OUTPUT_MB";
pub const ENV_CACHE_TTL_SECS: &str = "USAGE_CACHE_TTL_SECS";
pub const ENV_CACHE_POLICY: &str = "USAGE_CACHE_POLICY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicyKind {
    Ttl,
    Fingerprint,
}

impl CachePolicyKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ttl" => Some(CachePolicyKind::Ttl),
            "fingerprint" => Some(CachePolicyKind::Fingerprint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub projects_root: PathBuf,
    pub external_enabled: bool,
    /// `None` when no executable is configured or found
    pub processor_path: Option<PathBuf>,
    pub processor_timeout: Duration,
    pub max_output_bytes: usize,
    pub cache_ttl: chrono::Duration,
    pub cache_policy: CachePolicyKind,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            projects_root: default_projects_root(),
            external_enabled: true,
            processor_path: None,
            processor_timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            cache_ttl: chrono::Duration::seconds(DEFAULT_TTL_SECONDS),
            cache_policy: CachePolicyKind::Fingerprint,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut s = Settings::default();
        if let Some(root) = parse_path_env(ENV_PROJECTS_PATH) {
            s.projects_root = root;
        }
        s.processor_path = parse_path_env(ENV_PROCESSOR_PATH).or_else(sibling_processor_path);
        if let Some(enabled) = parse_bool_env(ENV_USE_EXTERNAL) {
            s.external_enabled = enabled;
        }
        if let Some(secs) = parse_u64_env(ENV_TIMEOUT_SECS).filter(|v| *v > 0) {
            s.processor_timeout = Duration::from_secs(secs);
        }
        if let Some(mb) = parse_u64_env(ENV_MAX_OUTPUT_MB).filter(|v| *v > 0) {
            s.max_output_bytes = (mb as usize).saturating_mul(1024 * 1024);
        }
        if let Some(ttl) = parse_u64_env(ENV_CACHE_TTL_SECS)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
        {
            s.cache_ttl = ttl;
        }
        if let Some(kind) = std::env::var(ENV_CACHE_POLICY)
            .ok()
            .and_then(|v| CachePolicyKind::parse(&v))
        {
            s.cache_policy = kind;
        }
        s
    }

    /// Command-line flags win over the environment.
    pub fn with_args(mut self, args: &Args) -> Self {
        if let Some(root) = &args.projects_path {
            self.projects_root = root.clone();
        }
        if let Some(p) = &args.processor {
            self.processor_path = Some(p.clone());
        }
        if args.no_external {
            self.external_enabled = false;
        }
        if let Some(secs) = args.timeout_secs.filter(|v| *v > 0) {
            self.processor_timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn invalidation_policy(&self) -> InvalidationPolicy {
        match self.cache_policy {
            CachePolicyKind::Ttl => InvalidationPolicy::TtlOnly,
            CachePolicyKind::Fingerprint => InvalidationPolicy::Fingerprint {
                root: self.projects_root.clone(),
            },
        }
    }

    /// External processor, if enabled and configured.
    pub fn external_processor(&self) -> Option<ExternalProcessor> {
        if !self.external_enabled {
            return None;
        }
        let path = self.processor_path.as_ref()?;
        Some(
            ExternalProcessor::new(path)
                .with_timeout(self.processor_timeout)
                .with_max_output_bytes(self.max_output_bytes),
        )
    }

    pub fn build_coordinator(&self) -> Coordinator {
        let external = self
            .external_processor()
            .map(|p| Box::new(p) as Box<dyn UsageProcessor>);
        debug!(
            root = %self.projects_root.display(),
            external = ?self.processor_path,
            enabled = self.external_enabled,
            "Building coordinator"
        );
        let fallback = InProcessProcessor::new(Arc::new(PricingResolver::new()));
        Coordinator::new(self.projects_root.clone(), external, Box::new(fallback))
            .with_cache_policy(self.invalidation_policy())
            .with_ttl(self.cache_ttl)
    }
}
