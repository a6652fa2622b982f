//! Fast-path executable: aggregates a projects root and prints the report as
//! one JSON document on stdout. Exits non-zero on failure.

use anyhow::{Context, Result, bail};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use claude_usage::hybrid::{InProcessProcessor, UsageProcessor};
use claude_usage::logging::init_logging;
use claude_usage::pricing::PricingResolver;

#[derive(clap::Parser, Debug)]
#[command(name = "usage-processor", about = "Aggregate Claude CLI usage logs to JSON")]
struct ProcessorArgs {
    /// Projects root
    root: Option<PathBuf>,

    /// Projects root, as a flag
    #[arg(long)]
    projects_path: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = <ProcessorArgs as clap::Parser>::parse();
    init_logging(args.debug, false);

    let Some(root) = args.root.or(args.projects_path) else {
        bail!("missing projects root argument");
    };

    let processor = InProcessProcessor::new(Arc::new(PricingResolver::new()));
    let report = processor
        .process(&root)
        .await
        .with_context(|| format!("aggregate {}", root.display()))?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &report).context("serialize report")?;
    stdout.write_all(b"\n").context("write report")?;
    stdout.flush().context("flush report")?;
    Ok(())
}
