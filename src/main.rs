use anyhow::{Context, Result};
use std::process::ExitCode;

use claude_usage::cli::Args;
use claude_usage::config::Settings;
use claude_usage::display::{print_error, print_json_output, print_text_output};
use claude_usage::error::{ErrorBody, ReportOutcome, UsageError};
use claude_usage::logging::init_logging;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.debug, args.log_json);

    let query = match args.query() {
        Ok(q) => q,
        Err(e) => return report_failure(&e, args.json),
    };

    let settings = Settings::from_env().with_args(&args);
    let coordinator = settings.build_coordinator();

    match coordinator.view(&query).await {
        Ok(view) => {
            if args.json {
                print_json_output(view.as_ref()).context("serialize view")?;
            } else {
                print_text_output(&view);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => report_failure(&e, args.json),
    }
}

// A failure prints the empty-result envelope, never a partial view
fn report_failure(err: &UsageError, json: bool) -> Result<ExitCode> {
    tracing::error!(code = err.code(), error = %err, "Usage report failed");
    if json {
        let outcome = ReportOutcome {
            report: Default::default(),
            error: Some(ErrorBody::from(err)),
        };
        print_json_output(&outcome).context("serialize error envelope")?;
    } else {
        print_error(&ErrorBody::from(err));
    }
    Ok(ExitCode::FAILURE)
}
