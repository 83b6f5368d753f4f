//! Ingest-legal command implementation.

use super::{connect, parse_run_id, pause_on_ctrl_c};
use crate::cli::IngestLegalArgs;
use crate::error::{CliError, Result};
use crate::output::{Formatter, ProgressPrinter};
use douane_client::{LegalIngestionRunner, LegalJob, OrchestratorConfig};
use std::sync::Arc;

fn build_job(args: &IngestLegalArgs) -> Result<LegalJob> {
    if args.end_page == Some(0) {
        return Err(CliError::InvalidInput("--end-page is 1-based".to_string()));
    }
    let mut job = LegalJob::new(&args.pdf_id, &args.file_path).up_to(args.end_page);
    if let Some(raw) = &args.run_id {
        job = job.resume(parse_run_id(raw)?);
    }
    Ok(job)
}

/// Execute the ingest-legal command.
pub async fn execute_ingest_legal(
    args: IngestLegalArgs,
    server_url: &str,
    config: OrchestratorConfig,
    formatter: &Formatter,
) -> Result<()> {
    let job = build_job(&args)?;

    let transport = Arc::new(connect(server_url, &config)?);
    let runner = LegalIngestionRunner::new(transport, config);
    pause_on_ctrl_c(runner.cancellation_handle());

    let printer = ProgressPrinter::new(formatter.format(), formatter.color_enabled());
    let outcome = runner.run(job, &printer).await?;
    println!("{}", formatter.format_legal(&outcome)?);
    Ok(())
}
