//! Extract command implementation.

use super::{connect, parse_run_id, pause_on_ctrl_c};
use crate::cli::ExtractArgs;
use crate::config::OutputFormat;
use crate::error::Result;
use crate::output::{Formatter, ProgressPrinter};
use douane_client::{BatchOrchestrator, ExtractionAccumulator, ExtractionJob, OrchestratorConfig};
use douane_domain::RunStatus;
use std::fs;
use std::sync::Arc;

/// Build the job described by the arguments.
fn build_job(args: &ExtractArgs) -> Result<ExtractionJob> {
    let mut job = ExtractionJob::new(&args.pdf_id, &args.file_path).preview(args.preview);
    if let Some(raw) = &args.run_id {
        job = job.resume(parse_run_id(raw)?);
    }
    Ok(job)
}

fn write_results(path: &str, accumulator: &ExtractionAccumulator) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(accumulator)?)?;
    Ok(())
}

/// Execute the extract command.
pub async fn execute_extract(
    args: ExtractArgs,
    server_url: &str,
    mut config: OrchestratorConfig,
    formatter: &Formatter,
) -> Result<()> {
    if let Some(pages) = args.pages_per_batch {
        config.pages_per_batch = pages;
    }
    let job = build_job(&args)?;

    let transport = Arc::new(connect(server_url, &config)?);
    let orchestrator = BatchOrchestrator::new(transport, config);
    pause_on_ctrl_c(orchestrator.cancellation_handle());

    let printer = ProgressPrinter::new(formatter.format(), formatter.color_enabled());
    match orchestrator.run(job, &printer).await {
        Ok(outcome) => {
            if let Some(path) = &args.output {
                write_results(path, &outcome.accumulator)?;
            }
            println!("{}", formatter.format_extraction(&outcome)?);
            if outcome.status == RunStatus::Paused && formatter.format() == OutputFormat::Table {
                if let Some(run_id) = outcome.run_id() {
                    println!(
                        "{}",
                        formatter.warning(&format!(
                            "Paused. Resume with: douane extract {} {} --run-id {}",
                            args.pdf_id, args.file_path, run_id
                        ))
                    );
                }
            }
            Ok(())
        }
        Err(failure) => {
            if let Some(path) = &args.output {
                write_results(path, &failure.accumulator)?;
            }
            if let Some(run_id) = failure.progress.run_id {
                eprintln!(
                    "{}",
                    formatter.info(&format!(
                        "Run {} stopped after {}/{} pages; resume with --run-id {}",
                        run_id,
                        failure.progress.processed_pages,
                        failure.progress.total_pages,
                        run_id
                    ))
                );
            }
            Err(failure.error.into())
        }
    }
}
