//! Run command implementation.

use super::{connect, parse_run_id};
use crate::cli::{RunAction, RunArgs};
use crate::error::Result;
use crate::output::Formatter;
use douane_client::{ExtractionTransport, OrchestratorConfig};
use douane_domain::RunStatus;
use std::io::{self, Write};

/// Execute the run command.
pub async fn execute_run(
    args: RunArgs,
    server_url: &str,
    config: &OrchestratorConfig,
    formatter: &Formatter,
) -> Result<()> {
    let transport = connect(server_url, config)?;
    execute_run_with(args, &transport, formatter).await
}

/// Execute the run command over any transport.
pub async fn execute_run_with<T: ExtractionTransport + ?Sized>(
    args: RunArgs,
    transport: &T,
    formatter: &Formatter,
) -> Result<()> {
    match args.action {
        RunAction::Status { run_id } => {
            let run = transport.get_run(parse_run_id(&run_id)?).await?;
            println!("{}", formatter.format_run(&run)?);
        }
        RunAction::Pause { run_id } => {
            let run = transport
                .set_status(parse_run_id(&run_id)?, RunStatus::Paused)
                .await?;
            if run.status == RunStatus::Paused {
                println!("{}", formatter.success(&format!("Run {} paused", run.id)));
            } else {
                println!(
                    "{}",
                    formatter.warning(&format!("Run {} is {}, left unchanged", run.id, run.status))
                );
            }
        }
        RunAction::Cancel { run_id, yes } => {
            let id = parse_run_id(&run_id)?;
            if !yes {
                print!("Cancel run {} for good? It cannot be resumed. [y/N] ", id);
                io::stdout().flush()?;

                let mut response = String::new();
                io::stdin().read_line(&mut response)?;

                if !response.trim().eq_ignore_ascii_case("y") {
                    println!("{}", formatter.info("Operation cancelled"));
                    return Ok(());
                }
            }
            let run = transport.cancel_run(id).await?;
            println!("{}", formatter.success(&format!("Run {} cancelled", run.id)));
        }
    }
    Ok(())
}
