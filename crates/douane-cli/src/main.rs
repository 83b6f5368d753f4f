//! Douane CLI - Command-line front end of the extraction server.

use clap::Parser;
use douane_cli::commands;
use douane_cli::{Cli, Command, Config, Formatter};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> douane_cli::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };
    let mut config = Config::load_from(&config_path)?;

    if let Some(profile_name) = cli.profile {
        config.switch_profile(profile_name)?;
    }

    let format = cli
        .format
        .map(Into::into)
        .unwrap_or(config.settings.format);
    let color_enabled = !cli.no_color && config.settings.color;
    let formatter = Formatter::new(format, color_enabled);

    match cli.command {
        Command::Profile(args) => {
            commands::execute_profile(args, &mut config, &config_path, &formatter)?;
        }
        Command::Taxes(args) => commands::execute_taxes(args, &formatter)?,
        Command::Caf(args) => commands::execute_caf(args, &formatter)?,
        cmd => {
            // Commands that talk to the server
            let server_url = config.get_active_profile()?.server_url.clone();
            let orchestrator = config.orchestrator.clone();

            match cmd {
                Command::Extract(args) => {
                    commands::execute_extract(args, &server_url, orchestrator, &formatter).await?;
                }
                Command::IngestLegal(args) => {
                    commands::execute_ingest_legal(args, &server_url, orchestrator, &formatter)
                        .await?;
                }
                Command::Run(args) => {
                    commands::execute_run(args, &server_url, &orchestrator, &formatter).await?;
                }
                Command::Profile(_) | Command::Taxes(_) | Command::Caf(_) => {}
            }
        }
    }

    Ok(())
}
