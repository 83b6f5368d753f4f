//! Douane server binary
//!
//! Starts the HTTP service for batch extraction and legal ingestion.

use douane_server::{config::ServerConfig, start_server, ServerError};
use std::env;
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    let args: Vec<String> = env::args().collect();

    let config = if args.len() > 2 && args[1] == "--config" {
        ServerConfig::load(Some(Path::new(&args[2])))?
    } else if args.len() > 1 && args[1] == "--help" {
        print_help();
        process::exit(0);
    } else {
        eprintln!("Warning: No config file specified, using defaults and environment");
        eprintln!("Usage: douane-server --config <path-to-config.toml>");
        eprintln!();
        ServerConfig::load(None)?
    };

    start_server(config).await
}

fn print_help() {
    println!("Douane Server - Paginated extraction of tariff schedules and legal texts");
    println!();
    println!("USAGE:");
    println!("    douane-server --config <path-to-config.toml>");
    println!();
    println!("OPTIONS:");
    println!("    --config <file>    Load configuration from TOML file");
    println!("    --help             Print this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    DOUANE_BIND_ADDRESS, DOUANE_PORT, DOUANE_DATABASE, DOUANE_STORAGE_ROOT");
    println!("    override the file. Provider keys are read from the variables named by");
    println!("    llm.api_key_env and embedding.api_key_env (ANTHROPIC_API_KEY and");
    println!("    OPENAI_API_KEY by default). A .env file is loaded if present.");
    println!("    RUST_LOG sets the log filter (default: info).");
    println!();
}
