//! CLI command definitions and argument parsing.

use clap::{Parser, Subcommand};
use douane_domain::Incoterm;

/// Douane CLI - Drive tariff extraction and legal ingestion runs.
#[derive(Debug, Parser)]
#[command(name = "douane")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<CliFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file path (default: ~/.douane/config.toml)
    #[arg(short, long, global = true, env = "DOUANE_CLI_CONFIG")]
    pub config: Option<String>,

    /// Profile to use
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliFormat {
    /// Table format (default)
    Table,
    /// JSON format
    Json,
    /// Quiet format (IDs only)
    Quiet,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract tariff lines from a schedule, batch by batch
    Extract(ExtractArgs),

    /// Ingest a legal text page by page
    IngestLegal(IngestLegalArgs),

    /// Inspect or control an extraction run
    Run(RunArgs),

    /// Compute duty, parafiscal tax and VAT on a customs value
    Taxes(TaxesArgs),

    /// Convert an invoice value to a customs value in dirhams
    Caf(CafArgs),

    /// Manage configuration profiles
    Profile(ProfileArgs),
}

/// Arguments for the extract command.
#[derive(Debug, Parser)]
pub struct ExtractArgs {
    /// Document identity
    pub pdf_id: String,

    /// Path of the document in the server's document store
    pub file_path: String,

    /// Return rows instead of persisting them
    #[arg(long)]
    pub preview: bool,

    /// Resume this run instead of starting a new one
    #[arg(long)]
    pub run_id: Option<String>,

    /// Pages per batch (overrides the configuration)
    #[arg(long)]
    pub pages_per_batch: Option<u32>,

    /// Write everything received to this JSON file
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for the ingest-legal command.
#[derive(Debug, Parser)]
pub struct IngestLegalArgs {
    /// Document identity
    pub pdf_id: String,

    /// Path of the document in the server's document store
    pub file_path: String,

    /// Last page to ingest (default: the whole document)
    #[arg(long)]
    pub end_page: Option<u32>,

    /// Resume this run instead of starting a new one
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Arguments for run management.
#[derive(Debug, Parser)]
pub struct RunArgs {
    #[command(subcommand)]
    pub action: RunAction,
}

/// Run management actions.
#[derive(Debug, Subcommand)]
pub enum RunAction {
    /// Show the server's view of a run
    Status {
        /// Run id
        run_id: String,
    },

    /// Pause a run so it can be resumed later
    Pause {
        /// Run id
        run_id: String,
    },

    /// Cancel a run for good
    Cancel {
        /// Run id
        run_id: String,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

/// Arguments for the taxes command.
#[derive(Debug, Parser)]
pub struct TaxesArgs {
    /// Customs value in dirhams
    pub caf_mad: f64,

    /// Import duty rate, in percent
    #[arg(short, long)]
    pub duty_rate: f64,

    /// VAT rate, in percent
    #[arg(short, long, default_value = "20")]
    pub vat_rate: f64,

    /// Parafiscal tax rate, in percent (default: 0.25)
    #[arg(short, long)]
    pub tpf_rate: Option<f64>,
}

/// Arguments for the caf command.
#[derive(Debug, Parser)]
pub struct CafArgs {
    /// Invoice value
    pub value: f64,

    /// Invoice currency
    #[arg(long, default_value = "MAD")]
    pub currency: String,

    /// Delivery term (EXW, FOB, CFR, CIF, DAP, ...)
    #[arg(short, long, value_parser = parse_incoterm)]
    pub incoterm: Incoterm,

    /// Dirhams per unit of the invoice currency
    #[arg(short, long, default_value = "1")]
    pub exchange_rate: f64,

    /// Freight cost in the invoice currency
    #[arg(long)]
    pub freight: Option<f64>,

    /// Insurance cost in the invoice currency
    #[arg(long)]
    pub insurance: Option<f64>,
}

/// Arguments for profile management.
#[derive(Debug, Parser)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub action: ProfileAction,
}

/// Profile management actions.
#[derive(Debug, Subcommand)]
pub enum ProfileAction {
    /// List all profiles
    List,

    /// Create or update a profile
    Add {
        /// Profile name
        name: String,
        /// Server URL
        #[arg(short, long)]
        url: String,
    },

    /// Switch to a different profile
    Use {
        /// Profile name
        name: String,
    },
}

fn parse_incoterm(s: &str) -> Result<Incoterm, String> {
    Incoterm::parse(s).ok_or_else(|| format!("unknown incoterm '{}'", s))
}

impl From<CliFormat> for crate::config::OutputFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Table => crate::config::OutputFormat::Table,
            CliFormat::Json => crate::config::OutputFormat::Json,
            CliFormat::Quiet => crate::config::OutputFormat::Quiet,
        }
    }
}
