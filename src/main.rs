//! # main.rs
//!
//! Command line parsing and tool logic.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use vosinv::commands::Commands;
use vosinv::models::OutputFormat;
use vosinv::vlog::{self, LogLevel};
use vosinv::{Inventory, InventoryConfig};

/// Multi-site VergeOS VM inventory
#[derive(Parser)]
#[command(name = "vosinv")]
#[command(author = "Francesco - GameVision Italia CTO")]
#[command(version)]
#[command(about = "Build one inventory from the VMs of many VergeOS sites", long_about = None)]
struct Cli {
    /// Inventory configuration file (YAML)
    #[arg(short = 'c', long = "config", env = "VOSINV_CONFIG")]
    config: PathBuf,

    /// Print the whole inventory
    #[arg(long = "list", conflicts_with = "host")]
    list: bool,

    /// Print the variables of one host
    #[arg(long = "host")]
    host: Option<String>,

    /// Ignore the cache and query every site
    #[arg(long = "refresh")]
    refresh: bool,

    /// Enable verbose debug logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Output format as CSV
    #[arg(long = "as-csv", conflicts_with = "as_table")]
    as_csv: bool,

    /// Output format as table with borders
    #[arg(long = "as-table", conflicts_with = "as_csv")]
    as_table: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    vlog::init(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn });
    debug!("--config: {}", cli.config.display());

    // Config problems are fatal and surface before any network activity.
    let config = InventoryConfig::load(&cli.config)
        .await
        .with_context(|| format!("invalid inventory config {}", cli.config.display()))?;

    let output_format = if cli.as_csv {
        OutputFormat::Csv
    } else if cli.as_table {
        OutputFormat::Table
    } else {
        OutputFormat::Json
    };

    let prefix = config.hostvar_prefix.clone();
    let inventory = Inventory::new(config);
    let report = if cli.refresh {
        inventory.refresh().await
    } else {
        inventory.get_catalog().await
    };

    // Site and cache warnings are already logged where they are raised.
    if !report.warnings.is_empty() {
        debug!("Inventory built with {} warning(s)", report.warnings.len());
    }

    let commands = Commands::new(report, &prefix, output_format);
    match cli.host {
        Some(host) => commands.host(&host),
        None => {
            // --list is what Ansible passes; it is also the default.
            if !cli.list {
                debug!("No --list or --host given, listing");
            }
            commands.list()
        }
    }
}
