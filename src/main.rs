//! NFT Collection Data Collector CLI
//!
//! Collects token attributes and sale transactions for one NFT collection and
//! writes them as CSV and JSON text files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use nft_collector::collection::Collection;
use nft_collector::config::CollectorConfig;
use nft_collector::explorer::MAX_TRANSFERS_PER_PAGE;
use nft_collector::export::export_file_path;

#[derive(Parser)]
#[command(name = "nft-collector")]
#[command(version)]
#[command(about = "NFT collection attribute and sale collector", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output directory for exported files
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse token attributes and export them
    Attributes {
        /// First token id
        #[arg(short, long, default_value = "0")]
        start: u64,

        /// Last token id (defaults to maxTokens or totalSupply)
        #[arg(short, long)]
        end: Option<u64>,

        /// Also write the JSON text export
        #[arg(long)]
        text: bool,
    },

    /// Parse sale transactions and export them
    Transactions {
        /// Transfers requested per explorer page
        #[arg(long, default_value_t = MAX_TRANSFERS_PER_PAGE)]
        step: usize,

        /// First block
        #[arg(long, default_value = "0")]
        start_block: u64,

        /// Last block (defaults to the chain head)
        #[arg(long)]
        end_block: Option<u64>,

        /// Also write the JSON text export
        #[arg(long)]
        text: bool,
    },

    /// Show connection details and existing export files
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => CollectorConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => CollectorConfig::load().context("Failed to load config from environment")?,
    };

    if let Some(dir) = cli.output_dir {
        config.paths.output_dir = dir;
    }
    config.validate().context("Invalid configuration")?;
    config.ensure_directories()?;

    match cli.command {
        Commands::Attributes { start, end, text } => {
            cmd_attributes(&config, start, end, text).await?;
        }
        Commands::Transactions {
            step,
            start_block,
            end_block,
            text,
        } => {
            cmd_transactions(&config, step, start_block, end_block, text).await?;
        }
        Commands::Status => {
            cmd_status(&config).await?;
        }
    }

    Ok(())
}

fn folder_arg(dir: &Path) -> String {
    dir.to_string_lossy().into_owned()
}

async fn cmd_attributes(
    config: &CollectorConfig,
    start: u64,
    end: Option<u64>,
    text: bool,
) -> Result<()> {
    info!("=== Parsing Attributes ===");

    let mut collection = Collection::open(config)
        .await
        .context("Failed to connect to the collection")?;
    let report = collection
        .parse_attributes(start, end)
        .await
        .context("Failed to parse attributes")?;

    info!(
        "Token ids {}..={}: {} parsed, {} skipped",
        report.start,
        report.end,
        report.appended,
        report.skipped.len()
    );
    if report.appended == 0 {
        warn!("No attributes parsed, nothing to export");
        return Ok(());
    }

    let folder = folder_arg(&config.paths.output_dir);
    let df = collection
        .attributes_to_table(true, &folder)
        .await
        .context("Failed to export attributes table")?;
    info!("Attribute table: {} rows x {} columns", df.height(), df.width());

    if text {
        let path = collection
            .attributes_to_text_file(&folder)
            .await
            .context("Failed to export attributes text")?;
        info!("Attributes text saved to {:?}", path);
    }

    Ok(())
}

async fn cmd_transactions(
    config: &CollectorConfig,
    step: usize,
    start_block: u64,
    end_block: Option<u64>,
    text: bool,
) -> Result<()> {
    info!("=== Parsing Transactions ===");

    let mut collection = Collection::open(config)
        .await
        .context("Failed to connect to the collection")?;

    // Export whatever was collected even when pagination fails part way.
    let outcome = collection
        .parse_transactions(step, start_block, end_block)
        .await;
    match &outcome {
        Ok(report) => info!(
            "Blocks {}..={}: {} sales over {} pages ({} zero-value dropped, ended by {:?})",
            report.start_block,
            report.end_block,
            report.appended,
            report.pages,
            report.zero_value_dropped,
            report.end
        ),
        Err(e) => warn!(
            "Transaction parsing stopped early with {} sales collected: {}",
            collection.transactions().len(),
            e
        ),
    }

    if !collection.transactions().is_empty() {
        let folder = folder_arg(&config.paths.output_dir);
        let df = collection
            .transactions_to_table(true, &folder)
            .await
            .context("Failed to export transactions table")?;
        info!("Transaction table: {} rows x {} columns", df.height(), df.width());

        if text {
            let path = collection
                .transactions_to_text_file(&folder)
                .await
                .context("Failed to export transactions text")?;
            info!("Transactions text saved to {:?}", path);
        }
    } else {
        warn!("No sales parsed, nothing to export");
    }

    outcome.context("Failed to parse transactions")?;
    Ok(())
}

async fn cmd_status(config: &CollectorConfig) -> Result<()> {
    info!("=== Collector Status ===");
    info!("Output directory: {:?}", config.paths.output_dir);

    let collection = Collection::open(config)
        .await
        .context("Failed to connect to the collection")?;
    let contract = collection.contract();
    let symbol = contract.symbol().await.context("Failed to read symbol")?;
    info!("Contract {} ({})", collection.address(), symbol);

    for function in ["maxTokens", "totalSupply"] {
        let mark = if contract.supports(function) { "✓" } else { "✗" };
        info!("  {} {}()", mark, function);
    }

    let folder = folder_arg(&config.paths.output_dir);
    for kind in ["attributes", "transactions"] {
        for extension in ["csv", "txt"] {
            let path = export_file_path(&folder, kind, &symbol, extension);
            if path.exists() {
                let size_kb = std::fs::metadata(&path)?.len() / 1024;
                info!("  {} {:?} ({} KB)", "✓", path, size_kb);
            } else {
                info!("  {} {:?}: not found", "✗", path);
            }
        }
    }

    Ok(())
}
