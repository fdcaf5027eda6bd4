//! Gastos Ingest - pipeline entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gastos_common::logging::{init_logging, LogConfig, LogLevel};
use gastos_ingest::{Pipeline, PipelineConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "gastos-ingest")]
#[command(author, version, about = "Raw, bronze and silver ingestion of public spending data")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect API pages into raw and consolidate them into bronze
    Collect {
        /// Override the configured page ceiling
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// Profile bronze and build the silver layer
    Silver,

    /// Collect, consolidate and transform in one go
    Run {
        /// Override the configured page ceiling
        #[arg(long)]
        max_pages: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::default()
        .with_level(log_level)
        .with_file_prefix("gastos-ingest")
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    if let Command::Collect { max_pages: Some(pages) } | Command::Run { max_pages: Some(pages) } =
        cli.command
    {
        config.max_pages = pages;
    }

    let pipeline = Pipeline::new(config).context("Failed to prepare data directories")?;

    match cli.command {
        Command::Collect { .. } => {
            collect(&pipeline).await?;
        },
        Command::Silver => {
            silver(&pipeline);
        },
        Command::Run { .. } => {
            if collect(&pipeline).await? {
                silver(&pipeline);
            }
        },
    }

    info!("Pipeline complete");
    Ok(())
}

/// Returns whether collection ran to completion
async fn collect(pipeline: &Pipeline) -> Result<bool> {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        warn!("Received Ctrl+C, stopping collection");
        on_ctrl_c.cancel();
    });

    let report = pipeline.collect(cancel).await?;
    info!(
        fetched = report.collection.fetched,
        skipped = report.collection.skipped,
        failed = report.collection.failed,
        "Collection stage done"
    );
    if let Some(consolidation) = report.consolidation {
        info!(
            records = consolidation.records,
            partitions = consolidation.partitions_written,
            "Bronze stage done"
        );
    }
    Ok(!report.collection.cancelled)
}

fn silver(pipeline: &Pipeline) {
    let summary = pipeline.silver();
    for path in &summary.failed {
        warn!(partition = %path.display(), "Partition left stale");
    }
    info!(
        partitions = summary.partitions.len(),
        rows = summary.final_rows(),
        "Silver stage done"
    );
}
