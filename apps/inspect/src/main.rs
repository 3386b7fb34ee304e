//! Prints the resume state recorded in a partsync completion log.

mod cli;
mod report;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use partsync_transfer::{TransferConfig, UploadCompletionTable};

use cli::Cli;
use report::{FileReport, Summary};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,partsync_transfer=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TransferConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TransferConfig::default(),
    }
    .apply_env();

    let table_file = cli
        .log
        .or_else(|| config.table_file.clone())
        .context("no completion log given (pass a path or set PARTSYNC_TABLE_FILE)")?;

    tracing::debug!(
        log = %table_file.display(),
        partition_size = config.partition_size,
        "inspecting completion log"
    );
    let table = UploadCompletionTable::try_new(Some(table_file.clone()), config.partition_size)?;
    if !table.is_table_file_exist().await {
        anyhow::bail!("completion log {} does not exist", table_file.display());
    }
    table
        .load_table()
        .await
        .with_context(|| format!("failed to replay {}", table_file.display()))?;

    let mut reports = Vec::new();
    for node in table.nodes().await {
        reports.push(FileReport::from_node(&node).await);
    }
    reports.sort_by(|a, b| a.path.cmp(&b.path));

    for report in &reports {
        println!("{report}");
    }
    println!("{}", Summary::from_reports(&reports));

    Ok(())
}
