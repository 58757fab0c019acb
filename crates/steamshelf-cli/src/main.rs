use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use steamshelf_storage::WatermarkStore;
use steamshelf_sync::{FeedReport, FeedStatus, SyncConfig, SyncRunSummary};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "steamshelf")]
#[command(about = "Incremental store catalog sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass over both feeds.
    Sync {
        /// Print the pass summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Serve the read API; runs a pass at startup and on the configured cron.
    Serve,
    #[command(subcommand)]
    Watermark(WatermarkCommand),
}

#[derive(Debug, Subcommand)]
enum WatermarkCommand {
    Show,
    /// Forget sync progress so the next pass is a full sync.
    Reset,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { json: false }) {
        Commands::Sync { json } => {
            let summary = steamshelf_sync::run_sync_once_from_env().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if !summary.succeeded() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Serve => steamshelf_web::serve_from_env().await?,
        Commands::Watermark(cmd) => {
            let store = WatermarkStore::new(SyncConfig::from_env().watermark_path);
            match cmd {
                WatermarkCommand::Show => {
                    let watermark = store
                        .load_checked()
                        .await
                        .context("reading watermark")?
                        .unwrap_or_default();
                    println!("{}", serde_json::to_string_pretty(&watermark)?);
                }
                WatermarkCommand::Reset => {
                    if store.reset().await? {
                        println!("watermark reset: {}", store.path().display());
                    } else {
                        println!("no watermark at {}", store.path().display());
                    }
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &SyncRunSummary) {
    println!(
        "sync complete: run_id={} elapsed_ms={} taxonomy_hash={} catalog_cursor={}",
        summary.run_id,
        (summary.finished_at - summary.started_at).num_milliseconds(),
        display_opt(summary.watermark.taxonomy_hash),
        display_opt(summary.watermark.catalog_cursor),
    );
    print_feed(&summary.taxonomy);
    print_feed(&summary.catalog);
}

fn print_feed(report: &FeedReport) {
    let outcome = match &report.status {
        FeedStatus::Unchanged => "unchanged".to_string(),
        FeedStatus::Applied { records } => format!("applied {records} records"),
        FeedStatus::Failed { error } => format!("FAILED: {error}"),
    };
    println!("  {} ({}): {outcome}", report.feed, report.mode);
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
