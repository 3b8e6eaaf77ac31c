//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use crate::config::AppConfig;
use crate::models::RunSummary;
use crate::repository::{AsyncSqlitePool, CarRepository};
use crate::scrapers::BrowserEngine;
use crate::services::{run_daily, BackupService, ScrapeService};

#[derive(Parser)]
#[command(name = "carharvest")]
#[command(about = "Used-car listing harvester")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "CARHARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full scrape pass and print the summary
    Run {
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a scrape pass and a backup daily at the configured time
    Schedule,
    /// Create a database backup snapshot
    Backup,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let pool = AsyncSqlitePool::new(&config.database.url);

    match cli.command {
        Commands::Run { json } => {
            let repo = Arc::new(CarRepository::new(pool));
            let service = build_scrape_service(&config, repo.clone());
            let summary = service.run_once(shutdown_signal()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
                println!("total stored: {}", repo.count().await?);
            }
        }
        Commands::Schedule => {
            let repo = Arc::new(CarRepository::new(pool.clone()));
            let service = build_scrape_service(&config, repo);
            let backup = BackupService::new(pool, config.backup.dir.clone());
            run_daily(&service, &backup, &config.schedule, shutdown_signal()).await?;
        }
        Commands::Backup => {
            let backup = BackupService::new(pool, config.backup.dir.clone());
            let path = backup.create_dump().await?;
            println!("backup written to {}", path.display());
        }
    }

    Ok(())
}

fn build_scrape_service(config: &AppConfig, repo: Arc<CarRepository>) -> ScrapeService {
    let engine = Arc::new(BrowserEngine::new(config.browser.clone()));
    ScrapeService::new(engine, repo, config.scraper.clone())
}

/// Watch channel flipped to true on ctrl-c.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = tx.send(true);
        }
        // Keep the sender alive so receivers never observe a closed channel.
        std::future::pending::<()>().await;
    });
    rx
}

fn print_summary(summary: &RunSummary) {
    println!("discovered: {}", summary.discovered);
    println!("persisted:  {}", summary.persisted);
    println!("failed:     {}", summary.failed.len());
    for failure in &summary.failed {
        println!("  {} - {}", failure.url, failure.reason);
    }
    println!("elapsed:    {:.1?}", summary.elapsed);
}
