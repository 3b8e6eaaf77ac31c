//! carharvest - used-car listing harvester.
//!
//! Continuously collects used-car advertisements from a JavaScript-rendered
//! marketplace and persists them without duplication.

mod cli;
mod config;
mod models;
mod repository;
mod schema;
mod scrapers;
mod services;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "carharvest=debug"
    } else {
        "carharvest=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
