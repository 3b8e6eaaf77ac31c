//! End-to-end scrape runs.
//!
//! Wires discovery, the fetch orchestrator, and the persister together for
//! one full pass: discovery walks result pages sequentially on its own
//! browser page while the worker pool drains candidates behind it.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::models::RunSummary;
use crate::repository::CarRepository;
use crate::scrapers::{
    BrowserEngine, BrowserFetcher, FetchOrchestrator, ListingDiscovery, OrchestratorConfig,
    ScrapeEvent,
};

/// Runs one discovery → fetch → persist pass end to end.
pub struct ScrapeService {
    engine: Arc<BrowserEngine>,
    repo: Arc<CarRepository>,
    config: ScraperConfig,
}

impl ScrapeService {
    pub fn new(engine: Arc<BrowserEngine>, repo: Arc<CarRepository>, config: ScraperConfig) -> Self {
        Self {
            engine,
            repo,
            config,
        }
    }

    /// Run one full scrape pass and return the finalized summary.
    ///
    /// Safe to call repeatedly; each call launches the browser as needed
    /// and shuts it down afterwards. Overlapping calls are not guarded
    /// against - the scheduler runs at most one pass at a time.
    pub async fn run_once(&self, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let result = self.run_inner(shutdown).await;
        self.engine.shutdown().await;
        result
    }

    async fn run_inner(&self, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        info!("starting scrape run from {}", self.config.start_url);
        self.repo.ensure_schema().await?;

        let catalog_page = self
            .engine
            .new_page(self.config.navigation_timeout())
            .await?;

        let (candidate_tx, candidate_rx) = mpsc::channel(self.config.concurrency.max(1) * 2);
        let (event_tx, event_rx) = mpsc::channel(64);
        let event_log = tokio::spawn(log_events(event_rx));

        let discovery_config = self.config.clone();
        let discovery = tokio::spawn(async move {
            let result = ListingDiscovery::new(&catalog_page, &discovery_config)
                .run(candidate_tx)
                .await;
            catalog_page.close().await;
            result
        });

        let fetcher = Arc::new(BrowserFetcher::new(
            self.engine.clone(),
            self.config.clone(),
        ));
        let orchestrator = FetchOrchestrator::new(
            fetcher,
            self.repo.clone(),
            OrchestratorConfig {
                concurrency: self.config.concurrency.max(1),
                max_retries: self.config.max_retries,
                retry_backoff: self.config.retry_backoff(),
                shutdown_grace: self.config.shutdown_grace(),
            },
        );

        let mut summary = orchestrator.run(candidate_rx, event_tx, shutdown).await;

        match discovery.await {
            Ok(Ok(yielded)) => summary.discovered = yielded,
            Ok(Err(err)) => {
                if summary.persisted == 0 && summary.failed.is_empty() {
                    // Not a single candidate came out of discovery.
                    return Err(err.into());
                }
                warn!("discovery ended early: {err}");
            }
            Err(err) => warn!("discovery task panicked: {err}"),
        }
        let _ = event_log.await;

        info!(
            discovered = summary.discovered,
            persisted = summary.persisted,
            failed = summary.failed.len(),
            elapsed = ?summary.elapsed,
            "scrape run complete"
        );
        Ok(summary)
    }
}

async fn log_events(mut events: mpsc::Receiver<ScrapeEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ScrapeEvent::FetchStarted { url } => debug!("fetching {url}"),
            ScrapeEvent::Persisted { url, title } => info!("saved `{title}` ({url})"),
            ScrapeEvent::Failed {
                url,
                attempts,
                reason,
            } => warn!("giving up on {url} after {attempts} attempt(s): {reason}"),
        }
    }
}
