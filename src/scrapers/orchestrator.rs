//! Bounded-concurrency fetch orchestration.
//!
//! A fixed pool of workers drains the candidate channel; a finished slot
//! immediately claims the next candidate. Transient failures retry with
//! exponential backoff, permanent ones are recorded on the spot, and no
//! single listing can take the run down with it. Records reach the store
//! in completion order, not discovery order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::models::{CarListing, FailedUrl, RunSummary};

use super::fetcher::{FetchFailure, ListingFetcher};
use super::{backoff_delay, CandidateUrl};

/// Destination for completed records.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn upsert(&self, listing: &CarListing) -> anyhow::Result<()>;
}

/// Progress events emitted while a run is in flight.
#[derive(Debug, Clone)]
pub enum ScrapeEvent {
    FetchStarted {
        url: String,
    },
    Persisted {
        url: String,
        title: String,
    },
    Failed {
        url: String,
        attempts: u32,
        reason: String,
    },
}

/// Tuning for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of fetches in flight.
    pub concurrency: usize,
    /// Retries granted after a transient failure.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_backoff: Duration,
    /// How long an in-flight fetch may keep running once shutdown fires.
    pub shutdown_grace: Duration,
}

/// Drives detail fetchers to completion under a concurrency bound.
pub struct FetchOrchestrator<F, S> {
    fetcher: Arc<F>,
    store: Arc<S>,
    config: OrchestratorConfig,
}

impl<F, S> FetchOrchestrator<F, S>
where
    F: ListingFetcher + 'static,
    S: ListingStore + 'static,
{
    pub fn new(fetcher: Arc<F>, store: Arc<S>, config: OrchestratorConfig) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Drain `candidates` to completion and finalize the run summary.
    ///
    /// Returns once the candidate channel is exhausted and every worker has
    /// resolved its last fetch - success, permanent failure, or retries
    /// exhausted.
    pub async fn run(
        &self,
        candidates: mpsc::Receiver<CandidateUrl>,
        events: mpsc::Sender<ScrapeEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let started = Instant::now();
        let queue = Arc::new(Mutex::new(candidates));
        let claimed = Arc::new(AtomicUsize::new(0));
        let persisted = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::<FailedUrl>::new()));

        let workers = self.config.concurrency.max(1);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let fetcher = self.fetcher.clone();
            let store = self.store.clone();
            let config = self.config.clone();
            let queue = queue.clone();
            let claimed = claimed.clone();
            let persisted = persisted.clone();
            let failures = failures.clone();
            let events = events.clone();
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(
                    fetcher, store, config, queue, claimed, persisted, failures, events, shutdown,
                )
                .await;
            }));
        }
        drop(events);

        for handle in handles {
            let _ = handle.await;
        }

        let failed = std::mem::take(&mut *failures.lock().await);
        RunSummary {
            discovered: claimed.load(Ordering::Relaxed),
            persisted: persisted.load(Ordering::Relaxed),
            failed,
            elapsed: started.elapsed(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<F: ListingFetcher, S: ListingStore>(
    fetcher: Arc<F>,
    store: Arc<S>,
    config: OrchestratorConfig,
    queue: Arc<Mutex<mpsc::Receiver<CandidateUrl>>>,
    claimed: Arc<AtomicUsize>,
    persisted: Arc<AtomicUsize>,
    failures: Arc<Mutex<Vec<FailedUrl>>>,
    events: mpsc::Sender<ScrapeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        // Hold the queue lock only long enough to claim one candidate.
        let candidate = {
            let mut receiver = queue.lock().await;
            tokio::select! {
                candidate = receiver.recv() => candidate,
                _ = shutdown.changed() => None,
            }
        };
        let Some(candidate) = candidate else { break };

        claimed.fetch_add(1, Ordering::Relaxed);
        let _ = events
            .send(ScrapeEvent::FetchStarted {
                url: candidate.url.clone(),
            })
            .await;

        match fetch_with_retry(fetcher.as_ref(), &candidate.url, &config, &mut shutdown).await {
            Ok(listing) => match store.upsert(&listing).await {
                Ok(()) => {
                    persisted.fetch_add(1, Ordering::Relaxed);
                    let _ = events
                        .send(ScrapeEvent::Persisted {
                            url: listing.url.clone(),
                            title: listing.title.clone(),
                        })
                        .await;
                }
                Err(err) => {
                    record_failure(&failures, &events, &candidate.url, 1, format!("persistence: {err}"))
                        .await;
                }
            },
            Err((attempts, failure)) => {
                record_failure(&failures, &events, &candidate.url, attempts, failure.to_string())
                    .await;
            }
        }
    }
}

async fn record_failure(
    failures: &Mutex<Vec<FailedUrl>>,
    events: &mpsc::Sender<ScrapeEvent>,
    url: &str,
    attempts: u32,
    reason: String,
) {
    failures.lock().await.push(FailedUrl {
        url: url.to_string(),
        reason: reason.clone(),
    });
    let _ = events
        .send(ScrapeEvent::Failed {
            url: url.to_string(),
            attempts,
            reason,
        })
        .await;
}

/// Fetch one listing, retrying transient failures with exponential backoff.
///
/// Returns the attempt count alongside the terminal failure. Shutdown stops
/// further retries and abandons an in-flight fetch after the grace period.
async fn fetch_with_retry<F: ListingFetcher>(
    fetcher: &F,
    url: &str,
    config: &OrchestratorConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<CarListing, (u32, FetchFailure)> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;

        let mut fetch = fetcher.fetch(url);
        let outcome = tokio::select! {
            outcome = &mut fetch => outcome,
            _ = shutdown_fired(shutdown.clone()) => {
                match tokio::time::timeout(config.shutdown_grace, &mut fetch).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FetchFailure::Transient("abandoned at shutdown".into())),
                }
            }
        };

        match outcome {
            Ok(listing) => return Ok(listing),
            Err(failure @ FetchFailure::Permanent(_)) => return Err((attempts, failure)),
            Err(failure) => {
                if attempts > config.max_retries || *shutdown.borrow() {
                    return Err((attempts, failure));
                }
                let delay = backoff_delay(config.retry_backoff, attempts - 1);
                debug!("retrying {url} in {delay:?} ({failure})");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Resolves when the shutdown flag flips to true; never resolves when the
/// sender is gone without firing.
async fn shutdown_fired(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow_and_update() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    fn listing(url: &str) -> CarListing {
        CarListing {
            url: url.to_string(),
            title: format!("listing {url}"),
            price_usd: Some(9000),
            odometer: Some(120_000),
            username: None,
            phone_number: None,
            image_url: None,
            images_count: 0,
            car_number: None,
            car_vin: None,
            datetime_found: Utc::now(),
        }
    }

    /// In-memory store; URLs in `reject` fail every upsert.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, CarListing>>,
        reject: Vec<String>,
    }

    #[async_trait]
    impl ListingStore for MemoryStore {
        async fn upsert(&self, listing: &CarListing) -> anyhow::Result<()> {
            if self.reject.contains(&listing.url) {
                anyhow::bail!("UNIQUE constraint failed");
            }
            self.rows
                .lock()
                .await
                .insert(listing.url.clone(), listing.clone());
            Ok(())
        }
    }

    /// Fake fetcher tracking in-flight counts and per-URL attempts.
    #[derive(Default)]
    struct InstrumentedFetcher {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        attempts: Mutex<HashMap<String, u32>>,
        transient_urls: Vec<String>,
        permanent_urls: Vec<String>,
    }

    #[async_trait]
    impl ListingFetcher for InstrumentedFetcher {
        async fn fetch(&self, url: &str) -> Result<CarListing, FetchFailure> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            *self.attempts.lock().await.entry(url.to_string()).or_insert(0) += 1;

            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.transient_urls.iter().any(|u| u == url) {
                Err(FetchFailure::Transient("timed out".into()))
            } else if self.permanent_urls.iter().any(|u| u == url) {
                Err(FetchFailure::Permanent("listing removed".into()))
            } else {
                Ok(listing(url))
            }
        }
    }

    fn config(concurrency: usize, max_retries: u32) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency,
            max_retries,
            retry_backoff: Duration::from_millis(1),
            shutdown_grace: Duration::from_millis(50),
        }
    }

    async fn run_orchestrator(
        fetcher: Arc<InstrumentedFetcher>,
        store: Arc<MemoryStore>,
        config: OrchestratorConfig,
        urls: Vec<String>,
    ) -> RunSummary {
        let (tx, rx) = mpsc::channel(urls.len().max(1));
        for (order, url) in urls.into_iter().enumerate() {
            tx.send(CandidateUrl { url, order }).await.unwrap();
        }
        drop(tx);

        let (event_tx, mut event_rx) = mpsc::channel(256);
        let drain = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let orchestrator = FetchOrchestrator::new(fetcher, store, config);
        let summary = orchestrator.run(rx, event_tx, shutdown_rx).await;
        let _ = drain.await;
        summary
    }

    #[tokio::test]
    async fn concurrency_stays_bounded() {
        let fetcher = Arc::new(InstrumentedFetcher::default());
        let store = Arc::new(MemoryStore::default());
        let urls: Vec<String> = (0..12).map(|i| format!("https://cars.example/{i}")).collect();

        let summary =
            run_orchestrator(fetcher.clone(), store.clone(), config(3, 0), urls).await;

        assert_eq!(summary.persisted, 12);
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(store.rows.lock().await.len(), 12);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_exhaust() {
        let fetcher = Arc::new(InstrumentedFetcher {
            transient_urls: vec!["https://cars.example/flaky".to_string()],
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::default());
        let urls = vec![
            "https://cars.example/flaky".to_string(),
            "https://cars.example/good".to_string(),
        ];

        let summary = run_orchestrator(fetcher.clone(), store.clone(), config(2, 2), urls).await;

        // Initial attempt plus two retries.
        let attempts = fetcher.attempts.lock().await;
        assert_eq!(attempts["https://cars.example/flaky"], 3);
        assert_eq!(attempts["https://cars.example/good"], 1);
        drop(attempts);

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].url, "https://cars.example/flaky");
        // The rest of the run still landed.
        assert!(store.rows.lock().await.contains_key("https://cars.example/good"));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let fetcher = Arc::new(InstrumentedFetcher {
            permanent_urls: vec!["https://cars.example/gone".to_string()],
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::default());
        let urls = vec!["https://cars.example/gone".to_string()];

        let summary = run_orchestrator(fetcher.clone(), store, config(2, 3), urls).await;

        assert_eq!(fetcher.attempts.lock().await["https://cars.example/gone"], 1);
        assert_eq!(summary.failed.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_does_not_abort_the_run() {
        let fetcher = Arc::new(InstrumentedFetcher::default());
        let store = Arc::new(MemoryStore {
            reject: vec!["https://cars.example/bad-row".to_string()],
            ..Default::default()
        });
        let urls = vec![
            "https://cars.example/bad-row".to_string(),
            "https://cars.example/good".to_string(),
        ];

        let summary = run_orchestrator(fetcher, store.clone(), config(2, 0), urls).await;

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].reason.contains("persistence"));
    }

    #[tokio::test]
    async fn shutdown_stops_dispatching() {
        let fetcher = Arc::new(InstrumentedFetcher::default());
        let store = Arc::new(MemoryStore::default());
        let urls: Vec<String> = (0..8).map(|i| format!("https://cars.example/{i}")).collect();

        let (tx, rx) = mpsc::channel(urls.len());
        for (order, url) in urls.into_iter().enumerate() {
            tx.send(CandidateUrl { url, order }).await.unwrap();
        }
        drop(tx);

        let (event_tx, mut event_rx) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let orchestrator = FetchOrchestrator::new(fetcher, store, config(2, 0));
        let summary = orchestrator.run(rx, event_tx, shutdown_rx).await;
        let _ = drain.await;

        // Nothing new is claimed once shutdown is already set.
        assert_eq!(summary.discovered, 0);
        assert_eq!(summary.persisted, 0);
    }
}
