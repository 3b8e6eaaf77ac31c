//! Listing discovery over paginated search results.
//!
//! One browser page walks the result pages sequentially (pagination is a
//! chain, page N links page N+1); candidate URLs stream out through a
//! channel while detail fetches run behind it. Parsing a captured results
//! page is a pure function so the card filtering is testable with fixture
//! HTML.

use std::collections::HashSet;

use scraper::{Html, Selector};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScraperConfig;

use super::page::{PageError, PageSession};
use super::{backoff_delay, CandidateUrl};

/// One listing card in the search results.
const CARD: &str = ".ticket-item";
/// Detail-page link inside a card.
const CARD_LINK: &str = "a.m-link-ticket";
/// Badge the site puts on dealership listings.
const DEALER_BADGE: &str = ".base-label.dealer, [data-seller-type=\"dealer\"]";
/// Badge the site puts on new-car listings.
const NEW_CAR_BADGE: &str = ".base-label.new, [data-new-auto=\"true\"]";
/// "Next page" control in the pager.
const NEXT_PAGE: &str = "a.page-link.js-next";

/// Discovery failed to produce anything at all.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("search page did not render any listing cards: {0}")]
    NotRendered(String),
    #[error("browser error on search page: {0}")]
    Page(#[from] PageError),
    #[error("no search page could be loaded, last tried {last_url}")]
    NoPages { last_url: String },
}

/// A parsed search-results page.
#[derive(Debug, Default)]
pub struct SearchPage {
    /// Detail-page URLs of used-car cards, in display order.
    pub listing_urls: Vec<String>,
    /// Absolute URL of the next results page, when the pager shows one.
    pub next_url: Option<String>,
}

/// Parse one rendered search-results page.
///
/// Cards carrying a dealership or new-car badge are dropped here even
/// though the start URL already restricts the category; the site's own
/// filtering drifts.
pub fn parse_search_page(html: &str, base_url: &str) -> SearchPage {
    let mut page = SearchPage::default();
    let (Ok(card), Ok(link), Ok(dealer), Ok(new_car), Ok(next)) = (
        Selector::parse(CARD),
        Selector::parse(CARD_LINK),
        Selector::parse(DEALER_BADGE),
        Selector::parse(NEW_CAR_BADGE),
        Selector::parse(NEXT_PAGE),
    ) else {
        return page;
    };

    let doc = Html::parse_document(html);
    for element in doc.select(&card) {
        if element.select(&dealer).next().is_some() || element.select(&new_car).next().is_some() {
            continue;
        }
        let Some(href) = element.select(&link).next().and_then(|a| a.value().attr("href")) else {
            continue;
        };
        if let Some(absolute) = absolutize(base_url, href) {
            page.listing_urls.push(absolute);
        }
    }

    page.next_url = doc
        .select(&next)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| absolutize(base_url, href));

    page
}

fn absolutize(base_url: &str, href: &str) -> Option<String> {
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(Into::into)
}

/// Synthesize the next results-page URL from the `page` query parameter.
///
/// Used when a page failed to load and its rendered pager is therefore
/// unavailable; skipping a broken page beats aborting the pass.
pub fn bump_page_param(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut page_no = 1u32;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter_map(|(key, value)| {
            if key == "page" {
                page_no = value.parse().unwrap_or(1);
                None
            } else {
                Some((key.into_owned(), value.into_owned()))
            }
        })
        .collect();

    let mut next = parsed.clone();
    next.query_pairs_mut()
        .clear()
        .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair("page", &(page_no + 1).to_string());
    Some(next.into())
}

/// Walks the paginated search results and feeds candidates into a channel.
pub struct ListingDiscovery<'a, P: PageSession> {
    page: &'a P,
    config: &'a ScraperConfig,
    seen: HashSet<String>,
}

impl<'a, P: PageSession> ListingDiscovery<'a, P> {
    pub fn new(page: &'a P, config: &'a ScraperConfig) -> Self {
        Self {
            page,
            config,
            seen: HashSet::new(),
        }
    }

    /// Run discovery to completion, returning the number of candidates
    /// yielded. Fails only when not a single results page could be loaded.
    pub async fn run(mut self, tx: mpsc::Sender<CandidateUrl>) -> Result<usize, DiscoveryError> {
        let mut current = self.config.start_url.clone();
        let mut yielded = 0usize;
        let mut pages_loaded = 0usize;
        let mut pages_without_new = 0u32;

        loop {
            let html = match self.load_page(&current).await {
                Ok(html) => {
                    pages_loaded += 1;
                    html
                }
                Err(err) => {
                    warn!("skipping search page {current}: {err}");
                    pages_without_new += 1;
                    if pages_without_new >= 2 {
                        break;
                    }
                    match bump_page_param(&current) {
                        Some(next) => {
                            current = next;
                            continue;
                        }
                        None => break,
                    }
                }
            };

            let parsed = parse_search_page(&html, &current);
            let mut new_on_page = 0usize;
            for url in parsed.listing_urls {
                // A listing can legitimately reappear across pages when the
                // site re-sorts between loads.
                if !self.seen.insert(url.clone()) {
                    continue;
                }
                let candidate = CandidateUrl {
                    url,
                    order: yielded,
                };
                new_on_page += 1;
                yielded += 1;
                if tx.send(candidate).await.is_err() {
                    debug!("candidate receiver dropped, stopping discovery");
                    return Ok(yielded);
                }
            }
            debug!("search page {current}: {new_on_page} new listing(s)");

            if new_on_page == 0 {
                pages_without_new += 1;
                if pages_without_new >= 2 {
                    info!("two consecutive pages without new listings, stopping");
                    break;
                }
            } else {
                pages_without_new = 0;
            }

            match parsed.next_url {
                Some(next) => current = next,
                None => {
                    info!("no next-page control, discovery complete");
                    break;
                }
            }
        }

        if pages_loaded == 0 {
            return Err(DiscoveryError::NoPages { last_url: current });
        }
        info!("discovery yielded {yielded} candidate(s) from {pages_loaded} page(s)");
        Ok(yielded)
    }

    /// Load one results page, retrying transient failures with backoff.
    async fn load_page(&self, url: &str) -> Result<String, DiscoveryError> {
        let mut attempt = 0u32;
        loop {
            match self.try_load(url).await {
                Ok(html) => return Ok(html),
                Err(err) if attempt < self.config.discovery_retries => {
                    let delay = backoff_delay(self.config.retry_backoff(), attempt);
                    warn!(
                        "search page load failed (attempt {}): {err}, retrying in {delay:?}",
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_load(&self, url: &str) -> Result<String, DiscoveryError> {
        self.page.navigate(url).await?;
        let rendered = self
            .page
            .wait_for(CARD, self.config.content_timeout())
            .await?;
        if !rendered {
            return Err(DiscoveryError::NotRendered(url.to_string()));
        }
        Ok(self.page.content().await?)
    }
}
