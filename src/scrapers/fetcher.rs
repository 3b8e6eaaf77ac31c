//! Detail-page fetching: one browser page per listing.
//!
//! The sequence per listing is Navigate → WaitForContentReady →
//! RevealPhone → Extract. Every failure is classified as transient
//! (retrying may help) or permanent (it cannot); a failed phone reveal is
//! neither - the fetch proceeds and the field comes back absent.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ScraperConfig;
use crate::models::CarListing;

use super::browser::BrowserEngine;
use super::extract::{self, extract_listing};
use super::page::PageSession;

/// Control that unmasks the seller's phone number.
const PHONE_REVEAL: &str = "#sellerInfo div.button-main button[data-action=\"showBottomPopUp\"]";

/// Classified failure for one listing fetch.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// Timeouts and transport errors; retrying may help.
    #[error("transient: {0}")]
    Transient(String),
    /// Removed listings and layout mismatches; retrying cannot help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Seam between the orchestrator and the browser-backed fetch sequence.
#[async_trait]
pub trait ListingFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<CarListing, FetchFailure>;
}

/// Drive the fetch sequence on one already-open page.
pub async fn fetch_listing<P: PageSession>(
    page: &P,
    url: &str,
    config: &ScraperConfig,
) -> Result<CarListing, FetchFailure> {
    page.navigate(url)
        .await
        .map_err(|err| FetchFailure::Transient(format!("navigation failed: {err}")))?;

    let ready = page
        .wait_for(extract::TITLE, config.content_timeout())
        .await
        .map_err(|err| FetchFailure::Transient(format!("content wait failed: {err}")))?;

    if !ready {
        // Distinguish a listing that no longer exists from one that is
        // merely slow to render.
        let html = page.content().await.unwrap_or_default();
        if is_removed_page(&html, &config.removed_markers) {
            return Err(FetchFailure::Permanent("listing removed or expired".into()));
        }
        return Err(FetchFailure::Transient(
            "timed out waiting for listing content".into(),
        ));
    }

    reveal_phone(page, config).await;

    let html = page
        .content()
        .await
        .map_err(|err| FetchFailure::Transient(format!("content read failed: {err}")))?;

    extract_listing(url, &html).map_err(|err| FetchFailure::Permanent(err.to_string()))
}

/// Trigger the phone-unmask control and wait for the digits to render.
///
/// Never fails the fetch; a listing without a readable phone number is
/// still a listing.
async fn reveal_phone<P: PageSession>(page: &P, config: &ScraperConfig) {
    match page.click(PHONE_REVEAL).await {
        Ok(true) => match page
            .wait_for(extract::PHONE_POPUP, config.reveal_timeout())
            .await
        {
            Ok(true) => debug!("phone number revealed"),
            Ok(false) => warn!("phone popup did not render in time"),
            Err(err) => warn!("phone reveal wait failed: {err}"),
        },
        Ok(false) => debug!("no phone reveal control on page"),
        Err(err) => warn!("phone reveal click failed: {err}"),
    }
}

/// Does the captured page match one of the removed-listing markers?
fn is_removed_page(html: &str, markers: &[String]) -> bool {
    let doc = Html::parse_document(html);
    markers
        .iter()
        .filter_map(|marker| Selector::parse(marker).ok())
        .any(|selector| doc.select(&selector).next().is_some())
}

/// Browser-backed fetcher: one fresh page per in-flight listing, closed on
/// completion so tabs never accumulate.
pub struct BrowserFetcher {
    engine: Arc<BrowserEngine>,
    config: ScraperConfig,
}

impl BrowserFetcher {
    pub fn new(engine: Arc<BrowserEngine>, config: ScraperConfig) -> Self {
        Self { engine, config }
    }
}

#[async_trait]
impl ListingFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<CarListing, FetchFailure> {
        let delay = self.config.request_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let page = self
            .engine
            .new_page(self.config.navigation_timeout())
            .await
            .map_err(|err| FetchFailure::Transient(format!("browser page: {err}")))?;

        let result = fetch_listing(&page, url, &self.config).await;
        page.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::page::PageError;
    use std::sync::Mutex;
    use std::time::Duration;

    const DETAIL_PAGE: &str = r#"
        <div id="basicInfoTitle">Volkswagen Golf VII 2016</div>
        <div id="basicInfoPrice"><span class="titleL">15 500 $</span></div>
        <div id="autoPhonePopUpResponse">
            <div class="button-main"><span class="common-text">(063) 213 44 11</span></div>
        </div>
    "#;

    const REMOVED_PAGE: &str = r#"<div id="autoDeletedTopBlock">Advert deleted</div>"#;

    /// Scripted detail page for driving the fetch sequence.
    struct ScriptedPage {
        navigate_fails: bool,
        content_ready: bool,
        reveal_present: bool,
        popup_renders: bool,
        html: String,
        clicks: Mutex<Vec<String>>,
    }

    impl ScriptedPage {
        fn serving(html: &str) -> Self {
            Self {
                navigate_fails: false,
                content_ready: true,
                reveal_present: true,
                popup_renders: true,
                html: html.to_string(),
                clicks: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageSession for ScriptedPage {
        async fn navigate(&self, _url: &str) -> Result<(), PageError> {
            if self.navigate_fails {
                Err(PageError::new("net::ERR_CONNECTION_TIMED_OUT"))
            } else {
                Ok(())
            }
        }

        async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<bool, PageError> {
            if selector == extract::TITLE {
                Ok(self.content_ready)
            } else if selector == extract::PHONE_POPUP {
                Ok(self.popup_renders)
            } else {
                Ok(false)
            }
        }

        async fn click(&self, selector: &str) -> Result<bool, PageError> {
            self.clicks.lock().unwrap().push(selector.to_string());
            Ok(self.reveal_present)
        }

        async fn content(&self) -> Result<String, PageError> {
            Ok(self.html.clone())
        }
    }

    #[test]
    fn removed_marker_detection_uses_configured_selectors() {
        let markers = vec!["#autoDeletedTopBlock".to_string()];
        assert!(is_removed_page(REMOVED_PAGE, &markers));
        assert!(!is_removed_page(DETAIL_PAGE, &markers));
    }

    #[tokio::test]
    async fn successful_fetch_reveals_and_extracts() {
        let page = ScriptedPage::serving(DETAIL_PAGE);
        let config = ScraperConfig::default();

        let listing = fetch_listing(&page, "https://cars.example/auto_golf_1.html", &config)
            .await
            .unwrap();

        assert_eq!(listing.title, "Volkswagen Golf VII 2016");
        assert_eq!(listing.phone_number.as_deref(), Some("380632134411"));
        assert_eq!(page.clicks.lock().unwrap().as_slice(), [PHONE_REVEAL]);
    }

    #[tokio::test]
    async fn navigation_error_is_transient() {
        let mut page = ScriptedPage::serving(DETAIL_PAGE);
        page.navigate_fails = true;
        let config = ScraperConfig::default();

        let err = fetch_listing(&page, "https://cars.example/a.html", &config)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn slow_page_is_transient() {
        let mut page = ScriptedPage::serving(DETAIL_PAGE);
        page.content_ready = false;
        let config = ScraperConfig::default();

        let err = fetch_listing(&page, "https://cars.example/a.html", &config)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn removed_listing_is_permanent() {
        let mut page = ScriptedPage::serving(REMOVED_PAGE);
        page.content_ready = false;
        let config = ScraperConfig::default();

        let err = fetch_listing(&page, "https://cars.example/a.html", &config)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn failed_reveal_still_succeeds_without_phone() {
        let page_html = r#"<div id="basicInfoTitle">Golf</div>"#;
        let mut page = ScriptedPage::serving(page_html);
        page.reveal_present = false;
        let config = ScraperConfig::default();

        let listing = fetch_listing(&page, "https://cars.example/a.html", &config)
            .await
            .unwrap();
        assert_eq!(listing.phone_number, None);
    }

    #[tokio::test]
    async fn missing_mandatory_field_is_permanent() {
        let page = ScriptedPage::serving("<html><body>unexpected layout</body></html>");
        let config = ScraperConfig::default();

        let err = fetch_listing(&page, "https://cars.example/a.html", &config)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
