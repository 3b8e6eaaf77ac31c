//! Chromium-driven page sessions.
//!
//! The marketplace only renders listings with JavaScript, so fetching goes
//! through a real browser over CDP (chromiumoxide). The engine launches
//! one headless browser lazily and hands out pages; each in-flight fetch
//! owns exactly one page for its lifetime.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::BrowserSettings;

use super::page::{PageError, PageSession};

/// Realistic user agent; the site serves a degraded page to obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// How often `wait_for` re-polls the DOM.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lazily launched headless browser shared by a run.
pub struct BrowserEngine {
    settings: BrowserSettings,
    browser: Mutex<Option<Browser>>,
}

impl BrowserEngine {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            browser: Mutex::new(None),
        }
    }

    /// Find a Chrome/Chromium executable.
    fn find_chrome() -> Result<PathBuf> {
        for path in Self::CHROME_PATHS {
            let candidate = std::path::Path::new(path);
            if candidate.exists() {
                debug!("found Chrome at {path}");
                return Ok(candidate.to_path_buf());
            }
        }

        for command in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(command).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        debug!("found Chrome in PATH: {path}");
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found; install it or add it to PATH"
        ))
    }

    /// Launch the browser if it is not already running.
    async fn ensure_browser(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!("launching browser (headless={})", self.settings.headless);
        let chrome = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome);
        if !self.settings.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-background-networking")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &self.settings.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build browser config: {err}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        *guard = Some(browser);
        Ok(())
    }

    /// Open a fresh page with a realistic user agent.
    pub async fn new_page(&self, navigation_timeout: Duration) -> Result<ChromiumPage> {
        self.ensure_browser().await?;

        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("browser not running"))?;
        let page = browser.new_page("about:blank").await?;
        page.execute(SetUserAgentOverrideParams::new(USER_AGENT.to_string()))
            .await?;

        Ok(ChromiumPage {
            page,
            navigation_timeout,
        })
    }

    /// Shut the browser down, discarding any remaining pages.
    pub async fn shutdown(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
            info!("browser closed");
        }
    }
}

/// One live browser tab implementing the rendered-page contract.
pub struct ChromiumPage {
    page: Page,
    navigation_timeout: Duration,
}

impl ChromiumPage {
    /// Close the underlying tab; pages left open accumulate in the browser.
    pub async fn close(self) {
        let _ = self.page.close().await;
    }
}

#[async_trait]
impl PageSession for ChromiumPage {
    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(PageError::new(format!("navigation failed: {err}"))),
            Err(_) => Err(PageError::new(format!(
                "navigation timed out after {:?}",
                self.navigation_timeout
            ))),
        }
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, PageError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<bool, PageError> {
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element
            .click()
            .await
            .map_err(|err| PageError::new(format!("click failed: {err}")))?;
        Ok(true)
    }

    async fn content(&self) -> Result<String, PageError> {
        self.page
            .content()
            .await
            .map_err(|err| PageError::new(format!("content read failed: {err}")))
    }
}
