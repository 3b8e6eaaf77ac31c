//! Application configuration.
//!
//! Loaded from an optional TOML file with environment overrides; every
//! knob has a serde default so a bare or missing config file works. The
//! pipeline components receive these structs ready-made and never read the
//! environment themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "carharvest.toml";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

impl AppConfig {
    /// Load configuration from `path`, or from `carharvest.toml` when no
    /// path is given, falling back to defaults when neither exists. The
    /// `DATABASE_URL` and `START_URL` environment variables override the
    /// file afterwards.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(explicit) => Self::read_file(explicit)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::read_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(url) = std::env::var("START_URL") {
            config.scraper.start_url = url;
        }
        Ok(config)
    }

    fn read_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL.
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "carharvest.sqlite3".to_string()
}

/// Scraping pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Filtered search URL the crawl starts from.
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Maximum number of detail fetches in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries granted after a transient detail-fetch failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retries for a search-results page that fails to load.
    #[serde(default = "default_discovery_retries")]
    pub discovery_retries: u32,

    /// Base delay for exponential retry backoff, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-navigation timeout, in seconds.
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Timeout waiting for listing content to render, in seconds.
    #[serde(default = "default_content_timeout_secs")]
    pub content_timeout_secs: u64,

    /// Timeout waiting for the revealed phone number to render, in seconds.
    #[serde(default = "default_reveal_timeout_secs")]
    pub reveal_timeout_secs: u64,

    /// Politeness delay before each detail-page navigation, in milliseconds.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Grace period granted to in-flight fetches at shutdown, in seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Selectors marking a removed/expired listing page.
    #[serde(default = "default_removed_markers")]
    pub removed_markers: Vec<String>,
}

impl ScraperConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_timeout_secs)
    }

    pub fn reveal_timeout(&self) -> Duration {
        Duration::from_secs(self.reveal_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            start_url: default_start_url(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            discovery_retries: default_discovery_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            content_timeout_secs: default_content_timeout_secs(),
            reveal_timeout_secs: default_reveal_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            removed_markers: default_removed_markers(),
        }
    }
}

fn default_start_url() -> String {
    "https://auto.ria.com/uk/car/used/".to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_discovery_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_navigation_timeout_secs() -> u64 {
    45
}

fn default_content_timeout_secs() -> u64 {
    15
}

fn default_reveal_timeout_secs() -> u64 {
    10
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_removed_markers() -> Vec<String> {
    vec![
        "#autoDeletedTopBlock".to_string(),
        ".notice_head".to_string(),
    ]
}

/// Browser engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Run in headless mode (default: true). Set to false for debugging.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            chrome_args: Vec::new(),
        }
    }
}

fn default_headless() -> bool {
    true
}

/// Daily schedule for the `schedule` command, in local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_run_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: default_run_hour(),
            minute: 0,
        }
    }
}

fn default_run_hour() -> u32 {
    12
}

/// Backup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory backup snapshots are written to.
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("dumps")
}
