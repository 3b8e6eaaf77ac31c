//! Rendered-page capability boundary.
//!
//! The pipeline needs exactly four operations from a browser page:
//! navigate, wait for an element, click an element, and read the rendered
//! DOM. Keeping them behind a trait lets discovery and fetching run against
//! chromiumoxide in production and scripted fakes in tests.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failure while talking to a browser page.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PageError(pub String);

impl PageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One live rendered page.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Load `url`, resolving once the main document has committed.
    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    /// Wait until `selector` matches an element in the DOM.
    ///
    /// Returns `Ok(false)` when the timeout elapses without a match.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, PageError>;

    /// Click the first element matching `selector`.
    ///
    /// Returns `Ok(false)` when no such element exists.
    async fn click(&self, selector: &str) -> Result<bool, PageError>;

    /// Capture the current rendered DOM as an HTML string.
    async fn content(&self) -> Result<String, PageError>;
}
