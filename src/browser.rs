//! Browser session primitives for the probe.
//!
//! This module turns the probe configuration into strongly-typed launch options
//! and defines the [`PageSession`] seam every probe component talks to. The
//! production implementation lives in [`crate::runtime`]; tests drive the same
//! trait with in-memory sessions.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProbeConfig;

/// Error surfaced by a page session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser session error: {0}")]
    Message(String),
    #[error("browser session not initialized")]
    NotInitialized,
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("invalid locator `{0}`")]
    InvalidLocator(String),
    #[error("no element matches `{0}`")]
    ElementNotFound(String),
    #[error("browser session feature unsupported: {0}")]
    Unsupported(String),
}

/// Point-in-time view of the elements matched by a locator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementProbe {
    /// Number of elements matched by the locator.
    pub count: usize,
    /// Whether the first match is rendered with a non-empty box.
    pub visible: bool,
}

impl ElementProbe {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn is_present(&self) -> bool {
        self.count > 0
    }
}

/// Area covered by a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    FullPage,
    Viewport,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::FullPage => f.write_str("full-page"),
            CaptureMode::Viewport => f.write_str("viewport"),
        }
    }
}

/// Viewport dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1280,
            height: 800,
        }
    }
}

/// Local browser launch options derived from the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    pub headless: bool,
    pub args: Vec<String>,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone_id: String,
    #[serde(rename = "ignoreHTTPSErrors")]
    pub ignore_https_errors: bool,
    pub chrome_executable: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            args: vec!["--disable-blink-features=AutomationControlled".to_string()],
            viewport: Viewport::default(),
            locale: "fr-FR".to_string(),
            timezone_id: "Europe/Paris".to_string(),
            ignore_https_errors: false,
            chrome_executable: None,
            user_data_dir: None,
        }
    }
}

impl LaunchOptions {
    /// Build launch options from the probe configuration.
    pub fn from_config(config: &ProbeConfig) -> Self {
        let defaults = LaunchOptions::default();
        let args = if config.browser_args.is_empty() {
            defaults.args
        } else {
            config.browser_args.clone()
        };

        LaunchOptions {
            headless: config.headless,
            args,
            viewport: config.viewport.clone(),
            locale: non_empty_or(&config.locale, defaults.locale),
            timezone_id: non_empty_or(&config.timezone_id, defaults.timezone_id),
            ignore_https_errors: config.ignore_https_errors,
            chrome_executable: config.chrome_executable.clone(),
            user_data_dir: config.user_data_dir.clone(),
        }
    }
}

fn non_empty_or(value: &str, fallback: String) -> String {
    if value.trim().is_empty() {
        fallback
    } else {
        value.to_string()
    }
}

/// A single rendered page the probe can drive.
///
/// Implementations never submit forms or toggle controls: the only mutating
/// operation is [`PageSession::fill`], which replaces a text value.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigate and resolve once the document reached the content-loaded milestone.
    async fn goto(&self, url: &str) -> Result<(), SessionError>;

    /// Wait until no network request has been in flight for a short quiet window.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), SessionError> {
        let _ = timeout;
        Err(SessionError::Unsupported(
            "network idle tracking not supported".to_string(),
        ))
    }

    /// Count and visibility of the elements matched by a CSS locator.
    async fn query(&self, locator: &str) -> Result<ElementProbe, SessionError>;

    /// Replace the value of the first element matched by `locator`.
    async fn fill(&self, locator: &str, value: &str) -> Result<(), SessionError>;

    /// Rendered text of the document body (empty when there is no body).
    async fn body_text(&self) -> Result<String, SessionError>;

    /// Whether the document contains a form that looks like a login form.
    async fn has_login_form(&self) -> Result<bool, SessionError> {
        Ok(false)
    }

    /// Disable CSS animations, transitions and caret blinking.
    async fn suppress_motion(&self) -> Result<(), SessionError> {
        Err(SessionError::Unsupported(
            "motion suppression not supported".to_string(),
        ))
    }

    /// Capture a PNG screenshot of the page.
    async fn screenshot(&self, mode: CaptureMode) -> Result<Vec<u8>, SessionError>;

    /// Release the underlying browser resources.
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

#[async_trait]
impl<S> PageSession for Arc<S>
where
    S: PageSession + ?Sized,
{
    async fn goto(&self, url: &str) -> Result<(), SessionError> {
        (**self).goto(url).await
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), SessionError> {
        (**self).wait_for_network_idle(timeout).await
    }

    async fn query(&self, locator: &str) -> Result<ElementProbe, SessionError> {
        (**self).query(locator).await
    }

    async fn fill(&self, locator: &str, value: &str) -> Result<(), SessionError> {
        (**self).fill(locator, value).await
    }

    async fn body_text(&self) -> Result<String, SessionError> {
        (**self).body_text().await
    }

    async fn has_login_form(&self) -> Result<bool, SessionError> {
        (**self).has_login_form().await
    }

    async fn suppress_motion(&self) -> Result<(), SessionError> {
        (**self).suppress_motion().await
    }

    async fn screenshot(&self, mode: CaptureMode) -> Result<Vec<u8>, SessionError> {
        (**self).screenshot(mode).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        (**self).close().await
    }
}
