//! Shared state threaded through every probe component.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::browser::SessionError;
use crate::config::{ProbeConfig, Timings};
use crate::logging::ProbeLogger;

/// Why a bounded page call produced no answer.
#[derive(Debug, Error)]
pub enum PageCallError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("page did not answer within {0}ms")]
    Timeout(u64),
    #[error("probe cancelled")]
    Cancelled,
}

/// Logger, contest label, timings and cancellation signal for one probe run.
#[derive(Clone)]
pub struct ProbeContext {
    logger: Arc<ProbeLogger>,
    contest: Arc<str>,
    timings: Timings,
    cancel: CancellationToken,
}

impl ProbeContext {
    pub fn new(logger: Arc<ProbeLogger>, contest: impl Into<String>, timings: Timings) -> Self {
        Self {
            logger,
            contest: Arc::from(contest.into()),
            timings,
            cancel: CancellationToken::new(),
        }
    }

    /// Context built from a configuration, using a console logger at its verbosity.
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(
            Arc::new(ProbeLogger::new(config.verbose)),
            config.contest.clone(),
            config.timings.clone(),
        )
    }

    /// Replace the cancellation token, e.g. with a child of a caller-owned one.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn contest(&self) -> &str {
        &self.contest
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn logger(&self) -> &Arc<ProbeLogger> {
        &self.logger
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a session call under the DOM timeout, giving up as soon as the
    /// probe is cancelled.
    pub async fn bounded<T, F>(&self, call: F) -> Result<T, PageCallError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PageCallError::Cancelled),
            result = time::timeout(self.timings.dom_timeout(), call) => match result {
                Ok(answer) => answer.map_err(PageCallError::from),
                Err(_) => Err(PageCallError::Timeout(self.timings.dom_timeout_ms)),
            },
        }
    }

    pub fn error(&self, message: impl Into<String>, auxiliary: Option<Value>) {
        self.logger.error(&self.contest, message, auxiliary);
    }

    pub fn warn(&self, message: impl Into<String>, auxiliary: Option<Value>) {
        self.logger.warn(&self.contest, message, auxiliary);
    }

    pub fn info(&self, message: impl Into<String>, auxiliary: Option<Value>) {
        self.logger.info(&self.contest, message, auxiliary);
    }

    pub fn debug(&self, message: impl Into<String>, auxiliary: Option<Value>) {
        self.logger.debug(&self.contest, message, auxiliary);
    }
}

impl fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeContext")
            .field("contest", &self.contest)
            .field("timings", &self.timings)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
