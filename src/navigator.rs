//! Navigation with bounded retries.
//!
//! A [`RetryPolicy`] is an ordered list of delays; its length is the number of
//! attempts and the delay at index `i` is slept before attempt `i`. Each
//! attempt is bounded by the navigation timeout and, once the document is
//! interactive, followed by a best-effort network-idle wait and a short settle
//! delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{self, Instant};

use crate::browser::PageSession;
use crate::config::ConfigError;
use crate::context::ProbeContext;

/// Delays applied before each navigation attempt. The first delay is always zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Result<Self, ConfigError> {
        match delays.first() {
            None => Err(ConfigError::InvalidRetryPolicy(
                "at least one attempt is required".to_string(),
            )),
            Some(first) if !first.is_zero() => Err(ConfigError::InvalidRetryPolicy(format!(
                "first delay must be zero, got {}ms",
                first.as_millis()
            ))),
            Some(_) => Ok(Self { delays }),
        }
    }

    pub fn from_millis(delays: &[u64]) -> Result<Self, ConfigError> {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// A single attempt with no delay.
    pub fn once() -> Self {
        Self {
            delays: vec![Duration::ZERO],
        }
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        }
    }
}

impl TryFrom<Vec<u64>> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(value: Vec<u64>) -> Result<Self, Self::Error> {
        Self::from_millis(&value)
    }
}

impl From<RetryPolicy> for Vec<u64> {
    fn from(policy: RetryPolicy) -> Self {
        policy
            .delays
            .iter()
            .map(|delay| delay.as_millis() as u64)
            .collect()
    }
}

/// What happened while trying to load the target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationOutcome {
    /// An attempt reached the content-loaded milestone.
    pub ok: bool,
    pub attempts: usize,
    pub last_error: Option<String>,
    pub cancelled: bool,
}

impl NavigationOutcome {
    fn cancelled(attempts: usize, last_error: Option<String>) -> Self {
        Self {
            ok: false,
            attempts,
            last_error,
            cancelled: true,
        }
    }
}

/// Loads a URL into a page session according to a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Navigator<'a> {
    ctx: &'a ProbeContext,
    policy: &'a RetryPolicy,
}

impl<'a> Navigator<'a> {
    pub fn new(ctx: &'a ProbeContext, policy: &'a RetryPolicy) -> Self {
        Self { ctx, policy }
    }

    pub async fn navigate<S>(&self, session: &S, url: &str) -> Result<NavigationOutcome, ConfigError>
    where
        S: PageSession + ?Sized,
    {
        let url = url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }

        let timings = self.ctx.timings();
        let cancel = self.ctx.cancellation();
        let total = self.policy.attempts();
        let mut last_error = None;
        let started = Instant::now();

        for (index, delay) in self.policy.delays().iter().enumerate() {
            let attempt = index + 1;

            if !delay.is_zero() {
                self.ctx.debug(
                    format!("waiting {}ms before attempt {attempt}/{total}", delay.as_millis()),
                    None,
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Ok(NavigationOutcome::cancelled(index, last_error));
                    }
                    _ = time::sleep(*delay) => {}
                }
            }

            self.ctx.debug(
                format!("navigating to {url} (attempt {attempt}/{total})"),
                None,
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(NavigationOutcome::cancelled(attempt, last_error));
                }
                result = time::timeout(timings.navigation_timeout(), session.goto(url)) => result,
            };

            let reason = match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(_) => Some(format!(
                    "timed out after {}ms",
                    timings.navigation_timeout_ms
                )),
            };

            if let Some(reason) = reason {
                self.ctx.warn(
                    format!("navigation attempt {attempt}/{total} failed: {reason}"),
                    Some(json!({ "attempt": attempt, "url": url })),
                );
                last_error = Some(reason);
                continue;
            }

            if !self.settle(session).await {
                return Ok(NavigationOutcome::cancelled(attempt, last_error));
            }

            self.ctx.debug(
                format!(
                    "page loaded after {attempt} attempt(s) in {}ms",
                    started.elapsed().as_millis()
                ),
                None,
            );
            return Ok(NavigationOutcome {
                ok: true,
                attempts: attempt,
                last_error,
                cancelled: false,
            });
        }

        Ok(NavigationOutcome {
            ok: false,
            attempts: total,
            last_error,
            cancelled: false,
        })
    }

    /// Best-effort network idle then the settle delay. Returns `false` when cancelled.
    async fn settle<S>(&self, session: &S) -> bool
    where
        S: PageSession + ?Sized,
    {
        let timings = self.ctx.timings();
        let cancel = self.ctx.cancellation();
        let idle_timeout = timings.network_idle_timeout();

        let idle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            idle = time::timeout(idle_timeout, session.wait_for_network_idle(idle_timeout)) => idle,
        };
        match idle {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.ctx.debug(format!("network idle not reached: {err}"), None),
            Err(_) => self.ctx.debug(
                format!(
                    "network idle not reached within {}ms",
                    timings.network_idle_timeout_ms
                ),
                None,
            ),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = time::sleep(timings.settle_delay()) => true,
        }
    }
}
