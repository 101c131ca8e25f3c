//! Best-effort page snapshots.
//!
//! [`SnapshotCapturer::capture`] never fails: it stabilizes the page, walks a
//! fixed ladder of capture attempts (full page, viewport, delayed viewport)
//! and returns `None` once every rung has failed.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde_json::json;
use thiserror::Error;
use tokio::time;

use crate::browser::{CaptureMode, PageSession, SessionError};
use crate::context::ProbeContext;
use crate::types::Artifact;

/// Reasons a single ladder step failed. Never escapes the capturer.
#[derive(Debug, Error)]
enum CaptureError {
    #[error("{mode} capture timed out after {timeout_ms}ms")]
    Timeout { mode: CaptureMode, timeout_ms: u64 },
    #[error("{mode} capture failed: {source}")]
    Session {
        mode: CaptureMode,
        #[source]
        source: SessionError,
    },
    #[error("{mode} capture returned no data")]
    Empty { mode: CaptureMode },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("capture cancelled")]
    Cancelled,
}

/// One rung of the fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LadderStep {
    mode: CaptureMode,
    delay: Duration,
}

fn ladder(retry_delay: Duration) -> [LadderStep; 3] {
    [
        LadderStep {
            mode: CaptureMode::FullPage,
            delay: Duration::ZERO,
        },
        LadderStep {
            mode: CaptureMode::Viewport,
            delay: Duration::ZERO,
        },
        LadderStep {
            mode: CaptureMode::Viewport,
            delay: retry_delay,
        },
    ]
}

/// Directory where snapshots are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `snap_<YYYYmmdd_HHMMSS_mmm>_<LABEL>.png`, sortable by capture time.
    pub fn file_name(label: &str, at: DateTime<Local>) -> String {
        format!(
            "snap_{}_{}.png",
            at.format("%Y%m%d_%H%M%S_%3f"),
            sanitize_label(label)
        )
    }

    /// A path for `label` that does not exist yet.
    pub fn next_path(&self, label: &str) -> PathBuf {
        let name = Self::file_name(label, Local::now());
        let candidate = self.dir.join(&name);
        if !candidate.exists() {
            return candidate;
        }
        let stem = name.trim_end_matches(".png");
        (1..)
            .map(|n| self.dir.join(format!("{stem}-{n}.png")))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), CaptureError> {
        let to_error = |source| CaptureError::Write {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(to_error)?;
        tokio::fs::write(path, bytes).await.map_err(to_error)
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "SNAPSHOT".to_string()
    } else {
        cleaned
    }
}

/// Captures snapshots for one probe run.
pub struct SnapshotCapturer<'a> {
    ctx: &'a ProbeContext,
    store: &'a ArtifactStore,
}

impl<'a> SnapshotCapturer<'a> {
    pub fn new(ctx: &'a ProbeContext, store: &'a ArtifactStore) -> Self {
        Self { ctx, store }
    }

    pub async fn capture<S>(&self, session: &S, label: &str) -> Option<Artifact>
    where
        S: PageSession + ?Sized,
    {
        let path = self.store.next_path(label);

        if self.ctx.is_cancelled() {
            self.ctx.warn(
                format!("snapshot {label} skipped: probe cancelled"),
                Some(json!({ "path": path.display().to_string() })),
            );
            return None;
        }

        self.stabilize(session).await;

        let mut failures = Vec::new();
        for step in ladder(self.ctx.timings().ladder_retry_delay()) {
            match self.attempt(session, step, &path).await {
                Ok(()) => {
                    self.ctx.debug(
                        format!("snapshot {label} captured ({})", step.mode),
                        Some(json!({ "path": path.display().to_string() })),
                    );
                    return Some(Artifact {
                        path,
                        label: label.to_string(),
                        mode: step.mode,
                    });
                }
                Err(CaptureError::Cancelled) => {
                    failures.push(CaptureError::Cancelled.to_string());
                    break;
                }
                Err(err) => {
                    self.ctx.debug(format!("snapshot {label}: {err}"), None);
                    failures.push(err.to_string());
                }
            }
        }

        self.ctx.warn(
            format!(
                "snapshot {label} unavailable; attempted {}",
                path.display()
            ),
            Some(json!({ "failures": failures })),
        );
        None
    }

    async fn stabilize<S>(&self, session: &S)
    where
        S: PageSession + ?Sized,
    {
        let timings = self.ctx.timings();
        let cancel = self.ctx.cancellation();

        match time::timeout(timings.capture_timeout(), session.suppress_motion()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.ctx.debug(format!("motion not suppressed: {err}"), None),
            Err(_) => self.ctx.debug("motion suppression timed out", None),
        }

        let idle_timeout = timings.network_idle_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            idle = time::timeout(idle_timeout, session.wait_for_network_idle(idle_timeout)) => {
                if !matches!(idle, Ok(Ok(()))) {
                    self.ctx.debug("network not idle before capture", None);
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = time::sleep(timings.capture_settle()) => {}
        }
    }

    async fn attempt<S>(&self, session: &S, step: LadderStep, path: &Path) -> Result<(), CaptureError>
    where
        S: PageSession + ?Sized,
    {
        let timings = self.ctx.timings();
        let cancel = self.ctx.cancellation();

        if !step.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
                _ = time::sleep(step.delay) => {}
            }
        }

        let shot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            shot = time::timeout(timings.capture_timeout(), session.screenshot(step.mode)) => shot,
        };

        let bytes = match shot {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(source)) => {
                return Err(CaptureError::Session {
                    mode: step.mode,
                    source,
                });
            }
            Err(_) => {
                return Err(CaptureError::Timeout {
                    mode: step.mode,
                    timeout_ms: timings.capture_timeout_ms,
                });
            }
        };

        if bytes.is_empty() {
            return Err(CaptureError::Empty { mode: step.mode });
        }

        self.store.write(path, &bytes).await
    }
}
