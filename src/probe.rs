//! Probe orchestration.
//!
//! One run walks `NAVIGATING -> {NAV_FAILED, CLASSIFYING} -> state` exactly
//! once. The session is owned by the run and closed on every exit path.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::browser::PageSession;
use crate::classifier::{Classifier, GateEvidence, GatePatterns, Visibility};
use crate::config::{ConfigError, ProbeConfig};
use crate::context::ProbeContext;
use crate::locator::FieldLocator;
use crate::logging::ProbeLogger;
use crate::navigator::{Navigator, RetryPolicy};
use crate::prefill::PrefillExecutor;
use crate::snapshot::{ArtifactStore, SnapshotCapturer};
use crate::types::{
    ErrorKind, FieldDiagnostics, NAV_FAILED_LABEL, PageState, Profile, ProbeResult, SelectorSpec,
};

/// Run-level failures.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("navigation failed after {attempts} attempt(s): {reason}")]
    Navigation { attempts: usize, reason: String },
    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Config(_) => ErrorKind::Config,
            ProbeError::Navigation { .. } => ErrorKind::Navigation,
            ProbeError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Turn a result whose navigation never succeeded into a [`ProbeError`].
pub fn ensure_navigated(result: &ProbeResult) -> Result<(), ProbeError> {
    if result.navigation_ok {
        return Ok(());
    }
    Err(ProbeError::Navigation {
        attempts: result.navigation_attempts,
        reason: result
            .navigation_error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
    })
}

/// What to probe and with which identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub url: String,
    pub selectors: SelectorSpec,
    pub profile: Profile,
    pub policy: RetryPolicy,
}

impl ProbeRequest {
    pub fn new(url: impl Into<String>, selectors: SelectorSpec, profile: Profile) -> Self {
        Self {
            url: url.into(),
            selectors,
            profile,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn from_config(config: &ProbeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let url = config.url.clone().ok_or(ConfigError::MissingUrl)?;
        Ok(Self {
            url,
            selectors: config.selectors.clone(),
            profile: config.profile.clone(),
            policy: config.retry_policy.clone(),
        })
    }
}

/// Sequences navigation, classification, capture and prefill.
#[derive(Debug)]
pub struct Probe {
    ctx: ProbeContext,
    classifier: Classifier,
    store: ArtifactStore,
}

impl Probe {
    pub fn new(ctx: ProbeContext, classifier: Classifier, store: ArtifactStore) -> Self {
        Self {
            ctx,
            classifier,
            store,
        }
    }

    pub fn from_config(config: &ProbeConfig, logger: Arc<ProbeLogger>) -> Self {
        let ctx = ProbeContext::new(logger, config.contest.clone(), config.timings.clone());
        let patterns = GatePatterns::new(config.gate_patterns.iter().cloned());
        Self::new(
            ctx,
            Classifier::new(patterns),
            ArtifactStore::new(config.artifact_dir.clone()),
        )
    }

    pub fn context(&self) -> &ProbeContext {
        &self.ctx
    }

    /// Run one probe. Navigation failure is reported through the result, not
    /// as an error; only configuration problems and cancellation return `Err`.
    pub async fn run<S>(&self, session: S, request: &ProbeRequest) -> Result<ProbeResult, ProbeError>
    where
        S: PageSession,
    {
        let outcome = self.run_with(&session, request).await;
        if let Err(err) = session.close().await {
            self.ctx
                .warn(format!("failed to release browser session: {err}"), None);
        }
        if let Err(err) = &outcome {
            self.ctx.error(format!("probe aborted: {err}"), None);
        }
        outcome
    }

    async fn run_with<S>(&self, session: &S, request: &ProbeRequest) -> Result<ProbeResult, ProbeError>
    where
        S: PageSession + ?Sized,
    {
        let ctx = &self.ctx;
        let capturer = SnapshotCapturer::new(ctx, &self.store);

        let navigation = Navigator::new(ctx, &request.policy)
            .navigate(session, &request.url)
            .await?;

        if navigation.cancelled {
            return Err(ProbeError::Cancelled);
        }

        if !navigation.ok {
            let reason = navigation
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            ctx.error(
                format!(
                    "navigation failed after {} attempt(s): {reason}",
                    navigation.attempts
                ),
                Some(json!({ "url": request.url })),
            );
            let artifact = capturer.capture(session, NAV_FAILED_LABEL).await;
            return Ok(ProbeResult {
                state: None,
                diagnostics: FieldDiagnostics::new(),
                artifacts: artifact.into_iter().collect(),
                navigation_ok: false,
                navigation_attempts: navigation.attempts,
                navigation_error: navigation.last_error,
                gate: None,
                prefill: None,
                error: Some(ErrorKind::Navigation),
            });
        }

        let fields = FieldLocator::new(session, ctx)
            .resolve_all(&request.selectors)
            .await;
        if ctx.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        let visibility = Visibility::from(&fields);
        let evidence = if visibility.form_visible() {
            GateEvidence::default()
        } else {
            GateEvidence::gather(session, ctx).await
        };
        let classification = self.classifier.classify(visibility, &evidence);
        let state = classification.state;
        let diagnostics = fields.diagnostics();
        ctx.debug(
            format!("classified page as {state}"),
            Some(json!({ "diagnostics": diagnostics })),
        );

        let artifact = capturer.capture(session, state.label()).await;
        let artifact_ref = artifact
            .as_ref()
            .map(|artifact| artifact.path.display().to_string())
            .unwrap_or_else(|| "none".to_string());

        if ctx.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let prefill = match state {
            PageState::FormVisible => {
                let report = PrefillExecutor::new(session, ctx)
                    .prefill(&fields, &request.selectors, &request.profile)
                    .await;
                ctx.info(
                    format!("prefill done, screenshot: {artifact_ref}"),
                    Some(json!({
                        "filled": report.filled().map(|field| field.as_str()).collect::<Vec<_>>(),
                        "consent_required": report.consent_required,
                    })),
                );
                Some(report)
            }
            PageState::GatedLogin => {
                let signal = classification
                    .gate
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                ctx.info(
                    format!("GATED_LOGIN detected ({signal}), screenshot: {artifact_ref}"),
                    None,
                );
                None
            }
            PageState::Missing => {
                ctx.warn(format!("form MISSING, screenshot: {artifact_ref}"), None);
                None
            }
        };
        if ctx.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        Ok(ProbeResult {
            state: Some(state),
            diagnostics,
            artifacts: artifact.into_iter().collect(),
            navigation_ok: true,
            navigation_attempts: navigation.attempts,
            navigation_error: navigation.last_error,
            gate: classification.gate,
            prefill,
            error: None,
        })
    }
}
