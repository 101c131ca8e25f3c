use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::form::Field;
use crate::browser::CaptureMode;

/// Visibility of each declared field, keyed by field name.
pub type FieldDiagnostics = BTreeMap<Field, bool>;

/// Classification of a probed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageState {
    FormVisible,
    GatedLogin,
    Missing,
}

impl PageState {
    pub fn label(self) -> &'static str {
        match self {
            PageState::FormVisible => "FORM_VISIBLE",
            PageState::GatedLogin => "GATED_LOGIN",
            PageState::Missing => "MISSING",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label used for the forensic snapshot taken when navigation never succeeded.
pub const NAV_FAILED_LABEL: &str = "NAV_FAILED";

/// Which gate signal made a page classify as [`PageState::GatedLogin`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GateSignal {
    /// A configured phrase was found in the body text.
    Phrase(String),
    /// A form whose action, id or name references a login.
    LoginForm,
}

impl fmt::Display for GateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateSignal::Phrase(phrase) => write!(f, "phrase \"{phrase}\""),
            GateSignal::LoginForm => f.write_str("login form"),
        }
    }
}

/// Handle to a captured snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub label: String,
    pub mode: CaptureMode,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Result of a single prefill attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum FillOutcome {
    Filled,
    /// Field absent, invisible or without a locator.
    Skipped,
    Failed(String),
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled)
    }
}

/// Per-field outcome of the prefill step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefillReport {
    pub fields: BTreeMap<Field, FillOutcome>,
    /// The consent control is visible and was left untouched; someone has to
    /// decide on it outside the probe.
    pub consent_required: bool,
    /// A consent control is declared but the profile does not accept terms.
    pub terms_declined: bool,
}

impl PrefillReport {
    pub fn filled(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields
            .iter()
            .filter(|(_, outcome)| outcome.is_filled())
            .map(|(field, _)| *field)
    }

    pub fn failures(&self) -> impl Iterator<Item = (Field, &str)> + '_ {
        self.fields.iter().filter_map(|(field, outcome)| match outcome {
            FillOutcome::Failed(reason) => Some((*field, reason.as_str())),
            _ => None,
        })
    }
}

/// Serializable kind of the error that ended a probe early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Navigation,
    Cancelled,
}

/// Final, immutable outcome of a probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Absent when navigation never reached the content-loaded milestone.
    pub state: Option<PageState>,
    pub diagnostics: FieldDiagnostics,
    pub artifacts: Vec<Artifact>,
    pub navigation_ok: bool,
    pub navigation_attempts: usize,
    /// Reason the last navigation attempt failed, if any did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateSignal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefill: Option<PrefillReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl ProbeResult {
    /// Whether the caller should report success: the page either exposes the
    /// form or sits behind a login wall.
    pub fn is_success(&self) -> bool {
        self.navigation_ok
            && matches!(
                self.state,
                Some(PageState::FormVisible | PageState::GatedLogin)
            )
    }

    /// Stable label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self.state {
            Some(state) => state.label(),
            None => NAV_FAILED_LABEL,
        }
    }

    pub fn consent_required(&self) -> bool {
        self.prefill
            .as_ref()
            .map(|report| report.consent_required)
            .unwrap_or(false)
    }
}
