//! Page-state classification.
//!
//! Classification is pure: it only looks at field visibility and the gate
//! evidence gathered from the page, so the same inputs always yield the same
//! [`PageState`].

use crate::browser::PageSession;
use crate::context::ProbeContext;
use crate::locator::ResolvedFields;
use crate::types::{Field, GateSignal, PageState};

/// Phrases that indicate the form sits behind a login wall, in match order.
pub const DEFAULT_GATE_PATTERNS: [&str; 5] = [
    "Inscrivez-vous",
    "Identifiez-vous",
    "Se connecter",
    "Connexion",
    "Votre compte",
];

/// Ordered, case-insensitive phrase list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePatterns {
    patterns: Vec<(String, String)>,
}

impl GatePatterns {
    pub fn new<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(Into::into)
            .filter(|pattern: &String| !pattern.trim().is_empty())
            .map(|pattern| {
                let folded = pattern.to_lowercase();
                (pattern, folded)
            })
            .collect();
        Self { patterns }
    }

    /// First pattern contained in `text`, ignoring case.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        let folded = text.to_lowercase();
        self.patterns
            .iter()
            .find(|(_, needle)| folded.contains(needle.as_str()))
            .map(|(original, _)| original.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for GatePatterns {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_PATTERNS)
    }
}

/// Page-level signals that a login is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateEvidence {
    pub body_text: String,
    pub login_form: bool,
}

impl GateEvidence {
    /// Read the body text and login-form heuristic. Failures, timeouts and
    /// cancellation all count as no evidence.
    pub async fn gather<S>(session: &S, ctx: &ProbeContext) -> Self
    where
        S: PageSession + ?Sized,
    {
        let body_text = match ctx.bounded(session.body_text()).await {
            Ok(text) => text,
            Err(err) => {
                ctx.debug(format!("body text unavailable: {err}"), None);
                String::new()
            }
        };
        let login_form = match ctx.bounded(session.has_login_form()).await {
            Ok(found) => found,
            Err(err) => {
                ctx.debug(format!("login form check unavailable: {err}"), None);
                false
            }
        };
        Self {
            body_text,
            login_form,
        }
    }
}

/// Visibility of the fields that take part in classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visibility {
    pub lastname: bool,
    pub firstname: bool,
    pub email: bool,
    pub submit: bool,
    pub terms: bool,
}

impl Visibility {
    /// Every required field is visible. Terms never take part.
    pub fn form_visible(&self) -> bool {
        self.lastname && self.firstname && self.email && self.submit
    }
}

impl From<&ResolvedFields> for Visibility {
    fn from(fields: &ResolvedFields) -> Self {
        Self {
            lastname: fields.is_visible(Field::Lastname),
            firstname: fields.is_visible(Field::Firstname),
            email: fields.is_visible(Field::Email),
            submit: fields.is_visible(Field::Submit),
            terms: fields.is_visible(Field::Terms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: PageState,
    /// Set only for [`PageState::GatedLogin`].
    pub gate: Option<GateSignal>,
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    patterns: GatePatterns,
}

impl Classifier {
    pub fn new(patterns: GatePatterns) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &GatePatterns {
        &self.patterns
    }

    pub fn classify(&self, visibility: Visibility, evidence: &GateEvidence) -> Classification {
        if visibility.form_visible() {
            return Classification {
                state: PageState::FormVisible,
                gate: None,
            };
        }

        if let Some(phrase) = self.patterns.first_match(&evidence.body_text) {
            return Classification {
                state: PageState::GatedLogin,
                gate: Some(GateSignal::Phrase(phrase.to_string())),
            };
        }

        if evidence.login_form {
            return Classification {
                state: PageState::GatedLogin,
                gate: Some(GateSignal::LoginForm),
            };
        }

        Classification {
            state: PageState::Missing,
            gate: None,
        }
    }
}
