//! Non-destructive form prefill.
//!
//! Only the text fields are written. The consent control is never touched and
//! nothing is ever submitted; a visible consent control is reported so someone
//! can act on it outside the probe.

use std::collections::BTreeMap;

use serde_json::json;

use crate::browser::PageSession;
use crate::context::ProbeContext;
use crate::locator::ResolvedFields;
use crate::types::{Field, FillOutcome, PrefillReport, Profile, SelectorSpec};

pub struct PrefillExecutor<'a, S: PageSession + ?Sized> {
    session: &'a S,
    ctx: &'a ProbeContext,
}

impl<'a, S> PrefillExecutor<'a, S>
where
    S: PageSession + ?Sized,
{
    pub fn new(session: &'a S, ctx: &'a ProbeContext) -> Self {
        Self { session, ctx }
    }

    pub async fn prefill(
        &self,
        fields: &ResolvedFields,
        selectors: &SelectorSpec,
        profile: &Profile,
    ) -> PrefillReport {
        let mut outcomes = BTreeMap::new();

        for field in Field::FILLABLE {
            let outcome = match (fields.visible_handle(field), profile.value(field)) {
                _ if self.ctx.is_cancelled() => FillOutcome::Skipped,
                (Some(handle), Some(value)) => {
                    match self.ctx.bounded(self.session.fill(handle.locator(), value)).await {
                        Ok(()) => FillOutcome::Filled,
                        Err(err) => {
                            self.ctx.warn(
                                format!("could not fill {field}: {err}"),
                                Some(json!({ "locator": handle.locator() })),
                            );
                            FillOutcome::Failed(err.to_string())
                        }
                    }
                }
                _ => FillOutcome::Skipped,
            };
            outcomes.insert(field, outcome);
        }

        let consent_required = fields.is_visible(Field::Terms);
        let terms_declined = selectors.declares(Field::Terms) && !profile.accept_terms;

        if consent_required {
            self.ctx
                .info("consent checkbox visible; left unchecked for manual review", None);
        }
        if terms_declined {
            self.ctx
                .info("profile does not accept the terms; consent stays unchecked", None);
        }

        PrefillReport {
            fields: outcomes,
            consent_required,
            terms_declined,
        }
    }
}
