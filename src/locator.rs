//! Field resolution tolerant of absent, empty or malformed locators.

use std::collections::BTreeMap;

use crate::browser::PageSession;
use crate::context::ProbeContext;
use crate::types::{Field, FieldDiagnostics, SelectorSpec};

/// A locator that matched at least one element when it was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    locator: String,
    count: usize,
}

impl ElementHandle {
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Resolves locators against a page session. Never returns an error: anything
/// that cannot be resolved is simply absent.
pub struct FieldLocator<'a, S: PageSession + ?Sized> {
    session: &'a S,
    ctx: &'a ProbeContext,
}

impl<'a, S> FieldLocator<'a, S>
where
    S: PageSession + ?Sized,
{
    pub fn new(session: &'a S, ctx: &'a ProbeContext) -> Self {
        Self { session, ctx }
    }

    pub async fn resolve(&self, locator: Option<&str>) -> Option<ElementHandle> {
        let locator = locator.map(str::trim).filter(|value| !value.is_empty())?;
        match self.ctx.bounded(self.session.query(locator)).await {
            Ok(probe) if probe.is_present() => Some(ElementHandle {
                locator: locator.to_string(),
                count: probe.count,
            }),
            Ok(_) => None,
            Err(err) => {
                self.ctx
                    .debug(format!("could not resolve `{locator}`: {err}"), None);
                None
            }
        }
    }

    /// Re-checks the element so visibility reflects the page as it is now.
    pub async fn is_visible(&self, handle: Option<&ElementHandle>) -> bool {
        let Some(handle) = handle else {
            return false;
        };
        match self.ctx.bounded(self.session.query(&handle.locator)).await {
            Ok(probe) => probe.is_present() && probe.visible,
            Err(err) => {
                self.ctx.debug(
                    format!("visibility check failed for `{}`: {err}", handle.locator),
                    None,
                );
                false
            }
        }
    }

    /// Resolve every declared field and record its visibility.
    /// Once the probe is cancelled the remaining fields are left unresolved.
    pub async fn resolve_all(&self, selectors: &SelectorSpec) -> ResolvedFields {
        let mut fields = BTreeMap::new();
        for field in Field::ALL {
            if self.ctx.is_cancelled() {
                fields.insert(
                    field,
                    ResolvedField {
                        handle: None,
                        visible: false,
                    },
                );
                continue;
            }
            let handle = self.resolve(selectors.locator(field)).await;
            let visible = self.is_visible(handle.as_ref()).await;
            fields.insert(field, ResolvedField { handle, visible });
        }
        ResolvedFields { fields }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub handle: Option<ElementHandle>,
    pub visible: bool,
}

/// Resolution result for every field, in [`Field::ALL`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFields {
    fields: BTreeMap<Field, ResolvedField>,
}

impl ResolvedFields {
    pub fn get(&self, field: Field) -> Option<&ResolvedField> {
        self.fields.get(&field)
    }

    pub fn is_visible(&self, field: Field) -> bool {
        self.fields
            .get(&field)
            .map(|resolved| resolved.visible)
            .unwrap_or(false)
    }

    /// Visible handle for `field`, if any.
    pub fn visible_handle(&self, field: Field) -> Option<&ElementHandle> {
        self.fields
            .get(&field)
            .filter(|resolved| resolved.visible)
            .and_then(|resolved| resolved.handle.as_ref())
    }

    pub fn diagnostics(&self) -> FieldDiagnostics {
        self.fields
            .iter()
            .map(|(field, resolved)| (*field, resolved.visible))
            .collect()
    }
}
