//! Core data structures shared by the probe components.
//!
//! These strongly-typed models cover the form description handed to the probe
//! (selectors and profile) and everything the probe reports back.

pub mod form;
pub mod page;

pub use form::{Field, Profile, SelectorSpec};
pub use page::{
    Artifact, ErrorKind, FieldDiagnostics, FillOutcome, GateSignal, NAV_FAILED_LABEL, PageState,
    PrefillReport, ProbeResult,
};
