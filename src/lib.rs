//! Resilient page-state probe for contest-entry forms.
//!
//! A probe loads a page with bounded retries, classifies it as
//! `FORM_VISIBLE`, `GATED_LOGIN` or `MISSING`, captures a best-effort
//! snapshot, and, when the form is exposed, fills the text fields from a
//! profile without ever ticking the consent box or submitting.

pub mod browser;
pub mod classifier;
pub mod config;
pub mod context;
pub mod dom_scripts;
pub mod locator;
pub mod logging;
pub mod navigator;
pub mod prefill;
pub mod probe;
pub mod report;
pub mod runtime;
pub mod snapshot;
pub mod types;

#[cfg(test)]
mod testing;

pub use browser::{CaptureMode, LaunchOptions, PageSession, SessionError};
pub use config::{ConfigError, ProbeConfig};
pub use probe::{Probe, ProbeError, ProbeRequest};
pub use runtime::ChromiumoxideRuntime;
pub use types::{PageState, ProbeResult};
