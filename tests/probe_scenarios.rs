//! End-to-end probe runs against an in-memory page.
//!
//! `FakePage` answers locator queries from a fixed table and records every
//! call, so the scenarios can assert both the outcome and what the probe did
//! (and did not do) to the page.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use formprobe::browser::{CaptureMode, ElementProbe, PageSession, SessionError};
use formprobe::config::{ProbeConfig, Timings, Verbosity};
use formprobe::logging::{LogCallback, ProbeLogRecord, ProbeLogger};
use formprobe::navigator::RetryPolicy;
use formprobe::probe::{Probe, ProbeError, ProbeRequest, ensure_navigated};
use formprobe::types::{ErrorKind, Field, FillOutcome, GateSignal, PageState, Profile, SelectorSpec};

const URL: &str = "https://contest.example/jeu";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Default)]
struct FakePage {
    elements: HashMap<String, ElementProbe>,
    body: String,
    goto_fails: bool,
    full_page_fails: bool,
    calls: Mutex<Vec<String>>,
}

impl FakePage {
    fn with_element(mut self, locator: &str, visible: bool) -> Self {
        self.elements
            .insert(locator.to_string(), ElementProbe { count: 1, visible });
        self
    }

    fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    fn unreachable(mut self) -> Self {
        self.goto_fails = true;
        self
    }

    fn without_full_page(mut self) -> Self {
        self.full_page_fails = true;
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl PageSession for FakePage {
    async fn goto(&self, url: &str) -> Result<(), SessionError> {
        self.record(format!("goto {url}"));
        if self.goto_fails {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), SessionError> {
        Ok(())
    }

    async fn query(&self, locator: &str) -> Result<ElementProbe, SessionError> {
        Ok(self.elements.get(locator).copied().unwrap_or_default())
    }

    async fn fill(&self, locator: &str, value: &str) -> Result<(), SessionError> {
        self.record(format!("fill {locator}={value}"));
        Ok(())
    }

    async fn body_text(&self) -> Result<String, SessionError> {
        Ok(self.body.clone())
    }

    async fn suppress_motion(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn screenshot(&self, mode: CaptureMode) -> Result<Vec<u8>, SessionError> {
        self.record(format!("screenshot {mode}"));
        if mode == CaptureMode::FullPage && self.full_page_fails {
            return Err(SessionError::Message("page too tall".to_string()));
        }
        Ok(PNG.to_vec())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.record("close".to_string());
        Ok(())
    }
}

fn selectors() -> SelectorSpec {
    SelectorSpec {
        lastname: Some("#nom".into()),
        firstname: Some("#prenom".into()),
        email: Some("#email".into()),
        terms: Some("#cgu".into()),
        submit: Some("button[type=submit]".into()),
    }
}

fn profile() -> Profile {
    Profile {
        lastname: "Martin".into(),
        firstname: "Claire".into(),
        email: "claire.martin@example.org".into(),
        accept_terms: true,
    }
}

fn full_form() -> FakePage {
    FakePage::default()
        .with_element("#nom", true)
        .with_element("#prenom", true)
        .with_element("#email", true)
        .with_element("#cgu", true)
        .with_element("button[type=submit]", true)
}

fn fast_config(artifacts: &Path) -> ProbeConfig {
    let mut config = ProbeConfig::default();
    config.url = Some(URL.to_string());
    config.contest = "contest.example / instant_gagnant".to_string();
    config.selectors = selectors();
    config.profile = profile();
    config.artifact_dir = artifacts.to_path_buf();
    config.retry_policy = RetryPolicy::from_millis(&[0, 100]).unwrap();
    config.timings = Timings {
        navigation_timeout_ms: 1_000,
        network_idle_timeout_ms: 200,
        settle_delay_ms: 10,
        capture_timeout_ms: 500,
        capture_settle_ms: 10,
        ladder_retry_delay_ms: 50,
        dom_timeout_ms: 500,
    };
    config
}

fn recording_probe(config: &ProbeConfig) -> (Probe, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let callback: LogCallback = Arc::new(move |record: &ProbeLogRecord| {
        sink.lock().unwrap().push(record.line());
    });
    let mut logger = ProbeLogger::new(Verbosity::Detailed);
    logger.set_external_logger(Some(callback));
    (Probe::from_config(config, Arc::new(logger)), lines)
}

#[tokio::test(start_paused = true)]
async fn visible_form_is_prefilled_but_never_consented() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path());
    let request = ProbeRequest::from_config(&config)?;
    let (probe, lines) = recording_probe(&config);
    let page = Arc::new(full_form());

    let result = probe.run(page.clone(), &request).await?;

    assert_eq!(result.state, Some(PageState::FormVisible));
    assert!(result.is_success());
    assert!(ensure_navigated(&result).is_ok());
    assert_eq!(result.diagnostics.get(&Field::Terms), Some(&true));

    let prefill = result.prefill.as_ref().expect("prefill report");
    assert_eq!(
        prefill.filled().collect::<Vec<_>>(),
        vec![Field::Lastname, Field::Firstname, Field::Email]
    );
    assert!(prefill.consent_required);
    assert!(!prefill.terms_declined);

    let fills = page.calls_starting_with("fill ");
    assert_eq!(fills.len(), 3);
    assert!(fills.iter().all(|call| !call.contains("#cgu")));
    assert!(fills.iter().all(|call| !call.contains("submit")));

    let artifact = &result.artifacts[0];
    assert_eq!(artifact.label, "FORM_VISIBLE");
    assert!(artifact.path.starts_with(dir.path()));
    assert_eq!(std::fs::read(&artifact.path)?, PNG);

    assert_eq!(page.calls().last().map(String::as_str), Some("close"));
    assert!(
        lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains("[contest.example / instant_gagnant] prefill done"))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn login_wall_is_reported_as_gated() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path());
    let request = ProbeRequest::from_config(&config)?;
    let (probe, _lines) = recording_probe(&config);
    let page = Arc::new(FakePage::default().with_body("Pour jouer, IDENTIFIEZ-VOUS ou créez un compte."));

    let result = probe.run(page.clone(), &request).await?;

    assert_eq!(result.state, Some(PageState::GatedLogin));
    assert!(result.is_success());
    assert_eq!(
        result.gate,
        Some(GateSignal::Phrase("Identifiez-vous".to_string()))
    );
    assert!(result.prefill.is_none());
    assert!(page.calls_starting_with("fill ").is_empty());
    assert_eq!(result.artifacts[0].label, "GATED_LOGIN");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn partial_form_is_missing_and_falls_back_to_viewport() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path());
    let request = ProbeRequest::from_config(&config)?;
    let (probe, lines) = recording_probe(&config);
    let page = Arc::new(
        full_form()
            .with_element("button[type=submit]", false)
            .without_full_page(),
    );

    let result = probe.run(page.clone(), &request).await?;

    assert_eq!(result.state, Some(PageState::Missing));
    assert!(!result.is_success());
    assert_eq!(result.diagnostics.get(&Field::Submit), Some(&false));
    assert!(page.calls_starting_with("fill ").is_empty());

    let artifact = &result.artifacts[0];
    assert_eq!(artifact.mode, CaptureMode::Viewport);
    assert_eq!(
        page.calls_starting_with("screenshot "),
        vec!["screenshot full-page", "screenshot viewport"]
    );
    assert!(
        lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains("form MISSING, screenshot:"))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unreachable_page_yields_forensic_snapshot() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path());
    let request = ProbeRequest::from_config(&config)?;
    let (probe, _lines) = recording_probe(&config);
    let page = Arc::new(FakePage::default().unreachable());

    let result = probe.run(page.clone(), &request).await?;

    assert!(!result.navigation_ok);
    assert_eq!(result.state, None);
    assert_eq!(result.navigation_attempts, 2);
    assert_eq!(result.error, Some(ErrorKind::Navigation));
    assert_eq!(result.label(), "NAV_FAILED");
    assert_eq!(result.artifacts[0].label, "NAV_FAILED");
    assert_eq!(page.calls_starting_with("goto ").len(), 2);

    match ensure_navigated(&result) {
        Err(ProbeError::Navigation { attempts, reason }) => {
            assert_eq!(attempts, 2);
            assert!(reason.contains("ERR_CONNECTION_REFUSED"));
        }
        other => panic!("expected navigation error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn cancelled_probe_still_closes_the_session() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = fast_config(dir.path());
    let request = ProbeRequest::from_config(&config)?;
    let (probe, _lines) = recording_probe(&config);
    probe.context().cancellation().cancel();
    let page = Arc::new(full_form());

    let err = probe.run(page.clone(), &request).await.unwrap_err();

    assert!(matches!(err, ProbeError::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(page.calls_starting_with("goto ").is_empty());
    assert_eq!(page.calls(), vec!["close"]);
    Ok(())
}

#[test]
fn yaml_files_build_a_request() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let selectors_path = dir.path().join("selectors.yml");
    let profile_path = dir.path().join("profile.yml");
    std::fs::write(
        &selectors_path,
        r##"
meta:
  site: contest.example
  type: instant_gagnant
form:
  url: https://contest.example/jeu
selectors:
  lastname: "#nom"
  firstname: "#prenom"
  email: "#email"
  terms: "#cgu"
  submit: "button[type=submit]"
"##,
    )?;
    std::fs::write(
        &profile_path,
        r#"
profile:
  lastname: Martin
  firstname: Claire
  email: claire.martin@example.org
  preferences:
    accept_terms: false
"#,
    )?;

    let config = ProbeConfig::from_yaml_files(&selectors_path, Some(&profile_path))?;
    assert_eq!(config.contest, "contest.example / instant_gagnant");

    let request = ProbeRequest::from_config(&config)?;
    assert_eq!(request.url, URL);
    assert_eq!(request.selectors, selectors());
    assert_eq!(request.profile.firstname, "Claire");
    assert!(!request.profile.accept_terms);
    assert_eq!(request.policy, RetryPolicy::default());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn declined_terms_are_flagged_without_touching_the_box() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = fast_config(dir.path());
    config.profile.accept_terms = false;
    let request = ProbeRequest::from_config(&config)?;
    let (probe, _lines) = recording_probe(&config);
    let page = Arc::new(full_form());

    let result = probe.run(page.clone(), &request).await?;

    let prefill = result.prefill.as_ref().expect("prefill report");
    assert!(prefill.terms_declined);
    assert_eq!(prefill.fields.get(&Field::Email), Some(&FillOutcome::Filled));
    assert!(page.calls_starting_with("fill #cgu").is_empty());

    let json = serde_json::to_value(&result)?;
    assert_eq!(json["state"], "FORM_VISIBLE");
    assert_eq!(json["prefill"]["terms_declined"], true);
    Ok(())
}
