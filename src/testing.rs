//! In-memory [`PageSession`] used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{CaptureMode, ElementProbe, PageSession, SessionError};
use crate::config::{Timings, Verbosity};
use crate::context::ProbeContext;
use crate::logging::{LogCallback, ProbeLogRecord, ProbeLogger};

pub(crate) type Records = Arc<Mutex<Vec<ProbeLogRecord>>>;

/// Context at debug verbosity whose records are kept in memory.
pub(crate) fn recording_context(timings: Timings) -> (ProbeContext, Records) {
    let records: Records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let callback: LogCallback = Arc::new(move |record| {
        sink.lock().unwrap().push(record.clone());
    });
    let mut logger = ProbeLogger::new(Verbosity::Detailed);
    logger.set_external_logger(Some(callback));
    let ctx = ProbeContext::new(Arc::new(logger), "test-site / instant_gagnant", timings);
    (ctx, records)
}

pub(crate) fn messages(records: &Records) -> Vec<String> {
    records
        .lock()
        .unwrap()
        .iter()
        .map(|record| record.message.clone())
        .collect()
}

pub(crate) const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShotStep {
    Ok,
    Fail,
    Hang,
}

#[derive(Default)]
struct Script {
    elements: HashMap<String, ElementProbe>,
    invalid: HashSet<String>,
    body_text: String,
    login_form: bool,
    goto_failures: usize,
    goto_hangs: bool,
    idle_fails: bool,
    shots: VecDeque<ShotStep>,
    fill_failures: HashSet<String>,
    hung_queries: HashSet<String>,
    hung_fills: HashSet<String>,
    body_hangs: bool,

    gotos: usize,
    fills: Vec<(String, String)>,
    screenshots: Vec<CaptureMode>,
    closes: usize,
    events: Vec<String>,
}

/// Scripted page: every answer is configured up front and every call recorded.
#[derive(Default)]
pub(crate) struct ScriptedSession {
    script: Mutex<Script>,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn edit(mut self, f: impl FnOnce(&mut Script)) -> Self {
        f(self.script.get_mut().unwrap());
        self
    }

    pub(crate) fn with_element(self, locator: &str, visible: bool) -> Self {
        self.edit(|s| {
            s.elements
                .insert(locator.to_string(), ElementProbe { count: 1, visible });
        })
    }

    pub(crate) fn with_invalid_locator(self, locator: &str) -> Self {
        self.edit(|s| {
            s.invalid.insert(locator.to_string());
        })
    }

    pub(crate) fn with_body_text(self, text: &str) -> Self {
        self.edit(|s| s.body_text = text.to_string())
    }

    pub(crate) fn with_login_form(self) -> Self {
        self.edit(|s| s.login_form = true)
    }

    pub(crate) fn failing_goto(self, times: usize) -> Self {
        self.edit(|s| s.goto_failures = times)
    }

    pub(crate) fn hanging_goto(self) -> Self {
        self.edit(|s| s.goto_hangs = true)
    }

    pub(crate) fn failing_idle(self) -> Self {
        self.edit(|s| s.idle_fails = true)
    }

    pub(crate) fn with_shots(self, steps: &[ShotStep]) -> Self {
        self.edit(|s| s.shots = steps.iter().copied().collect())
    }

    /// `query(locator)` never answers.
    pub(crate) fn hanging_query(self, locator: &str) -> Self {
        self.edit(|s| {
            s.hung_queries.insert(locator.to_string());
        })
    }

    /// `fill(locator, ..)` never answers.
    pub(crate) fn hanging_fill(self, locator: &str) -> Self {
        self.edit(|s| {
            s.hung_fills.insert(locator.to_string());
        })
    }

    /// `body_text` and `has_login_form` never answer.
    pub(crate) fn hanging_body(self) -> Self {
        self.edit(|s| s.body_hangs = true)
    }

    pub(crate) fn failing_fill(self, locator: &str) -> Self {
        self.edit(|s| {
            s.fill_failures.insert(locator.to_string());
        })
    }

    fn record(&self, event: String) {
        self.script.lock().unwrap().events.push(event);
    }

    pub(crate) fn gotos(&self) -> usize {
        self.script.lock().unwrap().gotos
    }

    pub(crate) fn fills(&self) -> Vec<(String, String)> {
        self.script.lock().unwrap().fills.clone()
    }

    pub(crate) fn screenshots(&self) -> Vec<CaptureMode> {
        self.script.lock().unwrap().screenshots.clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.script.lock().unwrap().closes
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.script.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl PageSession for ScriptedSession {
    async fn goto(&self, url: &str) -> Result<(), SessionError> {
        self.record(format!("goto:{url}"));
        let (hangs, fail) = {
            let mut script = self.script.lock().unwrap();
            script.gotos += 1;
            (script.goto_hangs, script.gotos <= script.goto_failures)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), SessionError> {
        self.record("idle".to_string());
        if self.script.lock().unwrap().idle_fails {
            return Err(SessionError::Message("network busy".to_string()));
        }
        Ok(())
    }

    async fn query(&self, locator: &str) -> Result<ElementProbe, SessionError> {
        self.record(format!("query:{locator}"));
        let hangs = self.script.lock().unwrap().hung_queries.contains(locator);
        if hangs {
            std::future::pending::<()>().await;
        }
        let script = self.script.lock().unwrap();
        if script.invalid.contains(locator) {
            return Err(SessionError::InvalidLocator(locator.to_string()));
        }
        Ok(script.elements.get(locator).copied().unwrap_or_default())
    }

    async fn fill(&self, locator: &str, value: &str) -> Result<(), SessionError> {
        self.record(format!("fill:{locator}"));
        let hangs = self.script.lock().unwrap().hung_fills.contains(locator);
        if hangs {
            std::future::pending::<()>().await;
        }
        let mut script = self.script.lock().unwrap();
        if script.fill_failures.contains(locator) {
            return Err(SessionError::Message(format!("{locator} detached")));
        }
        if !script.elements.contains_key(locator) {
            return Err(SessionError::ElementNotFound(locator.to_string()));
        }
        script.fills.push((locator.to_string(), value.to_string()));
        Ok(())
    }

    async fn body_text(&self) -> Result<String, SessionError> {
        self.record("body_text".to_string());
        let (hangs, text) = {
            let script = self.script.lock().unwrap();
            (script.body_hangs, script.body_text.clone())
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(text)
    }

    async fn has_login_form(&self) -> Result<bool, SessionError> {
        let (hangs, login_form) = {
            let script = self.script.lock().unwrap();
            (script.body_hangs, script.login_form)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(login_form)
    }

    async fn suppress_motion(&self) -> Result<(), SessionError> {
        self.record("suppress_motion".to_string());
        Ok(())
    }

    async fn screenshot(&self, mode: CaptureMode) -> Result<Vec<u8>, SessionError> {
        self.record(format!("screenshot:{mode}"));
        let step = {
            let mut script = self.script.lock().unwrap();
            script.screenshots.push(mode);
            script.shots.pop_front().unwrap_or(ShotStep::Ok)
        };
        match step {
            ShotStep::Ok => Ok(PNG_BYTES.to_vec()),
            ShotStep::Fail => Err(SessionError::Message("capture failed".to_string())),
            ShotStep::Hang => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.record("close".to_string());
        self.script.lock().unwrap().closes += 1;
        Ok(())
    }
}
