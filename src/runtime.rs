//! Chromiumoxide-based browser runtime.
//!
//! Provides the production [`PageSession`](crate::browser::PageSession): a
//! locally launched Chromium driving a single page over CDP. Network idleness
//! is tracked from `Network.*` events the same way for every caller.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::IntoEventKind;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestServedFromCache,
    EventRequestWillBeSent, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, NavigateParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::{Page as ChromiumPage, ScreenshotParams};
use chromiumoxide::{Browser, BrowserConfig};
use futures_util::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior, Sleep};

use crate::browser::{CaptureMode, ElementProbe, LaunchOptions, PageSession, SessionError};
use crate::dom_scripts::{
    self, BODY_TEXT_EXPRESSION, FILL_INVALID, FILL_MISSING, FILL_NOT_TEXT, FILL_OK,
    READY_STATE_EXPRESSION,
};

const QUIET_WINDOW: Duration = Duration::from_millis(500);
const STALL_THRESHOLD: Duration = Duration::from_secs(2);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A launched browser with exactly one page.
pub struct ChromiumoxideRuntime {
    state: Mutex<Option<RuntimeState>>,
}

struct RuntimeState {
    browser: Browser,
    handler: JoinHandle<()>,
    page: ChromiumPage,
}

impl ChromiumoxideRuntime {
    /// Launch a local browser and open a blank page.
    pub async fn launch(options: &LaunchOptions) -> Result<Self, SessionError> {
        let config = build_config(options)?;

        if let Some(dir) = &options.user_data_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|err| SessionError::Message(err.to_string()))?;
        }

        let (mut browser, handler) = Browser::launch(config)
            .await
            .map_err(map_chromiumoxide_error)?;
        let handler = spawn_handler(handler);

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser.close().await;
                handler.abort();
                return Err(map_chromiumoxide_error(err));
            }
        };

        if let Err(err) = page.execute(network::EnableParams::default()).await {
            log::debug!("failed to enable Network domain: {err}");
        }
        apply_emulation(&page, options).await;

        Ok(Self {
            state: Mutex::new(Some(RuntimeState {
                browser,
                handler,
                page,
            })),
        })
    }

    async fn page(&self) -> Result<ChromiumPage, SessionError> {
        let guard = self.state.lock().await;
        guard
            .as_ref()
            .map(|state| state.page.clone())
            .ok_or(SessionError::NotInitialized)
    }

    async fn evaluate<T: DeserializeOwned>(&self, expression: &str) -> Result<T, SessionError> {
        let page = self.page().await?;
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(SessionError::Message)?;
        let result = page
            .evaluate_expression(params)
            .await
            .map_err(map_chromiumoxide_error)?;
        let value = result.value().cloned().unwrap_or(JsonValue::Null);
        serde_json::from_value(value).map_err(|err| SessionError::Message(err.to_string()))
    }

    /// Polls `document.readyState`. Evaluation errors while a redirect swaps
    /// the execution context count as not ready; the caller bounds the wait.
    async fn wait_for_ready_state(&self) -> Result<(), SessionError> {
        loop {
            match self.evaluate::<String>(READY_STATE_EXPRESSION).await {
                Ok(state) if is_ready_state(&state) => return Ok(()),
                Ok(_) => {}
                Err(SessionError::NotInitialized) => return Err(SessionError::NotInitialized),
                Err(err) => log::debug!("readyState not available yet: {err}"),
            }
            time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryOutcome {
    invalid: bool,
    count: usize,
    visible: bool,
}

#[async_trait]
impl PageSession for ChromiumoxideRuntime {
    async fn goto(&self, url: &str) -> Result<(), SessionError> {
        let page = self.page().await?;
        let response = page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|err| SessionError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        if let Some(reason) = response.result.error_text.as_ref() {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: reason.clone(),
            });
        }
        self.wait_for_ready_state().await
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), SessionError> {
        let page = self.page().await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listeners = vec![
            spawn_network_listener(
                page.event_listener::<EventRequestWillBeSent>()
                    .await
                    .map_err(map_chromiumoxide_error)?,
                tx.clone(),
                |ev| NetworkEvent::Started {
                    request_id: ev.request_id.as_ref().to_string(),
                    url: ev.request.url.clone(),
                    long_lived: matches!(
                        ev.r#type.as_ref(),
                        Some(ResourceType::WebSocket | ResourceType::EventSource)
                    ),
                },
            ),
            spawn_network_listener(
                page.event_listener::<EventLoadingFinished>()
                    .await
                    .map_err(map_chromiumoxide_error)?,
                tx.clone(),
                |ev| NetworkEvent::Finished(ev.request_id.as_ref().to_string()),
            ),
            spawn_network_listener(
                page.event_listener::<EventLoadingFailed>()
                    .await
                    .map_err(map_chromiumoxide_error)?,
                tx.clone(),
                |ev| NetworkEvent::Finished(ev.request_id.as_ref().to_string()),
            ),
            spawn_network_listener(
                page.event_listener::<EventRequestServedFromCache>()
                    .await
                    .map_err(map_chromiumoxide_error)?,
                tx.clone(),
                |ev| NetworkEvent::Finished(ev.request_id.as_ref().to_string()),
            ),
        ];
        drop(tx);

        let mut tracker = InflightTracker::default();
        let mut quiet_timer: Option<Pin<Box<Sleep>>> = Some(Box::pin(time::sleep(QUIET_WINDOW)));
        let mut stall_tick = time::interval(QUIET_WINDOW);
        stall_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = time::sleep(timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            tracker.apply(event, Instant::now());
                            reset_quiet_timer(&mut quiet_timer, tracker.is_idle());
                        }
                        None => break Ok(()),
                    }
                }
                _ = async {
                    if let Some(timer) = quiet_timer.as_mut() {
                        timer.as_mut().await;
                    }
                }, if quiet_timer.is_some() => {
                    break Ok(());
                }
                _ = stall_tick.tick() => {
                    for url in tracker.sweep_stalled(Instant::now(), STALL_THRESHOLD) {
                        log::debug!("forcing completion of stalled request {url}");
                    }
                    reset_quiet_timer(&mut quiet_timer, tracker.is_idle());
                }
                _ = &mut deadline => {
                    break Err(SessionError::Message(format!(
                        "network still busy after {}ms ({} requests in flight)",
                        timeout.as_millis(),
                        tracker.len()
                    )));
                }
            }
        };

        for handle in listeners {
            handle.abort();
        }

        outcome
    }

    async fn query(&self, locator: &str) -> Result<ElementProbe, SessionError> {
        let outcome: QueryOutcome = self
            .evaluate(&dom_scripts::query_element_expression(locator))
            .await?;
        if outcome.invalid {
            return Err(SessionError::InvalidLocator(locator.to_string()));
        }
        Ok(ElementProbe {
            count: outcome.count,
            visible: outcome.visible,
        })
    }

    async fn fill(&self, locator: &str, value: &str) -> Result<(), SessionError> {
        let status: String = self
            .evaluate(&dom_scripts::fill_field_expression(locator, value))
            .await?;
        match status.as_str() {
            FILL_OK => Ok(()),
            FILL_MISSING => Err(SessionError::ElementNotFound(locator.to_string())),
            FILL_INVALID => Err(SessionError::InvalidLocator(locator.to_string())),
            FILL_NOT_TEXT => Err(SessionError::Message(format!(
                "`{locator}` is not a text input"
            ))),
            other => Err(SessionError::Message(format!(
                "unexpected fill status `{other}` for `{locator}`"
            ))),
        }
    }

    async fn body_text(&self) -> Result<String, SessionError> {
        let text: Option<String> = self.evaluate(BODY_TEXT_EXPRESSION).await?;
        Ok(text.unwrap_or_default())
    }

    async fn has_login_form(&self) -> Result<bool, SessionError> {
        self.evaluate(&dom_scripts::login_form_expression()).await
    }

    async fn suppress_motion(&self) -> Result<(), SessionError> {
        let _: JsonValue = self
            .evaluate(&dom_scripts::suppress_motion_expression())
            .await?;
        Ok(())
    }

    async fn screenshot(&self, mode: CaptureMode) -> Result<Vec<u8>, SessionError> {
        let page = self.page().await?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(matches!(mode, CaptureMode::FullPage))
            .omit_background(false)
            .build();
        page.screenshot(params)
            .await
            .map_err(map_chromiumoxide_error)
    }

    async fn close(&self) -> Result<(), SessionError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        if let Some(mut state) = state {
            let closed = state.browser.close().await.map(|_| ());
            let _ = state.browser.wait().await;
            state.handler.abort();
            closed.map_err(map_chromiumoxide_error)?;
        }

        Ok(())
    }
}

enum NetworkEvent {
    Started {
        request_id: String,
        url: String,
        long_lived: bool,
    },
    Finished(String),
}

/// Requests currently in flight, keyed by CDP request id.
#[derive(Debug, Default)]
struct InflightTracker {
    inflight: HashSet<String>,
    started: HashMap<String, (String, Instant)>,
}

impl InflightTracker {
    fn apply(&mut self, event: NetworkEvent, now: Instant) {
        match event {
            NetworkEvent::Started {
                request_id,
                url,
                long_lived,
            } => {
                if long_lived {
                    return;
                }
                self.inflight.insert(request_id.clone());
                self.started.insert(request_id, (url, now));
            }
            NetworkEvent::Finished(request_id) => {
                self.inflight.remove(&request_id);
                self.started.remove(&request_id);
            }
        }
    }

    /// Drop requests older than `threshold`, returning their URLs.
    fn sweep_stalled(&mut self, now: Instant, threshold: Duration) -> Vec<String> {
        let stalled: Vec<String> = self
            .started
            .iter()
            .filter(|(_, (_, started_at))| now.duration_since(*started_at) > threshold)
            .map(|(request_id, _)| request_id.clone())
            .collect();

        stalled
            .into_iter()
            .filter_map(|request_id| {
                self.inflight.remove(&request_id);
                self.started.remove(&request_id).map(|(url, _)| url)
            })
            .collect()
    }

    fn is_idle(&self) -> bool {
        self.inflight.is_empty()
    }

    fn len(&self) -> usize {
        self.inflight.len()
    }
}

fn reset_quiet_timer(timer: &mut Option<Pin<Box<Sleep>>>, idle: bool) {
    if !idle {
        timer.take();
    } else if timer.is_none() {
        timer.replace(Box::pin(time::sleep(QUIET_WINDOW)));
    }
}

fn spawn_network_listener<T, F>(
    mut stream: EventStream<T>,
    tx: mpsc::UnboundedSender<NetworkEvent>,
    map: F,
) -> JoinHandle<()>
where
    T: IntoEventKind + Clone + Unpin + Send + 'static,
    F: Fn(&T) -> NetworkEvent + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            if tx.send(map(&*event)).is_err() {
                break;
            }
        }
    })
}

fn build_config(launch: &LaunchOptions) -> Result<BrowserConfig, SessionError> {
    let viewport = chromiumoxide::handler::viewport::Viewport {
        width: launch.viewport.width,
        height: launch.viewport.height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: launch.viewport.width >= launch.viewport.height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder();

    if let Some(path) = &launch.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder
        .viewport(viewport)
        .args(launch.args.clone());

    let builder = if launch.headless {
        builder
    } else {
        builder.with_head()
    };

    let builder = if !launch.ignore_https_errors {
        builder.respect_https_errors()
    } else {
        builder
    };

    let builder = match &launch.user_data_dir {
        Some(dir) => builder.user_data_dir(dir),
        None => builder,
    };

    let builder = if !launch.locale.is_empty() {
        builder.arg(format!("--lang={}", launch.locale))
    } else {
        builder
    };

    builder.build().map_err(SessionError::Message)
}

fn is_ready_state(state: &str) -> bool {
    matches!(state, "interactive" | "complete")
}

/// Locale and timezone overrides for the page; blank options are left to the browser.
fn emulation_overrides(
    launch: &LaunchOptions,
) -> (Option<SetLocaleOverrideParams>, Option<SetTimezoneOverrideParams>) {
    let locale = (!launch.locale.is_empty())
        .then(|| SetLocaleOverrideParams::builder().locale(&launch.locale).build());
    let timezone = (!launch.timezone_id.is_empty())
        .then(|| SetTimezoneOverrideParams::new(&launch.timezone_id));
    (locale, timezone)
}

async fn apply_emulation(page: &ChromiumPage, launch: &LaunchOptions) {
    let (locale, timezone) = emulation_overrides(launch);
    if let Some(params) = locale {
        if let Err(err) = page.execute(params).await {
            log::debug!("failed to override locale {}: {err}", launch.locale);
        }
    }
    if let Some(params) = timezone {
        if let Err(err) = page.execute(params).await {
            log::debug!("failed to override timezone {}: {err}", launch.timezone_id);
        }
    }
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> SessionError {
    SessionError::Message(err.to_string())
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                log::debug!("chromiumoxide handler error: {err}");
            }
        }
    })
}
