//! In-memory collaborators for unit tests.

use crate::auth::{AuthClient, RestoreHook, SessionResponse};
use crate::error::RefreshError;
use crate::page::{AppEvent, FocusedElement, Indicator, Page};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct PageState {
    path: String,
    focused: Option<FocusedElement>,
    scroll_y: f64,
    dialog_open: bool,
    form_in_viewport: bool,
    auth_form_marker: bool,
    body_text: String,
    events: Vec<AppEvent>,
    indicators: Vec<Indicator>,
    reloads: usize,
    main_touches: usize,
    fail_render: bool,
}

#[derive(Default)]
pub(crate) struct FakePage(Mutex<PageState>);

impl FakePage {
    pub(crate) fn at(path: &str) -> Self {
        let page = Self::default();
        page.set_path(path);
        page
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.0.lock().unwrap()
    }

    pub(crate) fn set_path(&self, path: &str) {
        self.state().path = path.to_string();
    }

    pub(crate) fn focus(&self, element: Option<FocusedElement>) {
        self.state().focused = element;
    }

    pub(crate) fn set_scroll(&self, y: f64) {
        self.state().scroll_y = y;
    }

    pub(crate) fn set_dialog_open(&self, open: bool) {
        self.state().dialog_open = open;
    }

    pub(crate) fn set_form_in_viewport(&self, visible: bool) {
        self.state().form_in_viewport = visible;
    }

    pub(crate) fn set_body_text(&self, text: &str) {
        self.state().body_text = text.to_string();
    }

    pub(crate) fn fail_renders(&self) {
        self.state().fail_render = true;
    }

    pub(crate) fn events(&self) -> Vec<AppEvent> {
        self.state().events.clone()
    }

    pub(crate) fn count_events(&self, event: AppEvent) -> usize {
        self.state().events.iter().filter(|e| **e == event).count()
    }

    pub(crate) fn last_indicator(&self) -> Option<Indicator> {
        self.state().indicators.last().cloned()
    }

    pub(crate) fn indicator_count(&self) -> usize {
        self.state().indicators.len()
    }

    pub(crate) fn reloads(&self) -> usize {
        self.state().reloads
    }

    pub(crate) fn main_touches(&self) -> usize {
        self.state().main_touches
    }
}

impl Page for FakePage {
    fn path(&self) -> String {
        self.state().path.clone()
    }

    fn focused_element(&self) -> Option<FocusedElement> {
        self.state().focused.clone()
    }

    fn scroll_y(&self) -> f64 {
        self.state().scroll_y
    }

    fn has_open_dialog(&self) -> bool {
        self.state().dialog_open
    }

    fn form_in_viewport(&self) -> bool {
        self.state().form_in_viewport
    }

    fn has_auth_form_marker(&self) -> bool {
        self.state().auth_form_marker
    }

    fn body_text(&self) -> String {
        self.state().body_text.clone()
    }

    fn dispatch(&self, event: AppEvent) -> anyhow::Result<()> {
        self.state().events.push(event);
        Ok(())
    }

    fn render_indicator(&self, indicator: &Indicator) -> anyhow::Result<()> {
        let mut state = self.state();
        if state.fail_render {
            anyhow::bail!("indicator node detached");
        }
        state.indicators.push(indicator.clone());
        Ok(())
    }

    fn touch_main(&self) -> anyhow::Result<()> {
        self.state().main_touches += 1;
        Ok(())
    }

    fn reload(&self) -> anyhow::Result<()> {
        self.state().reloads += 1;
        Ok(())
    }
}

/// Answers `get_session` / `refresh_session` from a script, falling back to a
/// default once the script is exhausted.
pub(crate) struct FakeAuth {
    default: Mutex<Result<SessionResponse, RefreshError>>,
    script: Mutex<VecDeque<Result<SessionResponse, RefreshError>>>,
    get_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeAuth {
    pub(crate) fn returning(result: Result<SessionResponse, RefreshError>) -> Self {
        Self {
            default: Mutex::new(result),
            script: Mutex::new(VecDeque::new()),
            get_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    pub(crate) fn with_user(id: &str) -> Self {
        Self::returning(Ok(SessionResponse::with_user(id)))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::returning(Err(RefreshError::rejected(message)))
    }

    pub(crate) fn set_default(&self, result: Result<SessionResponse, RefreshError>) {
        *self.default.lock().unwrap() = result;
    }

    /// Makes every call block for `delay` before answering.
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn push(&self, result: Result<SessionResponse, RefreshError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<SessionResponse, RefreshError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }
        self.default.lock().unwrap().clone()
    }
}

impl AuthClient for FakeAuth {
    fn get_session(&self) -> Result<SessionResponse, RefreshError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.next()
    }

    fn refresh_session(&self) -> Result<SessionResponse, RefreshError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.next()
    }
}

pub(crate) struct FakeHook {
    result: bool,
    calls: AtomicUsize,
}

impl FakeHook {
    pub(crate) fn new(result: bool) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RestoreHook for FakeHook {
    fn restore(&self) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result)
    }
}
