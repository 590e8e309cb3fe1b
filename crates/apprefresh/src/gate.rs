//! Refresh gate.
//!
//! Decides whether a session/data refresh may run right now and runs it. A
//! refresh is suppressed on critical pages (login, registration, editing,
//! posting, a focused text input), while a navigation is in flight, inside a
//! pause window, while another refresh is running, or when the previous one
//! was less than the minimum interval ago. Forced refreshes skip everything
//! except the in-flight check.
//!
//! Timers: a 20 minute auto-refresh, a 5 minute failure check that reloads the
//! page after too many failed refreshes, and a one-shot refresh shortly after
//! page load.

use crate::auth::{AuthClient, SessionResponse};
use crate::clock::{millis, Clock};
use crate::config::{ms, GateConfig};
use crate::gesture::RefreshEntry;
use crate::host::Host;
use crate::page::{AppEvent, FocusedElement, FormInfo, NavTarget, Page};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::storage::{LogEntry, LogKind, RefreshLog};
use crate::utils::contains_any;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

const CRITICAL_PATHS: &[&str] = &["/login", "/register", "/profile", "/create", "/edit", "/admin"];
const CRITICAL_FORM_ACTIONS: &[&str] = &["login", "register", "post", "create", "edit"];
const CRITICAL_FORM_IDS: &[&str] = &["login-form", "register-form", "post-form"];
const CRITICAL_FORM_CLASSES: &[&str] = &["login", "register", "post"];
const CRITICAL_HREFS: &[&str] = &["login", "register", "post", "create", "edit", "profile"];
/// Link texts for "log in", "register", "post", "edit" and "submit".
const CRITICAL_LINK_TEXTS: &[&str] = &["登录", "注册", "发帖", "编辑", "提交"];

/// Snapshot of the gate's mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshState {
    pub last_refresh_time: u64,
    pub is_refreshing: bool,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub data_loaded: bool,
    pub session_restored: bool,
    pub is_navigating: bool,
    pub prevent_refresh_until: u64,
    /// Sticky: once set, timer and gesture refreshes stay off until cleared.
    pub disable_auto_redirect: bool,
}

/// Clears `is_refreshing` however the refresh ends.
struct RefreshingGuard<'a> {
    state: &'a Mutex<RefreshState>,
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.is_refreshing = false;
    }
}

pub struct RefreshGate {
    config: GateConfig,
    page: Arc<dyn Page>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    auth: Option<Arc<dyn AuthClient>>,
    log: RefreshLog,
    state: Mutex<RefreshState>,
    navigation_reset: Mutex<Option<TimerHandle>>,
    timers: Mutex<Vec<TimerHandle>>,
    this: Weak<RefreshGate>,
}

impl RefreshGate {
    pub fn new(
        config: GateConfig,
        host: &Host,
        auth: Option<Arc<dyn AuthClient>>,
        log: RefreshLog,
    ) -> Arc<Self> {
        let state = RefreshState {
            last_refresh_time: host.clock.now_ms(),
            is_refreshing: false,
            failed_attempts: 0,
            max_failed_attempts: config.max_failed_attempts,
            data_loaded: false,
            session_restored: false,
            is_navigating: false,
            prevent_refresh_until: 0,
            disable_auto_redirect: false,
        };

        Arc::new_cyclic(|this| Self {
            config,
            page: Arc::clone(&host.page),
            clock: Arc::clone(&host.clock),
            scheduler: Arc::clone(&host.scheduler),
            auth,
            log,
            state: Mutex::new(state),
            navigation_reset: Mutex::new(None),
            timers: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Starts the auto-refresh and failure-check timers.
    pub fn install(&self) {
        let auto = self.this.clone();
        let auto_handle = self.scheduler.repeat(
            ms(self.config.auto_refresh_interval_ms),
            Box::new(move || {
                if let Some(gate) = auto.upgrade() {
                    gate.auto_refresh_tick();
                }
            }),
        );

        let check = self.this.clone();
        let check_handle = self.scheduler.repeat(
            ms(self.config.failure_check_interval_ms),
            Box::new(move || {
                if let Some(gate) = check.upgrade() {
                    gate.failure_check_tick();
                }
            }),
        );

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.push(auto_handle);
        timers.push(check_handle);
        drop(timers);

        self.log
            .record(LogKind::Info, "Refresh gate installed with critical page protection");
    }

    /// Cancels every timer the gate owns.
    pub fn shutdown(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for timer in timers.drain(..) {
            timer.cancel();
        }
        if let Some(reset) = self.lock_navigation_reset().take() {
            reset.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_navigation_reset(&self) -> MutexGuard<'_, Option<TimerHandle>> {
        self.navigation_reset
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    // ── Predicates ───────────────────────────────────────────────────────

    pub fn is_on_critical_page(&self) -> bool {
        contains_any(&self.page.path(), CRITICAL_PATHS)
            || self
                .page
                .focused_element()
                .is_some_and(|el| el.is_text_input())
    }

    pub fn should_prevent_refresh(&self) -> bool {
        let state = self.lock();
        state.is_navigating || self.clock.now_ms() < state.prevent_refresh_until
    }

    fn redirect_is_disabled(&self) -> bool {
        self.lock().disable_auto_redirect
    }

    fn is_navigating(&self) -> bool {
        self.lock().is_navigating
    }

    fn since_last_refresh(&self) -> u64 {
        self.clock
            .now_ms()
            .saturating_sub(self.lock().last_refresh_time)
    }

    // ── Core operations ──────────────────────────────────────────────────

    pub fn pause_refresh_for(&self, duration: Duration) {
        let until = self.clock.now_ms().saturating_add(millis(duration));
        self.lock().prevent_refresh_until = until;
        self.log.record(
            LogKind::Info,
            format!("Refresh paused for {}s", duration.as_secs()),
        );
    }

    /// Fetches the session if the gate allows it. Returns whether a session
    /// with a user was found; every failure is absorbed here.
    pub fn refresh_app_data(&self, force: bool) -> bool {
        if !force && self.is_on_critical_page() {
            self.log
                .record(LogKind::Info, "On a critical page, skipping automatic refresh");
            return false;
        }

        if self.should_prevent_refresh() && !force {
            self.log.record(
                LogKind::Info,
                "Navigation in progress or refresh paused, skipping refresh",
            );
            return false;
        }

        let now = self.clock.now_ms();
        let _refreshing = {
            let mut state = self.lock();
            if state.is_refreshing {
                drop(state);
                self.log
                    .record(LogKind::Warn, "A refresh is already running, skipping this one");
                return false;
            }

            let since = now.saturating_sub(state.last_refresh_time);
            if !force && since < self.config.min_refresh_interval_ms {
                drop(state);
                self.log.record(
                    LogKind::Info,
                    format!("Refresh too frequent, skipping ({}s)", (since + 500) / 1000),
                );
                return false;
            }

            state.is_refreshing = true;
            state.last_refresh_time = now;
            RefreshingGuard { state: &self.state }
        };

        self.log.record(LogKind::Info, "Refreshing app data");

        let Some(auth) = &self.auth else {
            self.lock().failed_attempts += 1;
            self.log
                .record(LogKind::Error, "Auth client unavailable, cannot refresh data");
            return false;
        };

        match auth.get_session().and_then(SessionResponse::into_result) {
            Ok(response) => match response.user_id() {
                Some(id) => {
                    let short: String = id.chars().take(6).collect();
                    {
                        let mut state = self.lock();
                        state.session_restored = true;
                        state.data_loaded = true;
                    }
                    self.log.record(
                        LogKind::Success,
                        format!("Session refreshed, user {}...", short),
                    );
                    true
                }
                None => {
                    self.log.record(LogKind::Info, "No session data");
                    false
                }
            },
            Err(e) => {
                if e.is_counted_failure() {
                    self.lock().failed_attempts += 1;
                }
                self.log
                    .record(LogKind::Error, format!("Session refresh failed: {}", e));
                false
            }
        }
    }

    /// Tells the host application to re-render, unless the user is busy.
    pub fn trigger_components_refresh(&self) {
        if self.is_navigating() || self.redirect_is_disabled() || self.is_on_critical_page() {
            return;
        }

        self.log.record(LogKind::Info, "Triggering component refresh");
        if let Err(e) = self.page.dispatch(AppEvent::DataRefreshed) {
            self.log.record(
                LogKind::Error,
                format!("Failed to dispatch refresh event: {}", e),
            );
        }
        if let Err(e) = self.page.touch_main() {
            log::debug!("Could not mark the DOM as changed: {}", e);
        }
    }

    // ── Page listeners ───────────────────────────────────────────────────

    fn mark_critical_interaction(&self, what: &str) {
        self.lock().disable_auto_redirect = true;
        self.pause_refresh_for(ms(self.config.critical_pause_ms));
        self.log.record(
            LogKind::Info,
            format!("{} detected, automatic redirect disabled", what),
        );
    }

    pub fn on_submit(&self, form: &FormInfo) {
        let action = form.action.as_deref().unwrap_or("");
        let critical = contains_any(action, CRITICAL_FORM_ACTIONS)
            || CRITICAL_FORM_IDS.contains(&form.id.as_str())
            || contains_any(&form.class_name, CRITICAL_FORM_CLASSES);

        if critical {
            self.mark_critical_interaction("Critical form submission");
        }
    }

    /// `target` is the closest navigation element of the click, if any.
    pub fn on_click(&self, target: Option<&NavTarget>) {
        let Some(target) = target else { return };

        let href = target.href.as_deref().unwrap_or("");
        let text = target.text.to_lowercase();
        let critical =
            contains_any(href, CRITICAL_HREFS) || contains_any(&text, CRITICAL_LINK_TEXTS);

        if critical {
            self.mark_critical_interaction("Critical navigation");
        } else if target.is_navigation_element() {
            self.lock().is_navigating = true;
            self.pause_refresh_for(ms(self.config.navigation_pause_ms));
            self.schedule_navigation_reset();
        }
    }

    /// The latest navigation owns the window: any earlier reset is cancelled.
    fn schedule_navigation_reset(&self) {
        let this = self.this.clone();
        let handle = self.scheduler.once(
            ms(self.config.navigation_window_ms),
            Box::new(move || {
                if let Some(gate) = this.upgrade() {
                    gate.lock().is_navigating = false;
                }
            }),
        );

        if let Some(previous) = self.lock_navigation_reset().replace(handle) {
            previous.cancel();
        }
    }

    pub fn on_focus_in(&self, element: &FocusedElement) {
        if element.is_text_input() {
            self.log
                .record(LogKind::Info, "Form input focused, pausing refresh");
            self.pause_refresh_for(ms(self.config.input_focus_pause_ms));
        }
    }

    pub fn on_page_load(&self) {
        if self.is_on_critical_page() {
            self.log
                .record(LogKind::Info, "On a critical page, automatic refresh disabled");
            self.lock().disable_auto_redirect = true;
            self.pause_refresh_for(ms(self.config.critical_pause_ms));
            return;
        }

        let this = self.this.clone();
        let handle = self.scheduler.once(
            ms(self.config.initial_refresh_delay_ms),
            Box::new(move || {
                let Some(gate) = this.upgrade() else { return };
                if gate.redirect_is_disabled() {
                    gate.log
                        .record(LogKind::Info, "Automatic redirect disabled, skipping load refresh");
                    return;
                }
                gate.refresh_app_data(true);
            }),
        );
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    pub fn on_visibility_change(&self, visible: bool) {
        if self.redirect_is_disabled() || self.is_on_critical_page() || !visible {
            return;
        }

        if self.since_last_refresh() > self.config.visibility_refresh_after_ms {
            self.log.record(
                LogKind::Info,
                "Page visible again after more than 2 minutes, refreshing",
            );
            self.refresh_app_data(false);
        }
    }

    // ── Timer bodies ─────────────────────────────────────────────────────

    pub fn auto_refresh_tick(&self) {
        if self.redirect_is_disabled() || self.is_on_critical_page() {
            return;
        }
        if !self.is_navigating() {
            self.refresh_app_data(false);
        }
    }

    pub fn failure_check_tick(&self) {
        if self.is_on_critical_page() {
            self.lock().failed_attempts = 0;
            return;
        }

        let (failed, max, disabled) = {
            let state = self.lock();
            (
                state.failed_attempts,
                state.max_failed_attempts,
                state.disable_auto_redirect,
            )
        };
        if disabled || failed < max {
            return;
        }

        self.log.record(
            LogKind::Warn,
            format!("{} consecutive refresh failures, reloading the page", failed),
        );
        // A reload wipes page state; mirror that so a host whose reload is
        // delayed is not reloaded again on the next tick.
        self.lock().failed_attempts = 0;
        if let Err(e) = self.page.reload() {
            self.log
                .record(LogKind::Error, format!("Page reload failed: {}", e));
        }
    }

    // ── Control surface ──────────────────────────────────────────────────

    /// Entry point for other modules. Non-forced calls are refused while
    /// redirects are disabled or on a critical page.
    pub fn refresh(&self, force: bool) -> bool {
        if !force && (self.redirect_is_disabled() || self.is_on_critical_page()) {
            return false;
        }

        let success = self.refresh_app_data(force);
        if success {
            self.trigger_components_refresh();
        }
        success
    }

    pub fn state(&self) -> RefreshState {
        self.lock().clone()
    }

    pub fn pause_for(&self, duration: Duration) {
        self.pause_refresh_for(duration);
    }

    pub fn disable_redirect(&self) {
        self.lock().disable_auto_redirect = true;
        self.pause_refresh_for(ms(self.config.critical_pause_ms));
    }

    pub fn enable_redirect(&self) {
        self.lock().disable_auto_redirect = false;
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.log.entries()
    }
}

impl RefreshEntry for RefreshGate {
    fn pause_for(&self, duration: Duration) {
        RefreshGate::pause_for(self, duration);
    }

    fn refresh(&self, force: bool) -> bool {
        RefreshGate::refresh(self, force)
    }

    fn redirect_disabled(&self) -> bool {
        self.redirect_is_disabled()
    }
}
