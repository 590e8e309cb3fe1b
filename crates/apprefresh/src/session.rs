//! Session bootstrap for the wrapped app.
//!
//! Runs once per page: arms the `get_session` loop guard, starts a periodic
//! session refresh, and tries to restore a persisted session shortly after
//! start-up. Also answers activity queries and manual refresh requests.

use crate::auth::{AuthClient, LoopGuard, RestoreHook};
use crate::clock::Clock;
use crate::config::{ms, SessionConfig};
use crate::host::Host;
use crate::page::{AppEvent, Page};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub initialized: bool,
    pub last_active: u64,
    pub session_restored: bool,
    /// Starts at zero, so the first periodic or visibility check always runs.
    pub last_refresh_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityReport {
    pub last_active: DateTime<Utc>,
    pub inactive_ms: u64,
    pub inactive_min: u64,
}

pub struct SessionBootstrapper {
    config: SessionConfig,
    page: Arc<dyn Page>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    store: Arc<dyn KeyValueStore>,
    auth: Option<Arc<LoopGuard>>,
    hook: Option<Arc<dyn RestoreHook>>,
    state: Mutex<AppState>,
    timers: Mutex<Vec<TimerHandle>>,
    this: Weak<SessionBootstrapper>,
}

impl SessionBootstrapper {
    pub fn new(
        config: SessionConfig,
        host: &Host,
        auth: Option<Arc<LoopGuard>>,
        hook: Option<Arc<dyn RestoreHook>>,
    ) -> Arc<Self> {
        let state = AppState {
            last_active: host.clock.now_ms(),
            ..AppState::default()
        };

        Arc::new_cyclic(|this| Self {
            config,
            page: Arc::clone(&host.page),
            clock: Arc::clone(&host.clock),
            scheduler: Arc::clone(&host.scheduler),
            store: Arc::clone(&host.store),
            auth,
            hook,
            state: Mutex::new(state),
            timers: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn app_state(&self) -> AppState {
        self.lock().clone()
    }

    /// One-shot start-up. Later calls do nothing.
    pub fn initialize(&self) {
        {
            let mut state = self.lock();
            if state.initialized {
                return;
            }
            state.initialized = true;
        }

        match &self.auth {
            Some(guard) => guard.arm(),
            None => log::debug!("No auth client, session loop guard not armed"),
        }

        let periodic = self.this.clone();
        let periodic_handle = self.scheduler.repeat(
            ms(self.config.periodic_check_interval_ms),
            Box::new(move || {
                if let Some(session) = periodic.upgrade() {
                    session.periodic_tick();
                }
            }),
        );

        let restore = self.this.clone();
        let restore_handle = self.scheduler.once(
            ms(self.config.restore_delay_ms),
            Box::new(move || {
                if let Some(session) = restore.upgrade() {
                    if session.restore_session() {
                        log::info!("App start-up finished: session restored");
                    } else {
                        log::info!("App start-up finished: session not restored");
                    }
                }
            }),
        );

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.push(periodic_handle);
        timers.push(restore_handle);

        log::info!("[*] App session bootstrap initialized");
    }

    pub fn shutdown(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for timer in timers.drain(..) {
            timer.cancel();
        }
    }

    fn has_stored_session(&self) -> bool {
        self.config.session_keys.iter().any(|key| {
            match self.store.get(key) {
                Ok(Some(value)) if !value.is_empty() => {
                    log::debug!("Found stored session under {}", key);
                    true
                }
                Ok(_) => false,
                Err(e) => {
                    log::debug!("Could not read {}: {}", key, e);
                    false
                }
            }
        })
    }

    fn mark_restored(&self) {
        {
            let mut state = self.lock();
            state.session_restored = true;
            state.last_refresh_time = self.clock.now_ms();
        }
        self.dispatch(AppEvent::SessionRestored);
    }

    fn dispatch(&self, event: AppEvent) -> bool {
        match self.page.dispatch(event) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to dispatch {}: {}", event.name(), e);
                false
            }
        }
    }

    /// Restores a persisted session, first through the page's restore hook
    /// and then through the auth client. Never fails; returns whether a
    /// session is now live.
    pub fn restore_session(&self) -> bool {
        log::info!("Trying to restore the session");

        if !self.has_stored_session() {
            log::info!("No stored session found, nothing to restore");
            return false;
        }

        if let Some(hook) = &self.hook {
            match hook.restore() {
                Ok(true) => {
                    log::info!("Session restored through the restore hook");
                    self.mark_restored();
                    return true;
                }
                Ok(false) => log::debug!("Restore hook did not restore the session"),
                Err(e) => {
                    log::error!("Restore hook failed: {}", e);
                    return false;
                }
            }
        }

        if let Some(auth) = &self.auth {
            match auth.refresh_session().and_then(|resp| resp.into_result()) {
                Ok(resp) if resp.has_session() => {
                    log::info!(
                        "Session refreshed: {}",
                        resp.user_id().unwrap_or("unknown user")
                    );
                    self.mark_restored();
                    return true;
                }
                Ok(_) => {}
                Err(e) if e.is_counted_failure() => {
                    log::warn!("Session refresh failed: {}", e.user_message())
                }
                Err(e) => log::error!("Session refresh error: {}", e),
            }
        }

        log::warn!("Session restore failed, the user may need to sign in again");
        false
    }

    /// Called for click, touchstart, scroll and keypress.
    pub fn record_activity(&self) {
        self.lock().last_active = self.clock.now_ms();
    }

    pub fn check_activity(&self) -> ActivityReport {
        let last_active = self.lock().last_active;
        let inactive_ms = self.clock.now_ms().saturating_sub(last_active);
        ActivityReport {
            last_active: DateTime::<Utc>::from_timestamp_millis(last_active as i64)
                .unwrap_or_default(),
            inactive_ms,
            inactive_min: inactive_ms / 60_000,
        }
    }

    /// Refreshes the session on request; success notifies the app with
    /// `appresume`.
    pub fn refresh_session(&self) -> bool {
        let Some(auth) = &self.auth else {
            return false;
        };

        match auth.refresh_session().and_then(|resp| resp.into_result()) {
            Ok(resp) if resp.has_session() => {
                self.lock().last_refresh_time = self.clock.now_ms();
                self.dispatch(AppEvent::AppResume);
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::error!("Error while refreshing the session: {}", e);
                false
            }
        }
    }

    /// Asks the app to reload its content.
    pub fn refresh_content(&self) -> bool {
        let sent = self.dispatch(AppEvent::AppResume);
        if sent {
            log::info!("Content refresh event dispatched");
        }
        sent
    }

    fn since_last_refresh(&self, now: u64) -> u64 {
        now.saturating_sub(self.lock().last_refresh_time)
    }

    pub fn periodic_tick(&self) {
        let now = self.clock.now_ms();
        if self.since_last_refresh(now) < self.config.periodic_refresh_after_ms {
            return;
        }
        let Some(auth) = &self.auth else {
            return;
        };

        log::info!("Running periodic session refresh");
        match auth.refresh_session().and_then(|resp| resp.into_result()) {
            Ok(resp) if resp.has_session() => {
                log::info!("Periodic session refresh succeeded");
                self.lock().last_refresh_time = now;
                self.dispatch(AppEvent::AppRefresh);
            }
            Ok(_) => {}
            Err(e) => log::warn!("Periodic refresh failed: {}", e),
        }
    }

    /// On becoming visible after a long enough gap, refreshes the session and
    /// tells the app to resume. The answer itself is not inspected.
    pub fn on_visibility_change(&self, visible: bool) {
        if !visible {
            return;
        }
        log::info!("App became visible");

        let now = self.clock.now_ms();
        if self.since_last_refresh(now) <= self.config.visibility_refresh_after_ms {
            return;
        }
        let Some(auth) = &self.auth else {
            return;
        };

        match auth.refresh_session() {
            Ok(_) => {
                self.lock().last_refresh_time = now;
                self.dispatch(AppEvent::AppResume);
                log::info!("App resumed, refresh event dispatched");
            }
            Err(e) => log::warn!("Refresh on visibility change failed: {}", e),
        }
    }
}
