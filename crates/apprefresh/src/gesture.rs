//! Pull-to-refresh gesture.
//!
//! Touch sequences drive a small state machine:
//!
//! ```text
//! Idle --touch_start--> Dragging --touch_end (pull >= threshold)--> Refreshing --+
//!   ^                      |                                                    |
//!   +------ cancel/short --+<---------------- retract after delay ---------------+
//! ```
//!
//! The controller refuses to start a drag whenever the page looks like the
//! user is busy with a form, and re-checks on every move.

use crate::config::{ms, GestureConfig};
use crate::host::Host;
use crate::page::{FocusedElement, Indicator, IndicatorLabel, Page};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::utils::contains_any;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

const DISABLED_EXACT_PATHS: &[&str] = &["/login", "/register"];
const DISABLED_PATH_PARTS: &[&str] = &["/edit", "/create", "/post", "/admin", "/profile"];
/// "log in" next to "password" or "email" suggests a login form.
const LOGIN_WORD: &str = "登录";
const LOGIN_COMPANIONS: &[&str] = &["密码", "邮箱"];

/// What the gesture needs from the refresh gate.
pub trait RefreshEntry: Send + Sync {
    fn pause_for(&self, duration: Duration);
    fn refresh(&self, force: bool) -> bool;
    fn redirect_disabled(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GesturePhase {
    Idle,
    Dragging,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Drag {
    Idle,
    Active { start_y: f64, current_y: f64 },
}

struct GestureState {
    drag: Drag,
    refreshing: bool,
    enabled: bool,
    /// Set from the page context at init and on every navigation.
    page_disabled: bool,
    /// False when the controller was initialized on a disabled page.
    attached: bool,
    current_path: String,
    pending_reload: Option<TimerHandle>,
}

pub struct PullGesture {
    config: GestureConfig,
    page: Arc<dyn Page>,
    scheduler: Arc<dyn Scheduler>,
    entry: Option<Arc<dyn RefreshEntry>>,
    state: Mutex<GestureState>,
    this: Weak<PullGesture>,
}

impl PullGesture {
    pub fn new(
        config: GestureConfig,
        host: &Host,
        entry: Option<Arc<dyn RefreshEntry>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            page: Arc::clone(&host.page),
            scheduler: Arc::clone(&host.scheduler),
            entry,
            state: Mutex::new(GestureState {
                drag: Drag::Idle,
                refreshing: false,
                enabled: true,
                page_disabled: false,
                attached: false,
                current_path: String::new(),
                pending_reload: None,
            }),
            this: this.clone(),
        })
    }

    /// Initializes after a short delay so the page's own scripts settle first.
    pub fn install(&self) -> TimerHandle {
        let this = self.this.clone();
        self.scheduler.once(
            ms(self.config.init_delay_ms),
            Box::new(move || {
                if let Some(gesture) = this.upgrade() {
                    gesture.initialize();
                }
            }),
        )
    }

    /// Attaches to the page unless the page itself rules the gesture out, in
    /// which case the controller stays inert until the next full load.
    pub fn initialize(&self) {
        if self.lock().attached {
            return;
        }

        let disabled = self.context_disables();
        let mut state = self.lock();
        state.page_disabled = disabled;
        if disabled {
            log::info!("Pull to refresh disabled on this page");
            return;
        }
        state.attached = true;
        state.current_path = self.page.path();
        log::info!("Pull to refresh initialized");
    }

    fn lock(&self) -> MutexGuard<'_, GestureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> GesturePhase {
        let state = self.lock();
        if state.refreshing {
            GesturePhase::Refreshing
        } else if matches!(state.drag, Drag::Active { .. }) {
            GesturePhase::Dragging
        } else {
            GesturePhase::Idle
        }
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    // ── Disabling context ────────────────────────────────────────────────

    /// Everything about the live page that rules out a pull, ignoring the
    /// per-page flag.
    fn context_disables(&self) -> bool {
        let path = self.page.path();
        if DISABLED_EXACT_PATHS.contains(&path.as_str()) || contains_any(&path, DISABLED_PATH_PARTS)
        {
            return true;
        }

        if self
            .entry
            .as_ref()
            .is_some_and(|entry| entry.redirect_disabled())
        {
            return true;
        }

        if self
            .page
            .focused_element()
            .is_some_and(|el| el.is_editable())
        {
            return true;
        }

        if self.page.has_open_dialog()
            || self.page.form_in_viewport()
            || self.page.has_auth_form_marker()
        {
            return true;
        }

        let text = self.page.body_text().to_lowercase();
        text.contains(LOGIN_WORD) && contains_any(&text, LOGIN_COMPANIONS)
    }

    pub fn should_disable(&self) -> bool {
        self.context_disables() || self.lock().page_disabled
    }

    // ── Touch handling ───────────────────────────────────────────────────

    pub fn touch_start(&self, y: f64) {
        {
            let state = self.lock();
            if !state.attached || !state.enabled {
                return;
            }
        }
        if self.should_disable() {
            return;
        }
        if self.page.scroll_y() > self.config.start_scroll_tolerance_px {
            return;
        }

        self.lock().drag = Drag::Active {
            start_y: y,
            current_y: y,
        };
    }

    /// Returns true when the host should suppress the default scroll.
    pub fn touch_move(&self, y: f64) -> bool {
        {
            let state = self.lock();
            if !state.attached || !state.enabled || state.drag == Drag::Idle {
                return false;
            }
        }

        if self.should_disable() {
            self.lock().drag = Drag::Idle;
            return false;
        }

        let pull = {
            let mut state = self.lock();
            let Drag::Active { start_y, .. } = state.drag else {
                return false;
            };
            state.drag = Drag::Active {
                start_y,
                current_y: y,
            };
            y - start_y
        };

        if pull <= self.config.min_pull_px {
            self.lock().drag = Drag::Idle;
            self.retract_indicator();
            return false;
        }

        if self.page.scroll_y() > self.config.top_scroll_tolerance_px {
            return false;
        }

        let damped = pull.powf(self.config.damping_exponent);
        if pull > self.config.indicator_reveal_px {
            self.update_indicator(damped);
        }
        true
    }

    pub fn touch_end(&self) {
        let pull = {
            let mut state = self.lock();
            if !state.attached || !state.enabled {
                return;
            }
            let Drag::Active { start_y, current_y } = state.drag else {
                return;
            };
            state.drag = Drag::Idle;
            current_y - start_y
        };

        if pull >= self.config.refresh_distance_px
            && self.page.scroll_y() <= self.config.top_scroll_tolerance_px
        {
            self.perform_refresh();
        } else {
            self.retract_indicator();
        }
    }

    pub fn touch_cancel(&self) {
        self.touch_end();
    }

    // ── Refresh ──────────────────────────────────────────────────────────

    pub fn perform_refresh(&self) {
        {
            let mut state = self.lock();
            if state.refreshing {
                return;
            }
            state.refreshing = true;
        }
        self.update_indicator(self.config.refresh_distance_px);
        log::info!("Pull to refresh triggered");

        match &self.entry {
            Some(entry) => {
                entry.pause_for(ms(self.config.refresh_pause_ms));
                let success = entry.refresh(true);
                log::info!(
                    "Pull to refresh result: {}",
                    if success { "success" } else { "failure" }
                );
                self.finish_refresh();
            }
            None => {
                log::info!("No refresh module available, reloading the page");
                let page = Arc::clone(&self.page);
                let handle = self.scheduler.once(
                    ms(self.config.reload_fallback_delay_ms),
                    Box::new(move || {
                        if let Err(e) = page.reload() {
                            log::error!("Page reload failed: {}", e);
                        }
                    }),
                );
                self.lock().pending_reload = Some(handle);
            }
        }
    }

    fn finish_refresh(&self) {
        {
            let mut state = self.lock();
            if let Some(reload) = state.pending_reload.take() {
                reload.cancel();
            }
            if !state.refreshing {
                return;
            }
        }

        let this = self.this.clone();
        self.scheduler.once(
            ms(self.config.retract_delay_ms),
            Box::new(move || {
                if let Some(gesture) = this.upgrade() {
                    gesture.lock().refreshing = false;
                    gesture.retract_indicator();
                }
            }),
        );
    }

    fn update_indicator(&self, distance: f64) {
        let indicator = if self.lock().refreshing {
            Indicator {
                visible: true,
                offset_px: 0.0,
                label: IndicatorLabel::Refreshing,
                text: self.config.refreshing_label.clone(),
                spinning: true,
            }
        } else {
            let offset = (distance * 0.5).min(self.config.max_pull_distance_px * 0.5);
            let ready = distance / self.config.refresh_distance_px >= 1.0;
            let (label, text) = if ready {
                (IndicatorLabel::Release, &self.config.release_label)
            } else {
                (IndicatorLabel::Pull, &self.config.pull_label)
            };
            Indicator {
                visible: true,
                offset_px: offset,
                label,
                text: text.clone(),
                spinning: false,
            }
        };
        self.render(&indicator);
    }

    fn retract_indicator(&self) {
        self.render(&Indicator::retracted(&self.config.pull_label));
    }

    fn render(&self, indicator: &Indicator) {
        if let Err(e) = self.page.render_indicator(indicator) {
            log::debug!("Ignoring indicator render failure: {}", e);
        }
    }

    // ── Focus and navigation ─────────────────────────────────────────────

    pub fn focus_in(&self, element: &FocusedElement) {
        let mut state = self.lock();
        if !state.attached || !element.is_editable() {
            return;
        }
        state.enabled = false;
        log::debug!("Form element focused, pull to refresh disabled");
    }

    /// `new_focus` is whatever holds focus after the blur.
    pub fn focus_out(&self, new_focus: Option<&FocusedElement>) {
        if !self.lock().attached || new_focus.is_some_and(|el| el.is_editable()) {
            return;
        }
        if !self.should_disable() {
            self.lock().enabled = true;
            log::debug!("Form element blurred, pull to refresh enabled");
        }
    }

    /// Called by the host whenever the path changes without a full load.
    pub fn on_navigate(&self, path: &str) {
        {
            let state = self.lock();
            if !state.attached || state.current_path == path {
                return;
            }
        }

        let disabled = self.context_disables();
        let mut state = self.lock();
        state.current_path = path.to_string();
        state.page_disabled = disabled;
        log::info!(
            "Route changed to {}, pull to refresh {}",
            path,
            if disabled { "disabled" } else { "enabled" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::scheduler::ManualScheduler;
    use crate::storage::MemoryStore;
    use crate::testing::FakePage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeEntry {
        refreshes: AtomicUsize,
        pauses: Mutex<Vec<Duration>>,
        disabled: AtomicBool,
    }

    impl RefreshEntry for FakeEntry {
        fn pause_for(&self, duration: Duration) {
            self.pauses.lock().unwrap().push(duration);
        }

        fn refresh(&self, _force: bool) -> bool {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn redirect_disabled(&self) -> bool {
            self.disabled.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        sched: ManualScheduler,
        page: Arc<FakePage>,
        entry: Arc<FakeEntry>,
        gesture: Arc<PullGesture>,
    }

    fn build(path: &str, with_entry: bool) -> Fixture {
        let clock = ManualClock::new(0);
        let sched = ManualScheduler::new(clock.clone());
        let page = Arc::new(FakePage::at(path));
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let host = Host::new(
            page.clone(),
            clock,
            Arc::new(sched.clone()),
            Arc::new(MemoryStore::new()),
        );
        let entry = Arc::new(FakeEntry::default());
        let gesture = PullGesture::new(
            GestureConfig::default(),
            &host,
            with_entry.then(|| entry.clone() as Arc<dyn RefreshEntry>),
        );
        Fixture {
            sched,
            page,
            entry,
            gesture,
        }
    }

    fn attached(path: &str) -> Fixture {
        let f = build(path, true);
        f.gesture.initialize();
        assert!(f.gesture.is_attached());
        f
    }

    fn drag(gesture: &PullGesture, from: f64, to: f64) {
        gesture.touch_start(from);
        let mut y = from;
        while y < to {
            y = (y + 25.0).min(to);
            gesture.touch_move(y);
        }
        gesture.touch_end();
    }

    #[test]
    fn test_pull_of_150px_refreshes_once() {
        let f = attached("/feed");
        drag(&f.gesture, 100.0, 250.0);
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(*f.entry.pauses.lock().unwrap(), vec![Duration::from_secs(30)]);
    }

    #[test]
    fn test_pull_of_149px_does_not_refresh() {
        let f = attached("/feed");
        drag(&f.gesture, 100.0, 249.0);
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 0);
        assert!(!f.page.last_indicator().unwrap().visible);
    }

    #[test]
    fn test_install_attaches_after_delay() {
        let f = build("/feed", true);
        let _handle = f.gesture.install();
        assert!(!f.gesture.is_attached());
        f.sched.advance(Duration::from_millis(500));
        assert!(f.gesture.is_attached());
    }

    #[test]
    fn test_indicator_labels_follow_damped_distance() {
        let f = attached("/feed");
        f.gesture.touch_start(0.0);
        assert_eq!(f.gesture.phase(), GesturePhase::Dragging);

        assert!(f.gesture.touch_move(15.0));
        assert_eq!(f.page.indicator_count(), 0);

        assert!(f.gesture.touch_move(100.0));
        let shown = f.page.last_indicator().unwrap();
        assert_eq!(shown.label, IndicatorLabel::Pull);
        assert!((shown.offset_px - 100f64.powf(0.8) * 0.5).abs() < 1e-9);

        // 150px raw is still well below 150px damped.
        assert!(f.gesture.touch_move(200.0));
        assert_eq!(f.page.last_indicator().unwrap().label, IndicatorLabel::Pull);

        assert!(f.gesture.touch_move(600.0));
        let ready = f.page.last_indicator().unwrap();
        assert_eq!(ready.label, IndicatorLabel::Release);
        assert_eq!(ready.text, "Release to refresh");
        assert!((ready.offset_px - 600f64.powf(0.8) * 0.5).abs() < 1e-9);

        assert!(f.gesture.touch_move(5000.0));
        assert_eq!(f.page.last_indicator().unwrap().offset_px, 100.0);
    }

    #[test]
    fn test_short_or_upward_move_cancels_drag() {
        let f = attached("/feed");
        f.gesture.touch_start(300.0);
        assert!(!f.gesture.touch_move(305.0));
        assert_eq!(f.gesture.phase(), GesturePhase::Idle);

        // Later moves and the release are ignored once cancelled.
        assert!(!f.gesture.touch_move(600.0));
        f.gesture.touch_end();
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_ignored_when_scrolled() {
        let f = attached("/feed");
        f.page.set_scroll(11.0);
        f.gesture.touch_start(0.0);
        assert_eq!(f.gesture.phase(), GesturePhase::Idle);

        f.page.set_scroll(10.0);
        f.gesture.touch_start(0.0);
        assert_eq!(f.gesture.phase(), GesturePhase::Dragging);
    }

    #[test]
    fn test_scrolled_page_does_not_suppress_default_or_refresh() {
        let f = attached("/feed");
        f.page.set_scroll(8.0);
        f.gesture.touch_start(0.0);
        assert!(!f.gesture.touch_move(200.0));
        f.gesture.touch_end();
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_context_becoming_disabled_mid_drag_drops_it() {
        let f = attached("/feed");
        f.gesture.touch_start(0.0);
        f.page.set_dialog_open(true);
        assert!(!f.gesture.touch_move(200.0));
        assert_eq!(f.gesture.phase(), GesturePhase::Idle);
        f.gesture.touch_end();
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disabling_contexts() {
        let f = attached("/feed");
        assert!(!f.gesture.should_disable());

        f.page.set_form_in_viewport(true);
        assert!(f.gesture.should_disable());
        f.page.set_form_in_viewport(false);

        f.page.set_body_text("欢迎 登录 请输入密码");
        assert!(f.gesture.should_disable());
        f.page.set_body_text("登录 only");
        assert!(!f.gesture.should_disable());

        f.entry.disabled.store(true, Ordering::SeqCst);
        assert!(f.gesture.should_disable());
        f.entry.disabled.store(false, Ordering::SeqCst);

        f.page.focus(Some(FocusedElement::content_editable("DIV")));
        assert!(f.gesture.should_disable());
        f.page.focus(None);

        for path in ["/login", "/register", "/post/42", "/me/profile"] {
            f.page.set_path(path);
            assert!(f.gesture.should_disable(), "{}", path);
        }
        f.page.set_path("/login/help");
        assert!(!f.gesture.should_disable());
    }

    #[test]
    fn test_initialized_on_disabled_page_stays_detached() {
        let f = build("/login", true);
        f.gesture.initialize();
        assert!(!f.gesture.is_attached());

        f.page.set_path("/feed");
        f.gesture.on_navigate("/feed");
        drag(&f.gesture, 0.0, 300.0);
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_navigation_recomputes_page_flag() {
        let f = attached("/feed");
        f.page.set_path("/admin");
        f.gesture.on_navigate("/admin");
        f.page.set_path("/feed");
        assert!(f.gesture.should_disable());

        f.gesture.on_navigate("/feed");
        assert!(!f.gesture.should_disable());
        drag(&f.gesture, 0.0, 200.0);
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_focus_disables_until_blur_to_non_editable() {
        let f = attached("/feed");
        f.gesture.focus_in(&FocusedElement::new("INPUT"));
        assert!(!f.gesture.is_enabled());

        // Focus moves to another field: still disabled.
        f.gesture.focus_out(Some(&FocusedElement::new("SELECT")));
        assert!(!f.gesture.is_enabled());

        f.gesture.focus_out(None);
        assert!(f.gesture.is_enabled());
    }

    #[test]
    fn test_blur_keeps_disabled_while_context_disables() {
        let f = attached("/feed");
        f.gesture.focus_in(&FocusedElement::new("TEXTAREA"));
        f.page.set_dialog_open(true);
        f.gesture.focus_out(Some(&FocusedElement::new("BUTTON")));
        assert!(!f.gesture.is_enabled());
    }

    #[test]
    fn test_focus_on_plain_element_is_ignored() {
        let f = attached("/feed");
        f.gesture.focus_in(&FocusedElement::new("BUTTON"));
        assert!(f.gesture.is_enabled());
    }

    #[test]
    fn test_refresh_retracts_after_delay() {
        let f = attached("/feed");
        drag(&f.gesture, 0.0, 200.0);
        assert_eq!(f.gesture.phase(), GesturePhase::Refreshing);
        let showing = f.page.last_indicator().unwrap();
        assert_eq!(showing.label, IndicatorLabel::Refreshing);
        assert!(showing.spinning);

        // A second release while refreshing is ignored.
        drag(&f.gesture, 0.0, 200.0);
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 1);

        f.sched.advance(Duration::from_millis(499));
        assert_eq!(f.gesture.phase(), GesturePhase::Refreshing);
        f.sched.advance(Duration::from_millis(1));
        assert_eq!(f.gesture.phase(), GesturePhase::Idle);
        assert!(!f.page.last_indicator().unwrap().visible);
    }

    #[test]
    fn test_without_refresh_entry_page_reloads_after_one_second() {
        let f = build("/feed", false);
        f.gesture.initialize();
        drag(&f.gesture, 0.0, 200.0);
        f.sched.advance(Duration::from_millis(999));
        assert_eq!(f.page.reloads(), 0);
        f.sched.advance(Duration::from_millis(1));
        assert_eq!(f.page.reloads(), 1);
    }

    #[test]
    fn test_render_failures_are_swallowed() {
        let f = attached("/feed");
        f.page.fail_renders();
        drag(&f.gesture, 0.0, 200.0);
        f.sched.advance(Duration::from_secs(1));
        assert_eq!(f.entry.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(f.gesture.phase(), GesturePhase::Idle);
    }
}
