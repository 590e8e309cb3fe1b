//! Chrome-backed host: runs the controllers against a live page.
//!
//! Every query is a small script evaluated in the tab. Structured results
//! always come back as a `JSON.stringify`'d string, since the DevTools
//! protocol does not hand objects back by value.

use crate::auth::{AuthClient, RestoreHook, SessionResponse};
use crate::environment::EnvironmentSignals;
use crate::error::RefreshError;
use crate::page::{AppEvent, FocusedElement, Indicator, Page};
use crate::shell::PageEvent;
use crate::storage::KeyValueStore;
use crate::utils::js_escape;
use headless_chrome::browser::default_executable;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::error::Error;
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

/// Global array the injected bridge pushes DOM events into.
pub const EVENT_QUEUE: &str = "__apprefresh_events";

/// Launches Chrome with the given user agent and a dedicated profile.
///
/// If the first launch fails the profile is assumed corrupt, wiped, and the
/// launch retried once.
pub fn create_browser(
    agent: &str,
    headless: bool,
) -> Result<Browser, Box<dyn Error + Send + Sync>> {
    let user_agent = OsString::from(format!("--user-agent={agent}"));

    let mut attempts = 0;
    loop {
        let profile_dir = crate::utils::get_profile_dir()?;

        let mut options = LaunchOptions::default_builder();
        let mut launch_options = options
            .headless(headless)
            .sandbox(false)
            // The poll loop talks to the browser constantly; this only
            // fires if the CLI itself hangs.
            .idle_browser_timeout(Duration::from_secs(600))
            .window_size(Some((412, 915)))
            .enable_gpu(false)
            .args(vec![
                user_agent.as_os_str(),
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-session-crashed-bubble"),
                OsStr::new("--touch-events=enabled"),
            ])
            .user_data_dir(Some(profile_dir));

        if let Ok(path) = std::env::var("APPREFRESH_CHROME_PATH") {
            launch_options = launch_options.path(Some(path.into()));
        } else if let Ok(executable_path) = default_executable() {
            launch_options = launch_options.path(Some(executable_path));
        }

        match Browser::new(launch_options.build()?) {
            Ok(browser) => return Ok(browser),
            Err(e) => {
                attempts += 1;
                if attempts >= 2 {
                    return Err(format!("Browser failed even after wipe: {}", e).into());
                }
                log::warn!("[!] Browser connection failed. Wiping profile and retrying...");
                crate::utils::wipe_profile_dir()?;
            }
        }
    }
}

/// The first tab Chrome opened, or a new one.
pub fn get_initial_tab(browser: &Browser) -> anyhow::Result<Arc<Tab>> {
    for _ in 0..10 {
        if let Ok(tabs) = browser.get_tabs().lock() {
            if let Some(t) = tabs.first() {
                return Ok(Arc::clone(t));
            }
        }
        sleep(Duration::from_millis(200));
    }
    browser.new_tab()
}

/// A tab plus the evaluation helpers every bridge type shares.
#[derive(Clone)]
pub struct PageTab(pub Arc<Tab>);

impl PageTab {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self(tab)
    }

    // ── Low-level JS evaluation helpers ──────────────────────────────────

    /// Returns `false` if the script returns null/undefined.
    pub fn eval_bool(&self, js: &str) -> anyhow::Result<bool> {
        Ok(self
            .0
            .evaluate(js, false)?
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub fn eval_f64(&self, js: &str) -> anyhow::Result<Option<f64>> {
        Ok(self.0.evaluate(js, false)?.value.and_then(|v| v.as_f64()))
    }

    /// Returns `None` if the script returns null/undefined.
    pub fn eval_string(&self, js: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .0
            .evaluate(js, false)?
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    /// Like [`eval_string`](Self::eval_string) but awaits a returned promise.
    pub fn eval_async_string(&self, js: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .0
            .evaluate(js, true)?
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    /// Evaluates a script that returns `JSON.stringify(...)` and decodes it.
    pub fn eval_json<T: DeserializeOwned>(&self, js: &str) -> anyhow::Result<Option<T>> {
        match self.eval_string(js)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(None),
        }
    }

    /// Evaluates JS for its side effects.
    pub fn eval(&self, js: &str) -> anyhow::Result<()> {
        self.0.evaluate(js, false)?;
        Ok(())
    }

    // ── Event bridge ─────────────────────────────────────────────────────

    /// Installs the DOM listeners that feed [`EVENT_QUEUE`]. Safe to call
    /// again; a page that already has the bridge is left alone.
    pub fn inject_event_bridge(&self) -> anyhow::Result<()> {
        self.eval(EVENT_BRIDGE_JS)
    }

    /// False after a full reload wiped the bridge.
    pub fn bridge_installed(&self) -> anyhow::Result<bool> {
        self.eval_bool(&format!("Array.isArray(window.{EVENT_QUEUE})"))
    }

    pub fn is_loaded(&self) -> anyhow::Result<bool> {
        self.eval_bool("document.readyState === 'complete'")
    }

    /// Takes every queued event. Entries that do not decode are dropped.
    pub fn drain_events(&self) -> anyhow::Result<Vec<PageEvent>> {
        let raw: Vec<Value> = self
            .eval_json(&format!(
                "JSON.stringify((window.{EVENT_QUEUE} || []).splice(0))"
            ))?
            .unwrap_or_default();
        Ok(decode_events(raw))
    }

    /// Lets the bridge cancel the native scroll for the rest of the touch.
    /// Best effort: the flag lands after the move that asked for it.
    pub fn set_scroll_suppressed(&self, suppressed: bool) -> anyhow::Result<()> {
        self.eval(&format!("window.__apprefresh_suppress_scroll = {suppressed};"))
    }

    pub fn read_signals(&self) -> anyhow::Result<EnvironmentSignals> {
        self.eval_json(
            r#"JSON.stringify({
                user_agent: navigator.userAgent,
                protocol: location.protocol,
                wrapper_global_present: !!window.Capacitor
            })"#,
        )?
        .ok_or_else(|| anyhow::anyhow!("Could not read environment signals"))
    }
}

fn decode_events(raw: Vec<Value>) -> Vec<PageEvent> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                log::debug!("Dropping undecodable page event {}: {}", value, e);
                None
            }
        })
        .collect()
}

const EVENT_BRIDGE_JS: &str = r#"
(function() {
    if (Array.isArray(window.__apprefresh_events)) return;
    const queue = window.__apprefresh_events = [];
    const push = (event) => queue.push(event);
    const elementInfo = (el) => el && el !== document.body && el.tagName
        ? { tag: el.tagName, content_editable: !!el.isContentEditable }
        : null;

    document.addEventListener('click', (e) => {
        const el = e.target && e.target.closest
            ? e.target.closest('a, button, [role="button"]')
            : null;
        push({ type: 'click', target: el ? {
            tag: el.tagName,
            role: el.getAttribute('role'),
            href: el.getAttribute('href'),
            text: el.innerText || el.textContent || ''
        } : null });
    }, true);

    document.addEventListener('submit', (e) => {
        const form = e.target || {};
        push({ type: 'submit', form: {
            action: form.getAttribute ? form.getAttribute('action') : null,
            id: form.id || '',
            class_name: typeof form.className === 'string' ? form.className : ''
        } });
    }, true);

    document.addEventListener('focusin', (e) => {
        const element = elementInfo(e.target);
        if (element) push({ type: 'focus_in', element });
    });
    document.addEventListener('focusout', (e) => {
        push({ type: 'focus_out', next: elementInfo(e.relatedTarget) });
    });

    const touchY = (e) => e.touches && e.touches.length ? e.touches[0].clientY : 0;
    document.addEventListener('touchstart', (e) => {
        window.__apprefresh_suppress_scroll = false;
        push({ type: 'touch_start', y: touchY(e) });
    }, { passive: true });
    document.addEventListener('touchmove', (e) => {
        if (window.__apprefresh_suppress_scroll) e.preventDefault();
        push({ type: 'touch_move', y: touchY(e) });
    }, { passive: false });
    document.addEventListener('touchend', () => {
        window.__apprefresh_suppress_scroll = false;
        push({ type: 'touch_end' });
    }, { passive: true });
    document.addEventListener('touchcancel', () => {
        window.__apprefresh_suppress_scroll = false;
        push({ type: 'touch_cancel' });
    }, { passive: true });

    document.addEventListener('visibilitychange', () => {
        push({ type: 'visibility', visible: document.visibilityState === 'visible' });
    });
    ['scroll', 'keypress'].forEach((name) => {
        document.addEventListener(name, () => push({ type: 'activity' }), { passive: true });
    });

    let lastPath = location.pathname;
    const checkPath = () => {
        if (location.pathname !== lastPath) {
            lastPath = location.pathname;
            push({ type: 'navigated', path: lastPath });
        }
    };
    ['pushState', 'replaceState'].forEach((name) => {
        const original = history[name];
        history[name] = function() {
            const result = original.apply(this, arguments);
            checkPath();
            return result;
        };
    });
    window.addEventListener('popstate', checkPath);
    window.addEventListener('hashchange', checkPath);
    window.addEventListener('load', () => push({ type: 'load' }));
})()
"#;

/// [`Page`] over a Chrome tab. Queries that fail answer conservatively.
pub struct ChromePage {
    tab: PageTab,
}

impl ChromePage {
    pub fn new(tab: PageTab) -> Self {
        Self { tab }
    }

    fn query_bool(&self, what: &str, js: &str) -> bool {
        self.tab.eval_bool(js).unwrap_or_else(|e| {
            log::debug!("Could not check {}: {}", what, e);
            true
        })
    }
}

impl Page for ChromePage {
    fn path(&self) -> String {
        match self.tab.eval_string("location.pathname") {
            Ok(Some(path)) => path,
            Ok(None) => String::new(),
            Err(e) => {
                log::debug!("Could not read the page path: {}", e);
                String::new()
            }
        }
    }

    fn focused_element(&self) -> Option<FocusedElement> {
        self.tab
            .eval_json(
                r#"(function() {
                    const el = document.activeElement;
                    if (!el || el === document.body) return null;
                    return JSON.stringify({ tag: el.tagName, content_editable: !!el.isContentEditable });
                })()"#,
            )
            .unwrap_or_else(|e| {
                log::debug!("Could not read the focused element: {}", e);
                None
            })
    }

    fn scroll_y(&self) -> f64 {
        match self.tab.eval_f64("window.scrollY") {
            Ok(Some(y)) => y,
            // Unknown scroll position never counts as "at the top".
            Ok(None) | Err(_) => f64::INFINITY,
        }
    }

    fn has_open_dialog(&self) -> bool {
        self.query_bool(
            "dialogs",
            r#"document.querySelectorAll('[role="dialog"], .modal, .dialog, [aria-modal="true"]').length > 0"#,
        )
    }

    fn form_in_viewport(&self) -> bool {
        self.query_bool(
            "visible forms",
            r#"Array.from(document.querySelectorAll('form, [role="form"]')).some((form) => {
                const rect = form.getBoundingClientRect();
                return rect.top < window.innerHeight && rect.bottom > 0;
            })"#,
        )
    }

    fn has_auth_form_marker(&self) -> bool {
        self.query_bool(
            "form markers",
            r#"!!document.querySelector('#login-form, .login-form, #register-form, .register-form, #post-form, .post-form, [data-form-type="login"], [data-form-type="register"], [data-form-type="post"]')"#,
        )
    }

    fn body_text(&self) -> String {
        self.tab
            .eval_string("document.body ? document.body.innerText : ''")
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn dispatch(&self, event: AppEvent) -> anyhow::Result<()> {
        self.tab
            .eval(&format!("window.dispatchEvent(new Event('{}'));", event.name()))
    }

    fn render_indicator(&self, indicator: &Indicator) -> anyhow::Result<()> {
        let state = serde_json::to_string(indicator)?;
        self.tab.eval(&format!("({RENDER_INDICATOR_JS})({state});"))
    }

    fn touch_main(&self) -> anyhow::Result<()> {
        self.tab.eval(
            r#"(function() {
                const main = document.querySelector('main');
                if (!main) return;
                const marker = document.createElement('div');
                marker.style.display = 'none';
                marker.dataset.refreshTimestamp = String(Date.now());
                main.appendChild(marker);
                setTimeout(() => marker.remove(), 100);
            })()"#,
        )
    }

    fn reload(&self) -> anyhow::Result<()> {
        // Deferred so the evaluation returns before the context goes away.
        self.tab.eval("setTimeout(() => location.reload(), 0);")
    }
}

const RENDER_INDICATOR_JS: &str = r#"function(s) {
    let el = document.getElementById('app-refresh-indicator');
    if (!el) {
        el = document.createElement('div');
        el.id = 'app-refresh-indicator';
        el.style.cssText = 'position:fixed;top:0;left:0;right:0;height:60px;display:flex;' +
            'align-items:center;justify-content:center;background-color:rgba(0,0,0,0.1);' +
            'transform:translateY(-100%);transition:transform 0.2s;z-index:9999;';
        const spinner = document.createElement('div');
        spinner.className = 'refresh-spinner';
        spinner.style.cssText = 'width:24px;height:24px;border:2px solid rgba(255,255,255,0.3);' +
            'border-top-color:#fff;border-radius:50%;';
        const text = document.createElement('div');
        text.className = 'refresh-text';
        text.style.cssText = 'margin-left:12px;color:white;font-size:14px;font-weight:bold;';
        el.appendChild(spinner);
        el.appendChild(text);
        document.body.appendChild(el);
    }
    el.style.transform = s.visible ? 'translateY(' + s.offset_px + 'px)' : 'translateY(-100%)';
    el.querySelector('.refresh-text').textContent = s.text;
    if (el.__spin) {
        el.__spin.cancel();
        el.__spin = null;
    }
    if (s.spinning) {
        el.__spin = el.querySelector('.refresh-spinner').animate(
            [{ transform: 'rotate(0deg)' }, { transform: 'rotate(360deg)' }],
            { duration: 1000, iterations: Infinity }
        );
    }
}"#;

/// `localStorage` of the tab.
pub struct ChromeStorage {
    tab: PageTab,
}

impl ChromeStorage {
    pub fn new(tab: PageTab) -> Self {
        Self { tab }
    }
}

impl KeyValueStore for ChromeStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.tab
            .eval_string(&format!("localStorage.getItem('{}')", js_escape(key)))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.tab.eval(&format!(
            "localStorage.setItem('{}', '{}');",
            js_escape(key),
            js_escape(value)
        ))
    }
}

/// The page's own auth client, looked up under the configured globals on
/// every call so a client created after start-up is still found.
pub struct ChromeAuthClient {
    tab: PageTab,
    globals: Vec<String>,
}

impl ChromeAuthClient {
    pub fn new(tab: PageTab, globals: Vec<String>) -> Self {
        Self { tab, globals }
    }

    fn call(&self, method: &str) -> Result<SessionResponse, RefreshError> {
        let globals = serde_json::to_string(&self.globals)?;
        let js = format!(
            r#"(async function() {{
                const client = {globals}.map((name) => window[name]).find((c) => c && c.auth);
                if (!client) return JSON.stringify({{ __missing: true }});
                try {{
                    return JSON.stringify(await client.auth.{method}());
                }} catch (e) {{
                    return JSON.stringify({{ __thrown: String(e && e.message || e) }});
                }}
            }})()"#
        );

        let raw = self
            .tab
            .eval_async_string(&js)?
            .ok_or_else(|| RefreshError::malformed(format!("{method} returned undefined")))?;
        decode_auth_result(&raw)
    }
}

fn decode_auth_result(raw: &str) -> Result<SessionResponse, RefreshError> {
    let value: Value = serde_json::from_str(raw)?;
    if value.get("__missing").and_then(Value::as_bool) == Some(true) {
        return Err(RefreshError::ClientUnavailable);
    }
    if let Some(message) = value.get("__thrown").and_then(Value::as_str) {
        return Err(RefreshError::rejected(message));
    }
    SessionResponse::parse(value)
}

impl AuthClient for ChromeAuthClient {
    fn get_session(&self) -> Result<SessionResponse, RefreshError> {
        self.call("getSession")
    }

    fn refresh_session(&self) -> Result<SessionResponse, RefreshError> {
        self.call("refreshSession")
    }
}

/// `window.httpsDebug.restore()`, if the page exposes it.
pub struct ChromeRestoreHook {
    tab: PageTab,
}

impl ChromeRestoreHook {
    pub fn new(tab: PageTab) -> Self {
        Self { tab }
    }
}

impl RestoreHook for ChromeRestoreHook {
    fn restore(&self) -> anyhow::Result<bool> {
        let restored = self.tab.eval_async_string(
            r#"(async function() {
                const debug = window.httpsDebug;
                if (!debug || typeof debug.restore !== 'function') return 'false';
                return String(!!(await debug.restore()));
            })()"#,
        )?;
        Ok(restored.as_deref() == Some("true"))
    }
}
