//! Wires the controllers together for one page and routes DOM events to them.

use crate::auth::{AuthClient, LoopGuard, RestoreHook};
use crate::config::ShellConfig;
use crate::environment::{is_app_environment, DetectionVariant, EnvironmentSignals};
use crate::gate::RefreshGate;
use crate::gesture::{PullGesture, RefreshEntry};
use crate::host::Host;
use crate::page::{FocusedElement, FormInfo, NavTarget};
use crate::scheduler::TimerHandle;
use crate::session::SessionBootstrapper;
use crate::storage::RefreshLog;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A DOM event as reported by the host page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    /// `window` load.
    Load,
    /// `DOMContentLoaded`, or the page was already parsed when we attached.
    DomReady,
    Visibility {
        visible: bool,
    },
    Click {
        #[serde(default)]
        target: Option<NavTarget>,
    },
    Submit {
        form: FormInfo,
    },
    FocusIn {
        element: FocusedElement,
    },
    FocusOut {
        #[serde(default)]
        next: Option<FocusedElement>,
    },
    TouchStart {
        y: f64,
    },
    TouchMove {
        y: f64,
    },
    TouchEnd,
    TouchCancel,
    /// The path changed without a full load.
    Navigated {
        path: String,
    },
    /// Scroll or keypress.
    Activity,
}

/// Collaborators that may or may not exist on a given page.
#[derive(Default, Clone)]
pub struct Integrations {
    pub auth: Option<Arc<dyn AuthClient>>,
    pub restore_hook: Option<Arc<dyn RestoreHook>>,
}

pub struct AppShell {
    gate: Option<Arc<RefreshGate>>,
    gesture: Option<Arc<PullGesture>>,
    session: Option<Arc<SessionBootstrapper>>,
    guard: Option<Arc<LoopGuard>>,
    timers: Mutex<Vec<TimerHandle>>,
}

impl AppShell {
    /// Builds the controllers that apply to `signals`. Outside an app
    /// environment nothing is built and every event is ignored.
    pub fn new(
        config: ShellConfig,
        host: &Host,
        signals: &EnvironmentSignals,
        integrations: Integrations,
    ) -> Self {
        let in_app = is_app_environment(signals, DetectionVariant::UserAgent);
        let bootstrap = is_app_environment(signals, DetectionVariant::SessionBootstrap);

        let guard = integrations
            .auth
            .map(|client| Arc::new(LoopGuard::new(client, config.session.loop_guard_limit)));

        let gate = in_app.then(|| {
            let log = RefreshLog::new(
                Arc::clone(&host.store),
                Arc::clone(&host.clock),
                config.log_key.clone(),
                config.log_capacity,
            );
            let gate = RefreshGate::new(
                config.gate.clone(),
                host,
                guard.clone().map(|g| g as Arc<dyn AuthClient>),
                log,
            );
            gate.install();
            gate
        });

        let gesture = in_app.then(|| {
            let entry = gate.clone().map(|g| g as Arc<dyn RefreshEntry>);
            PullGesture::new(config.gesture.clone(), host, entry)
        });

        let session = bootstrap.then(|| {
            SessionBootstrapper::new(
                config.session.clone(),
                host,
                guard.clone(),
                integrations.restore_hook.clone(),
            )
        });

        if !in_app && !bootstrap {
            log::info!("Not running inside the app shell, controllers disabled");
        }

        Self {
            gate,
            gesture,
            session,
            guard,
            timers: Mutex::new(Vec::new()),
        }
    }

    pub fn gate(&self) -> Option<&Arc<RefreshGate>> {
        self.gate.as_ref()
    }

    pub fn gesture(&self) -> Option<&Arc<PullGesture>> {
        self.gesture.as_ref()
    }

    pub fn session(&self) -> Option<&Arc<SessionBootstrapper>> {
        self.session.as_ref()
    }

    pub fn loop_guard(&self) -> Option<&Arc<LoopGuard>> {
        self.guard.as_ref()
    }

    /// Routes one event. Returns true when the host should cancel the
    /// event's default action.
    pub fn handle(&self, event: &PageEvent) -> bool {
        log::trace!("Page event: {:?}", event);

        match event {
            PageEvent::Load => {
                if let Some(gate) = &self.gate {
                    gate.on_page_load();
                }
            }
            PageEvent::DomReady => {
                if let Some(gesture) = &self.gesture {
                    let handle = gesture.install();
                    self.timers
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(handle);
                }
                if let Some(session) = &self.session {
                    session.initialize();
                }
            }
            PageEvent::Visibility { visible } => {
                if let Some(gate) = &self.gate {
                    gate.on_visibility_change(*visible);
                }
                if let Some(session) = &self.session {
                    session.on_visibility_change(*visible);
                }
            }
            PageEvent::Click { target } => {
                if let Some(gate) = &self.gate {
                    gate.on_click(target.as_ref());
                }
                self.record_activity();
            }
            PageEvent::Submit { form } => {
                if let Some(gate) = &self.gate {
                    gate.on_submit(form);
                }
            }
            PageEvent::FocusIn { element } => {
                if let Some(gate) = &self.gate {
                    gate.on_focus_in(element);
                }
                if let Some(gesture) = &self.gesture {
                    gesture.focus_in(element);
                }
            }
            PageEvent::FocusOut { next } => {
                if let Some(gesture) = &self.gesture {
                    gesture.focus_out(next.as_ref());
                }
            }
            PageEvent::TouchStart { y } => {
                if let Some(gesture) = &self.gesture {
                    gesture.touch_start(*y);
                }
                self.record_activity();
            }
            PageEvent::TouchMove { y } => {
                return self
                    .gesture
                    .as_ref()
                    .is_some_and(|gesture| gesture.touch_move(*y));
            }
            PageEvent::TouchEnd => {
                if let Some(gesture) = &self.gesture {
                    gesture.touch_end();
                }
            }
            PageEvent::TouchCancel => {
                if let Some(gesture) = &self.gesture {
                    gesture.touch_cancel();
                }
            }
            PageEvent::Navigated { path } => {
                if let Some(gesture) = &self.gesture {
                    gesture.on_navigate(path);
                }
            }
            PageEvent::Activity => self.record_activity(),
        }
        false
    }

    fn record_activity(&self) {
        if let Some(session) = &self.session {
            session.record_activity();
        }
    }

    pub fn shutdown(&self) {
        for timer in self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            timer.cancel();
        }
        if let Some(gate) = &self.gate {
            gate.shutdown();
        }
        if let Some(session) = &self.session {
            session.shutdown();
        }
    }
}
