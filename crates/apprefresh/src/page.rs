//! The host page as seen by the controllers.
//!
//! [`Page`] is everything the controllers read from or do to the DOM. Queries
//! are infallible: a host that cannot answer returns the conservative value
//! (for example "a form is visible") rather than an error. Mutations return a
//! result that callers log and otherwise ignore.

use serde::{Deserialize, Serialize};

/// The element that currently has focus, or the target of a focus event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusedElement {
    /// Upper-case tag name, as `Element.tagName` reports it.
    pub tag: String,
    #[serde(default)]
    pub content_editable: bool,
}

impl FocusedElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_uppercase(),
            content_editable: false,
        }
    }

    pub fn content_editable(tag: &str) -> Self {
        Self {
            content_editable: true,
            ..Self::new(tag)
        }
    }

    /// INPUT or TEXTAREA.
    pub fn is_text_input(&self) -> bool {
        matches!(self.tag.as_str(), "INPUT" | "TEXTAREA")
    }

    /// Any element the user can type into or pick a value from.
    pub fn is_editable(&self) -> bool {
        self.is_text_input() || self.tag == "SELECT" || self.content_editable
    }
}

/// The closest `a`, `button` or `[role="button"]` ancestor of a click target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavTarget {
    pub tag: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl NavTarget {
    pub fn link(href: &str, text: &str) -> Self {
        Self {
            tag: "A".to_string(),
            role: None,
            href: Some(href.to_string()),
            text: text.to_string(),
        }
    }

    pub fn button(text: &str) -> Self {
        Self {
            tag: "BUTTON".to_string(),
            role: None,
            href: None,
            text: text.to_string(),
        }
    }

    /// An anchor, a button or anything with `role="button"`.
    pub fn is_navigation_element(&self) -> bool {
        let tag = self.tag.to_ascii_uppercase();
        tag == "A" || tag == "BUTTON" || self.role.as_deref() == Some("button")
    }
}

/// The submitted form of a `submit` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormInfo {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
}

/// Zero-payload signals dispatched on `window` for the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppEvent {
    DataRefreshed,
    SessionRestored,
    AppRefresh,
    AppResume,
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::DataRefreshed => "app-data-refreshed",
            AppEvent::SessionRestored => "sessionrestored",
            AppEvent::AppRefresh => "apprefresh",
            AppEvent::AppResume => "appresume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorLabel {
    Pull,
    Release,
    Refreshing,
}

/// What the pull-to-refresh indicator should look like right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// False means retracted above the viewport.
    pub visible: bool,
    /// Downward translation in CSS pixels while visible.
    pub offset_px: f64,
    pub label: IndicatorLabel,
    pub text: String,
    pub spinning: bool,
}

impl Indicator {
    pub fn retracted(text: &str) -> Self {
        Self {
            visible: false,
            offset_px: 0.0,
            label: IndicatorLabel::Pull,
            text: text.to_string(),
            spinning: false,
        }
    }
}

pub trait Page: Send + Sync {
    /// `location.pathname`.
    fn path(&self) -> String;

    /// `document.activeElement`, unless it is the body.
    fn focused_element(&self) -> Option<FocusedElement>;

    /// `window.scrollY`.
    fn scroll_y(&self) -> f64;

    /// A dialog, modal or `aria-modal` element is present.
    fn has_open_dialog(&self) -> bool;

    /// Some `form` / `[role="form"]` intersects the viewport.
    fn form_in_viewport(&self) -> bool;

    /// A login, register or post form is marked up on the page.
    fn has_auth_form_marker(&self) -> bool;

    /// `document.body.innerText`.
    fn body_text(&self) -> String;

    fn dispatch(&self, event: AppEvent) -> anyhow::Result<()>;

    fn render_indicator(&self, indicator: &Indicator) -> anyhow::Result<()>;

    /// Appends a hidden marker to `main` and removes it 100 ms later.
    /// A page without `main` is left alone.
    fn touch_main(&self) -> anyhow::Result<()>;

    /// Full page reload; destroys all page state.
    fn reload(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focused_element_classification() {
        assert!(FocusedElement::new("input").is_text_input());
        assert!(FocusedElement::new("TEXTAREA").is_text_input());
        assert!(!FocusedElement::new("SELECT").is_text_input());
        assert!(FocusedElement::new("SELECT").is_editable());
        assert!(FocusedElement::content_editable("DIV").is_editable());
        assert!(!FocusedElement::new("DIV").is_editable());
    }

    #[test]
    fn test_nav_target_kinds() {
        assert!(NavTarget::link("/feed", "Feed").is_navigation_element());
        assert!(NavTarget::button("Go").is_navigation_element());
        let div = NavTarget {
            tag: "DIV".to_string(),
            role: Some("button".to_string()),
            ..NavTarget::default()
        };
        assert!(div.is_navigation_element());
        let span = NavTarget {
            tag: "SPAN".to_string(),
            ..NavTarget::default()
        };
        assert!(!span.is_navigation_element());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(AppEvent::DataRefreshed.name(), "app-data-refreshed");
        assert_eq!(AppEvent::SessionRestored.name(), "sessionrestored");
        assert_eq!(AppEvent::AppRefresh.name(), "apprefresh");
        assert_eq!(AppEvent::AppResume.name(), "appresume");
    }
}
