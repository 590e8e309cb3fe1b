//! Decides whether the page is running inside a mobile/app wrapper.
//!
//! Each controller evaluates this once when it is built and stays inert for
//! the life of the page when it returns false.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static MOBILE_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini")
        .expect("static regex")
});

/// Raw signals read from the page at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSignals {
    pub user_agent: String,
    /// `location.protocol`, including the trailing colon (e.g. `"https:"`).
    pub protocol: String,
    /// Whether the wrapper injected its global bridge object (`window.Capacitor`).
    pub wrapper_global_present: bool,
}

impl EnvironmentSignals {
    pub fn from_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            protocol: "https:".to_string(),
            wrapper_global_present: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionVariant {
    /// User-agent checks only (refresh gate, pull gesture).
    UserAgent,
    /// Also accepts `file:` loads and an injected wrapper global.
    SessionBootstrap,
}

pub fn is_app_environment(signals: &EnvironmentSignals, variant: DetectionVariant) -> bool {
    let ua = signals.user_agent.as_str();
    let ua_match =
        ua.contains("capacitor") || ua.contains("android") || MOBILE_UA.is_match(ua);

    match variant {
        DetectionVariant::UserAgent => ua_match,
        DetectionVariant::SessionBootstrap => {
            ua_match || signals.protocol == "file:" || signals.wrapper_global_present
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ua(s: &str) -> EnvironmentSignals {
        EnvironmentSignals::from_user_agent(s)
    }

    #[test]
    fn test_android_user_agent_is_app() {
        let signals = ua("Mozilla/5.0 (Linux; Android 10)");
        assert!(is_app_environment(&signals, DetectionVariant::UserAgent));
        assert!(is_app_environment(&signals, DetectionVariant::SessionBootstrap));
    }

    #[test]
    fn test_lowercase_markers_match() {
        assert!(is_app_environment(&ua("MyShell capacitor/5"), DetectionVariant::UserAgent));
        assert!(is_app_environment(&ua("custom android webview"), DetectionVariant::UserAgent));
    }

    #[test]
    fn test_regex_is_case_insensitive() {
        assert!(is_app_environment(&ua("Mozilla/5.0 (IPHONE; CPU OS 17)"), DetectionVariant::UserAgent));
        assert!(is_app_environment(&ua("Opera Mini/8"), DetectionVariant::UserAgent));
    }

    #[test]
    fn test_desktop_is_not_app() {
        let signals = ua("Mozilla/5.0 (X11; Linux x86_64) Chrome/120");
        assert!(!is_app_environment(&signals, DetectionVariant::UserAgent));
        assert!(!is_app_environment(&signals, DetectionVariant::SessionBootstrap));
    }

    #[test]
    fn test_bootstrap_variant_accepts_file_protocol_and_wrapper_global() {
        let mut signals = ua("Mozilla/5.0 (X11; Linux x86_64)");
        signals.protocol = "file:".to_string();
        assert!(!is_app_environment(&signals, DetectionVariant::UserAgent));
        assert!(is_app_environment(&signals, DetectionVariant::SessionBootstrap));

        let mut signals = ua("Mozilla/5.0 (X11; Linux x86_64)");
        signals.wrapper_global_present = true;
        assert!(is_app_environment(&signals, DetectionVariant::SessionBootstrap));
    }
}
