//! Tunables for the three controllers.
//!
//! Every field has a default matching the behavior the shell scripts shipped
//! with; a JSON file only needs to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum spacing between two non-forced refreshes.
    pub min_refresh_interval_ms: u64,
    pub initial_refresh_delay_ms: u64,
    pub visibility_refresh_after_ms: u64,
    pub auto_refresh_interval_ms: u64,
    pub failure_check_interval_ms: u64,
    pub max_failed_attempts: u32,
    /// Suppression after a critical click/submit or on a critical page.
    pub critical_pause_ms: u64,
    /// Suppression after an ordinary navigation click.
    pub navigation_pause_ms: u64,
    /// How long `is_navigating` stays set after a navigation click.
    pub navigation_window_ms: u64,
    /// Suppression after focusing a text input.
    pub input_focus_pause_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval_ms: 30_000,
            initial_refresh_delay_ms: 5_000,
            visibility_refresh_after_ms: 120_000,
            auto_refresh_interval_ms: 1_200_000,
            failure_check_interval_ms: 300_000,
            max_failed_attempts: 3,
            critical_pause_ms: 300_000,
            navigation_pause_ms: 120_000,
            navigation_window_ms: 20_000,
            input_focus_pause_ms: 300_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GestureConfig {
    /// Raw pull distance that triggers a refresh on release.
    pub refresh_distance_px: f64,
    pub max_pull_distance_px: f64,
    /// Touch start is ignored when the page is scrolled further than this.
    pub start_scroll_tolerance_px: f64,
    /// Pulls only count while the page is within this distance of the top.
    pub top_scroll_tolerance_px: f64,
    /// Pulls at or below this distance cancel the drag.
    pub min_pull_px: f64,
    /// The indicator appears once the raw pull exceeds this distance.
    pub indicator_reveal_px: f64,
    pub damping_exponent: f64,
    pub refresh_pause_ms: u64,
    pub reload_fallback_delay_ms: u64,
    pub retract_delay_ms: u64,
    pub init_delay_ms: u64,
    pub pull_label: String,
    pub release_label: String,
    pub refreshing_label: String,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            refresh_distance_px: 150.0,
            max_pull_distance_px: 200.0,
            start_scroll_tolerance_px: 10.0,
            top_scroll_tolerance_px: 5.0,
            min_pull_px: 10.0,
            indicator_reveal_px: 20.0,
            damping_exponent: 0.8,
            refresh_pause_ms: 30_000,
            reload_fallback_delay_ms: 1_000,
            retract_delay_ms: 500,
            init_delay_ms: 500,
            pull_label: "Pull to refresh".to_string(),
            release_label: "Release to refresh".to_string(),
            refreshing_label: "Refreshing...".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub restore_delay_ms: u64,
    pub periodic_check_interval_ms: u64,
    /// The periodic check only refreshes when the last refresh is older than this.
    pub periodic_refresh_after_ms: u64,
    pub visibility_refresh_after_ms: u64,
    /// `get_session` calls tolerated before the loop guard trips.
    pub loop_guard_limit: u32,
    /// Storage keys whose presence means a session can be restored.
    pub session_keys: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restore_delay_ms: 1_000,
            periodic_check_interval_ms: 300_000,
            periodic_refresh_after_ms: 600_000,
            visibility_refresh_after_ms: 120_000,
            loop_guard_limit: 10,
            session_keys: [
                "sb-session",
                "sb-https-session",
                "sb-auth-token",
                "sb-https-auth-token",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Global names probed for the auth client inside the page.
    pub client_globals: Vec<String>,
    pub log_key: String,
    pub log_capacity: usize,
    pub gate: GateConfig,
    pub gesture: GestureConfig,
    pub session: SessionConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            client_globals: vec!["supabase".to_string(), "SUPABASE".to_string()],
            log_key: "app-refresh-logs".to_string(),
            log_capacity: 50,
            gate: GateConfig::default(),
            gesture: GestureConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ShellConfig {
    /// Default location: `<user data dir>/config.json`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let dir = crate::utils::get_user_data_dir().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(dir.join("config.json"))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Loads `path` if it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load_from(path) {
                Ok(config) => return config,
                Err(e) => log::warn!("Ignoring unreadable config {:?}: {}", path, e),
            }
        }
        Self::default()
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub(crate) fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ShellConfig =
            serde_json::from_str(r#"{ "gate": { "max_failed_attempts": 5 } }"#).unwrap();
        assert_eq!(config.gate.max_failed_attempts, 5);
        assert_eq!(config.gate.min_refresh_interval_ms, 30_000);
        assert_eq!(config.gesture.refresh_distance_px, 150.0);
        assert_eq!(config.log_capacity, 50);
        assert_eq!(config.session.session_keys.len(), 4);
    }

    #[test]
    fn test_save_and_load_roundtrip_through_file() {
        let path = std::env::temp_dir().join(format!(
            "apprefresh-config-test-{}.json",
            std::process::id()
        ));
        let mut config = ShellConfig::default();
        config.gesture.pull_label = "Ziehen".to_string();
        config.save_to(&path).unwrap();

        let loaded = ShellConfig::load_or_default(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let path = std::env::temp_dir().join("apprefresh-config-does-not-exist.json");
        assert_eq!(ShellConfig::load_or_default(&path), ShellConfig::default());
    }
}
