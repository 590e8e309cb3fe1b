use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Platform-relative path from the home directory to the apprefresh data directory.
#[cfg(target_os = "linux")]
const DATA_SUBPATH: &str = ".local/share/apprefresh";

#[cfg(target_os = "macos")]
const DATA_SUBPATH: &str = "Library/Application Support/apprefresh";

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const DATA_SUBPATH: &str = "AppData/Roaming/apprefresh";

/// Returns a platform-appropriate data directory for the Chrome profile and
/// the saved configuration.
///
/// - **Linux:** `~/.local/share/apprefresh`
/// - **macOS:** `~/Library/Application Support/apprefresh`
/// - **Windows:** `%USERPROFILE%\AppData\Roaming\apprefresh`
///
/// Creates the directory if it does not already exist.
pub fn get_user_data_dir() -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let home_dir = env::var("HOME").or_else(|_| env::var("USERPROFILE"))?;
    let user_data_dir = PathBuf::from(&home_dir).join(DATA_SUBPATH);

    if !user_data_dir.exists() {
        std::fs::create_dir_all(&user_data_dir)?;
        log::info!("User data directory created at: {:?}", user_data_dir);
    }

    Ok(user_data_dir)
}

/// Chrome profile directory inside the user data directory.
pub fn get_profile_dir() -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    Ok(get_user_data_dir()?.join("chrome-profile"))
}

/// Deletes the Chrome profile, leaving config and stored logs alone.
pub fn wipe_profile_dir() -> Result<(), Box<dyn Error + Send + Sync>> {
    let path = get_profile_dir()?;
    if path.exists() {
        std::fs::remove_dir_all(&path)?;
        log::info!("Wiped profile directory: {:?}", path);
    }
    Ok(())
}

/// Escapes JavaScript strings to prevent injection.
pub fn js_escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Case-sensitive "contains any of" helper used by the page heuristics.
pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_js_escape_quotes_and_backslashes() {
        assert_eq!(js_escape(r"a'b\c"), r"a\'b\\c");
        assert_eq!(js_escape("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_contains_any() {
        assert!(contains_any("/user/login", &["/login", "/register"]));
        assert!(!contains_any("/feed", &["/login", "/register"]));
        assert!(!contains_any("/LOGIN", &["/login"]));
    }
}
