//! Persistent key/value storage and the rolling diagnostic log kept in it.

use crate::clock::Clock;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// String-keyed storage with `localStorage` semantics.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore(Mutex<HashMap<String, String>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let map = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut map = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Success,
    Warn,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Info => "INFO",
            LogKind::Success => "SUCCESS",
            LogKind::Warn => "WARN",
            LogKind::Error => "ERROR",
        }
    }

    fn level(&self) -> log::Level {
        match self {
            LogKind::Info | LogKind::Success => log::Level::Info,
            LogKind::Warn => log::Level::Warn,
            LogKind::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO-8601, millisecond precision, UTC.
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Newest-first log of refresh decisions, capped at `capacity` entries and
/// persisted as one JSON array under a single key.
#[derive(Clone)]
pub struct RefreshLog {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    capacity: usize,
    lock: Arc<Mutex<()>>,
}

impl RefreshLog {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            capacity,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn record(&self, kind: LogKind, message: impl AsRef<str>) {
        let message = message.as_ref();
        if message.is_empty() {
            return;
        }

        let time = iso_timestamp(self.clock.now_ms());
        log::log!(kind.level(), "[{}] {}: {}", time, kind.as_str(), message);

        let Ok(_guard) = self.lock.lock() else { return };
        let mut entries = self.entries();
        entries.insert(
            0,
            LogEntry {
                time,
                kind: kind.as_str().to_string(),
                message: message.to_string(),
            },
        );
        entries.truncate(self.capacity);

        // Storage errors never reach the caller.
        match serde_json::to_string(&entries) {
            Ok(json) => {
                if let Err(e) = self.store.set(&self.key, &json) {
                    log::debug!("Failed to persist refresh log: {}", e);
                }
            }
            Err(e) => log::debug!("Failed to encode refresh log: {}", e),
        }
    }

    /// Stored entries, newest first. Unreadable content reads as empty.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.store
            .get(&self.key)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

pub(crate) fn iso_timestamp(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn log_with(store: Arc<dyn KeyValueStore>) -> (RefreshLog, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let log = RefreshLog::new(store, Arc::new(clock.clone()), "app-refresh-logs", 50);
        (log, clock)
    }

    #[test]
    fn test_iso_timestamp_matches_js_format() {
        assert_eq!(iso_timestamp(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso_timestamp(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_log_is_capped_and_newest_first() {
        let (log, clock) = log_with(Arc::new(MemoryStore::new()));
        for i in 0..100 {
            log.record(LogKind::Info, format!("event {}", i));
            clock.advance(std::time::Duration::from_millis(1));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].message, "event 99");
        assert_eq!(entries[49].message, "event 50");
        assert!(entries[0].time > entries[49].time);
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let (log, _) = log_with(Arc::new(MemoryStore::new()));
        log.record(LogKind::Warn, "");
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_stored_json_uses_type_field() {
        let store = Arc::new(MemoryStore::new());
        let (log, _) = log_with(store.clone());
        log.record(LogKind::Success, "session ok");
        let raw = store.get("app-refresh-logs").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["type"], "SUCCESS");
        assert_eq!(value[0]["message"], "session ok");
        assert_eq!(value[0]["time"], "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_corrupt_storage_reads_as_empty_and_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        store.set("app-refresh-logs", "not json").unwrap();
        let (log, _) = log_with(store);
        assert!(log.entries().is_empty());
        log.record(LogKind::Info, "fresh");
        assert_eq!(log.entries().len(), 1);
    }
}
