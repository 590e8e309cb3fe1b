//! Contract of the external auth client, plus the call-counting guard that
//! stops runaway `get_session` loops.

use crate::error::RefreshError;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionUser {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub user: Option<SessionUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthApiError {
    #[serde(default)]
    pub message: String,
}

/// `{ data: { session? }, error? }` as returned by `getSession` / `refreshSession`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionResponse {
    #[serde(default)]
    pub data: Option<SessionData>,
    #[serde(default)]
    pub error: Option<AuthApiError>,
}

impl SessionResponse {
    /// `{ data: { session: null }, error: null }`.
    pub fn empty() -> Self {
        Self {
            data: Some(SessionData { session: None }),
            error: None,
        }
    }

    pub fn with_user(id: &str) -> Self {
        Self {
            data: Some(SessionData {
                session: Some(Session {
                    user: Some(SessionUser { id: id.to_string() }),
                }),
            }),
            error: None,
        }
    }

    pub fn with_error(message: &str) -> Self {
        Self {
            data: None,
            error: Some(AuthApiError {
                message: message.to_string(),
            }),
        }
    }

    /// Parses a raw JSON result, rejecting anything that is not an object.
    pub fn parse(value: Value) -> Result<Self, RefreshError> {
        if !value.is_object() {
            return Err(RefreshError::malformed(format!(
                "expected an object, got {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn session(&self) -> Option<&Session> {
        self.data.as_ref().and_then(|d| d.session.as_ref())
    }

    pub fn has_session(&self) -> bool {
        self.session().is_some()
    }

    /// The signed-in user's id, if the session carries a non-empty one.
    pub fn user_id(&self) -> Option<&str> {
        self.session()
            .and_then(|s| s.user.as_ref())
            .map(|u| u.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Turns an `error` field into a rejection.
    pub fn into_result(self) -> Result<Self, RefreshError> {
        match self.error {
            Some(err) => Err(RefreshError::rejected(if err.message.is_empty() {
                "unknown auth error".to_string()
            } else {
                err.message
            })),
            None => Ok(self),
        }
    }
}

pub trait AuthClient: Send + Sync {
    fn get_session(&self) -> Result<SessionResponse, RefreshError>;
    fn refresh_session(&self) -> Result<SessionResponse, RefreshError>;
}

/// An external restore helper the page may expose (`httpsDebug.restore`).
pub trait RestoreHook: Send + Sync {
    fn restore(&self) -> anyhow::Result<bool>;
}

/// Wraps an [`AuthClient`] and counts `get_session` calls once armed. The call
/// after `limit` consecutive ones returns an empty session instead of reaching
/// the client, and the count starts over.
pub struct LoopGuard {
    inner: Arc<dyn AuthClient>,
    limit: u32,
    armed: AtomicBool,
    calls: AtomicU32,
    trips: AtomicU32,
}

impl LoopGuard {
    pub fn new(inner: Arc<dyn AuthClient>, limit: u32) -> Self {
        Self {
            inner,
            limit,
            armed: AtomicBool::new(false),
            calls: AtomicU32::new(0),
            trips: AtomicU32::new(0),
        }
    }

    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            log::debug!("Session loop guard armed (limit {})", self.limit);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Calls counted since the last reset or trip.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// How many times the guard has short-circuited a call.
    pub fn trips(&self) -> u32 {
        self.trips.load(Ordering::SeqCst)
    }
}

impl AuthClient for LoopGuard {
    fn get_session(&self) -> Result<SessionResponse, RefreshError> {
        if self.is_armed() {
            let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if count > self.limit {
                log::warn!(
                    "Possible session check loop: {} getSession calls, returning an empty session",
                    count
                );
                self.calls.store(0, Ordering::SeqCst);
                self.trips.fetch_add(1, Ordering::SeqCst);
                return Ok(SessionResponse::empty());
            }
        }
        self.inner.get_session()
    }

    fn refresh_session(&self) -> Result<SessionResponse, RefreshError> {
        self.inner.refresh_session()
    }
}
