/// High-level error category, used to decide whether a failure counts
/// towards the forced-reload threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The auth client could not be reached or answered badly.
    Session,
    /// The host page (DOM bridge, storage) misbehaved.
    Host,
}

/// Failures that can occur while talking to the auth client or the host page.
///
/// None of these ever escapes a gate, gesture or bootstrap operation: they are
/// logged, optionally counted, and turned into a `false` result.
#[derive(Debug, Clone)]
pub enum RefreshError {
    /// No auth client was injected or the page does not expose one.
    ClientUnavailable,
    /// The auth call returned something that is not `{ data, error }`.
    MalformedResponse {
        message: String,
    },
    /// The auth call itself failed or reported an error.
    Rejected {
        message: String,
    },
    /// The host page could not be queried or mutated.
    Host {
        message: String,
    },
}

impl RefreshError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RefreshError::ClientUnavailable
            | RefreshError::MalformedResponse { .. }
            | RefreshError::Rejected { .. } => ErrorCategory::Session,
            RefreshError::Host { .. } => ErrorCategory::Host,
        }
    }

    /// Returns true if this failure should bump `failed_attempts`.
    pub fn is_counted_failure(&self) -> bool {
        self.category() == ErrorCategory::Session
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        RefreshError::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        RefreshError::Rejected {
            message: message.into(),
        }
    }

    /// Returns the one-line message written to the diagnostic log.
    pub fn user_message(&self) -> String {
        match self {
            RefreshError::ClientUnavailable => {
                "Auth client unavailable, cannot refresh session".to_string()
            }
            RefreshError::MalformedResponse { message } => {
                format!("Session call returned an invalid result: {}", message)
            }
            RefreshError::Rejected { message } => format!("Session call failed: {}", message),
            RefreshError::Host { message } => format!("Host page error: {}", message),
        }
    }
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for RefreshError {}

impl From<anyhow::Error> for RefreshError {
    fn from(err: anyhow::Error) -> Self {
        RefreshError::Host {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RefreshError {
    fn from(err: serde_json::Error) -> Self {
        RefreshError::malformed(err.to_string())
    }
}
