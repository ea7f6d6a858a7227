//! Error taxonomy shared by the store, the interceptor and transports.
//!
//! DESIGN
//! ======
//! One refresh failure is handed to every request waiting on it, so
//! `AuthError` is `Clone` and carries only owned strings. Transport-level
//! failures are flattened to text at the boundary instead of wrapping
//! `reqwest::Error`.

use serde_json::Value;

/// Fallback shown when the server gives no usable `message`.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred, please try again later";

/// Validation message for a sign-up whose passwords differ.
pub const PASSWORD_MISMATCH_MESSAGE: &str = "Passwords do not match";

/// Notice text emitted when a refresh fails and the session is torn down.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

/// HTTP status the interceptor treats as an expired credential.
pub const UNAUTHORIZED: u16 = 401;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by session operations and API calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Input rejected locally; no request was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server answered with a non-success status.
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The request never produced an HTTP response.
    #[error("transport failed: {0}")]
    Transport(String),

    /// A success response did not have the expected shape.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// The background refresh task panicked or was cancelled.
    #[error("credential refresh aborted: {0}")]
    RefreshAborted(String),

    /// The session store behind the interceptor has been dropped.
    #[error("session store is closed")]
    StoreClosed,
}

impl AuthError {
    /// Build a `Rejected` error from a failed response body.
    #[must_use]
    pub fn rejected(status: u16, body: &Value) -> Self {
        let message = server_message(body).unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_owned());
        Self::Rejected { status, message }
    }

    /// HTTP status, when the server produced one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `true` for the one failure class the interceptor handles.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(UNAUTHORIZED)
    }

    /// Text suitable for an end-user notification.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::Validation(message) | Self::Rejected { message, .. } => message,
            _ => GENERIC_ERROR_MESSAGE,
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Rejected { .. } => "E_REJECTED",
            Self::Transport(_) => "E_TRANSPORT",
            Self::Decode(_) => "E_DECODE",
            Self::RefreshAborted(_) => "E_REFRESH_ABORTED",
            Self::StoreClosed => "E_STORE_CLOSED",
        }
    }
}

/// Pull a non-blank `message` string out of an error body.
#[must_use]
pub fn server_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
