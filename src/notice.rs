//! User-facing notifications emitted by session operations.
//!
//! The store publishes these on a `tokio::sync::broadcast` channel; how they
//! are rendered (toast, status line, log) is up to the subscriber.

use crate::error::SESSION_EXPIRED_MESSAGE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
    /// A refresh failed and the session was torn down.
    SessionExpired,
}

impl Notice {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Success(message) | Self::Error(message) => message,
            Self::SessionExpired => SESSION_EXPIRED_MESSAGE,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Success(_))
    }
}

#[cfg(test)]
#[path = "notice_test.rs"]
mod tests;
