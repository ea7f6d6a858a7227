//! HTTP transport seam and the default `reqwest` implementation.
//!
//! DESIGN
//! ======
//! The interceptor only needs "send this request, give me a status and a
//! JSON body", so that is all `Transport` promises. HTTP error statuses are
//! returned as `Ok(ApiResponse)`; only failures with no response at all
//! become `Err`. The default transport keeps cookies in memory, which is
//! where the server-issued session lives.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::AuthError;

// =============================================================================
// REQUEST
// =============================================================================

/// Interception state carried by value with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryState {
    /// Never sent through a refresh cycle; a 401 may trigger one.
    #[default]
    Fresh,
    /// Already replayed after a refresh; a second 401 is final.
    Retried,
    /// Never intercepted (the refresh and teardown calls themselves).
    Exempt,
}

impl RetryState {
    #[must_use]
    pub fn allows_refresh(self) -> bool {
        self == Self::Fresh
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL, starting with `/`.
    pub path: String,
    pub body: Option<Value>,
    pub retry: RetryState,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, retry: RetryState::Fresh }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Mark the request as never eligible for refresh-and-retry.
    #[must_use]
    pub fn exempt(mut self) -> Self {
        self.retry = RetryState::Exempt;
        self
    }

    /// Consume the request and return the copy used for the single replay.
    #[must_use]
    pub fn into_retry(mut self) -> Self {
        self.retry = RetryState::Retried;
        self
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Decoded JSON body; `Null` when empty or not JSON.
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Success body, or the normalised rejection.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Rejected` for any non-2xx status.
    pub fn into_result(self) -> Result<Value, AuthError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(AuthError::rejected(self.status, &self.body))
        }
    }
}

/// Decode a response body leniently: empty or malformed JSON becomes `Null`.
#[must_use]
pub fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or(Value::Null)
}

// =============================================================================
// TRANSPORT TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` when no HTTP response was received.
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, AuthError>;
}

// =============================================================================
// REQWEST TRANSPORT
// =============================================================================

/// `reqwest`-backed transport with an in-memory cookie jar.
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::Transport(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, AuthError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        tracing::debug!(method = %request.method, path = %request.path, status, "api response");
        Ok(ApiResponse::new(status, decode_body(&text)))
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
