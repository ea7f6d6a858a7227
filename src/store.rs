//! Session state store.
//!
//! DESIGN
//! ======
//! `SessionStore` owns the current identity plus two in-flight flags and
//! publishes them as a `SessionSnapshot` on a `watch` channel, so a UI can
//! re-render on change. Every operation goes through the store's own
//! `ApiClient`, which holds a weak handle back to the store as its
//! `TokenRefresher`; the store is therefore always built inside an `Arc`.
//!
//! Flags are reset by drop guards, so a cancelled operation cannot leave
//! `loading` or `checking_auth` stuck on.
//!
//! `checking_auth` gates both the passive profile check and the active
//! refresh: a refresh requested while a profile check is running returns
//! without calling the server.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AuthError, PASSWORD_MISMATCH_MESSAGE};
use crate::interceptor::{ApiClient, TokenRefresher};
use crate::notice::Notice;
use crate::transport::{ApiRequest, ReqwestTransport, Transport};

pub const SIGNUP_PATH: &str = "/auth/signup";
pub const LOGIN_PATH: &str = "/auth/login";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const PROFILE_PATH: &str = "/auth/profile";
pub const REFRESH_PATH: &str = "/auth/refresh-token";

const NOTICE_CAPACITY: usize = 64;

// =============================================================================
// STATE
// =============================================================================

/// Authenticated identity. Only presence matters to this crate; `name` and
/// `email` are decoded for display and everything else is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub loading: bool,
    pub checking_auth: bool,
}

/// Sign-up form as submitted by the user.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: Option<User>,
}

fn decode_user(body: Value) -> Result<User, AuthError> {
    let envelope: UserEnvelope = serde_json::from_value(body).map_err(|e| AuthError::Decode(e.to_string()))?;
    envelope
        .user
        .ok_or_else(|| AuthError::Decode("response has no user".into()))
}

// =============================================================================
// FLAG GUARD
// =============================================================================

#[derive(Clone, Copy)]
enum Flag {
    Loading,
    CheckingAuth,
}

impl Flag {
    fn set(self, snapshot: &mut SessionSnapshot, value: bool) {
        match self {
            Self::Loading => snapshot.loading = value,
            Self::CheckingAuth => snapshot.checking_auth = value,
        }
    }
}

/// Clears a flag when dropped.
struct FlagGuard<'a> {
    state: &'a watch::Sender<SessionSnapshot>,
    flag: Flag,
}

impl<'a> FlagGuard<'a> {
    fn raise(state: &'a watch::Sender<SessionSnapshot>, flag: Flag) -> Self {
        state.send_modify(|s| flag.set(s, true));
        Self { state, flag }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        let flag = self.flag;
        self.state.send_if_modified(|s| {
            let was_set = match flag {
                Flag::Loading => s.loading,
                Flag::CheckingAuth => s.checking_auth,
            };
            flag.set(s, false);
            was_set
        });
    }
}

// =============================================================================
// STORE
// =============================================================================

pub struct SessionStore {
    client: ApiClient,
    state: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl SessionStore {
    /// Build a store whose requests go through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let refresher: Weak<dyn TokenRefresher> = weak.clone();
            let (state, _) = watch::channel(SessionSnapshot::default());
            let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
            Self { client: ApiClient::new(transport, refresher), state, notices }
        })
    }

    /// Build a store backed by the default `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Arc<Self>, AuthError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Client for application requests; shares this store's refresh cycle.
    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().user.is_some()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn set_user(&self, user: Option<User>) {
        self.state.send_modify(|s| s.user = user);
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Register a new account and start a session.
    ///
    /// # Errors
    ///
    /// `AuthError::Validation` without any request when the passwords differ;
    /// otherwise the server's rejection or a transport failure.
    pub async fn sign_up(&self, form: SignUp) -> Result<User, AuthError> {
        let _loading = FlagGuard::raise(&self.state, Flag::Loading);

        if form.password != form.confirm_password {
            let err = AuthError::Validation(PASSWORD_MISMATCH_MESSAGE.into());
            self.notify(Notice::Error(err.user_message().to_owned()));
            return Err(err);
        }

        let body = json!({ "name": form.name, "email": form.email, "password": form.password });
        let result = self.client.send(ApiRequest::post(SIGNUP_PATH).json(body)).await;
        self.finish_sign_in(result, "Signup successful!")
    }

    /// # Errors
    ///
    /// Returns the server's rejection or a transport failure.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let _loading = FlagGuard::raise(&self.state, Flag::Loading);

        let body = json!({ "email": email, "password": password });
        let result = self.client.send(ApiRequest::post(LOGIN_PATH).json(body)).await;
        self.finish_sign_in(result, "Login successful!")
    }

    fn finish_sign_in(&self, result: Result<Value, AuthError>, success: &str) -> Result<User, AuthError> {
        match result.and_then(decode_user) {
            Ok(user) => {
                info!(email = user.email.as_deref().unwrap_or(""), "session started");
                self.set_user(Some(user.clone()));
                self.notify(Notice::Success(success.to_owned()));
                Ok(user)
            }
            Err(err) => {
                debug!(error = %err, "sign-in failed");
                self.notify(Notice::Error(err.user_message().to_owned()));
                Err(err)
            }
        }
    }

    /// End the session. The local session is cleared whatever the server says.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or a transport failure; the session is
    /// already cleared when this happens.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _loading = FlagGuard::raise(&self.state, Flag::Loading);

        let result = self.client.send(ApiRequest::post(LOGOUT_PATH)).await;
        self.set_user(None);

        match result {
            Ok(_) => {
                info!("session ended");
                self.notify(Notice::Success("Logout successful!".into()));
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "logout call failed, local session cleared");
                self.notify(Notice::Error(err.user_message().to_owned()));
                Err(err)
            }
        }
    }

    /// Probe the profile endpoint. Failures leave the store logged out and are
    /// not reported.
    pub async fn check_auth(&self) -> Option<User> {
        let _loading = FlagGuard::raise(&self.state, Flag::Loading);
        let _checking = FlagGuard::raise(&self.state, Flag::CheckingAuth);

        let result = self.client.send(ApiRequest::get(PROFILE_PATH)).await.and_then(decode_user);
        match result {
            Ok(user) => {
                self.state.send_modify(|s| {
                    s.user = Some(user.clone());
                    s.checking_auth = false;
                });
                Some(user)
            }
            Err(err) => {
                debug!(error = %err, "profile check failed, treating as logged out");
                self.state.send_modify(|s| {
                    s.user = None;
                    s.checking_auth = false;
                });
                None
            }
        }
    }

    /// Ask the server for a new credential.
    ///
    /// Returns `Ok(None)` without a request if a profile check or refresh is
    /// already running, `Ok(Some(payload))` on success. A direct call does not
    /// occupy the client's refresh slot, so requests expiring meanwhile are
    /// replayed without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure after clearing the session.
    pub async fn refresh_token(&self) -> Result<Option<Value>, AuthError> {
        let claimed = self.state.send_if_modified(|s| {
            if s.checking_auth {
                false
            } else {
                s.checking_auth = true;
                true
            }
        });
        if !claimed {
            debug!("refresh skipped, auth check already in flight");
            return Ok(None);
        }
        let _checking = FlagGuard { state: &self.state, flag: Flag::CheckingAuth };

        match self.client.send(ApiRequest::post(REFRESH_PATH).exempt()).await {
            Ok(payload) => Ok(Some(payload)),
            Err(err) => {
                self.state.send_modify(|s| {
                    s.user = None;
                    s.checking_auth = false;
                });
                Err(err)
            }
        }
    }
}

#[async_trait::async_trait]
impl TokenRefresher for SessionStore {
    async fn refresh(&self) -> Result<(), AuthError> {
        self.refresh_token().await.map(|_| ())
    }

    async fn expire_session(&self) {
        self.set_user(None);
        self.notify(Notice::SessionExpired);

        // Waiters on the failed refresh are released without waiting on this call.
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.send(ApiRequest::post(LOGOUT_PATH).exempt()).await {
                warn!(error = %err, "logout after failed refresh did not reach server");
            }
        });
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
