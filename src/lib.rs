//! Client-side session state with single-flight credential refresh.
//!
//! DESIGN
//! ======
//! `SessionStore` holds who is logged in and what is in flight. Every call it
//! makes, and every application call made through `SessionStore::client()`,
//! goes through `ApiClient`, which turns an expired-credential response into
//! one shared refresh followed by a single replay of each affected request.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod notice;
pub mod script;
pub mod store;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use error::AuthError;
pub use interceptor::{ApiClient, TokenRefresher};
pub use notice::Notice;
pub use store::{SessionSnapshot, SessionStore, SignUp, User};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, RetryState, Transport};
