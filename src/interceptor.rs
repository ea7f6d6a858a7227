//! Single-flight refresh interceptor.
//!
//! DESIGN
//! ======
//! `ApiClient` sends every request through a `Transport`. A 401 on a fresh
//! request suspends it on the one outstanding credential refresh, then
//! replays it once. The "outstanding refresh" is a single slot holding a
//! shared future plus the generation that created it:
//!
//! - empty slot + 401: start a refresh task, store its handle, wait on it
//! - occupied slot + 401: clone the handle, wait on it
//! - refresh settles: the task empties the slot (own generation only)
//!
//! The slot lock is only held for the check-and-set, never across an await.
//! The refresh runs on its own task so it completes even if every waiter is
//! dropped. A failed refresh tears the session down once, inside that task,
//! and every waiter receives the same error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::transport::{ApiRequest, Transport};

type RefreshFuture = Shared<BoxFuture<'static, Result<(), AuthError>>>;

// =============================================================================
// REFRESHER SEAM
// =============================================================================

/// The session operations the interceptor depends on.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a new credential.
    async fn refresh(&self) -> Result<(), AuthError>;

    /// Drop the local session after a failed refresh and notify the user.
    ///
    /// Runs before the refresh error reaches waiters, so it must not block on
    /// the network.
    async fn expire_session(&self);
}

// =============================================================================
// COORDINATION SLOT
// =============================================================================

struct PendingRefresh {
    generation: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct RefreshSlot {
    pending: Option<PendingRefresh>,
    generation: u64,
}

fn lock_slot(slot: &Mutex<RefreshSlot>) -> MutexGuard<'_, RefreshSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empties the slot when dropped, if it still holds `generation`.
struct SlotRelease {
    slot: Arc<Mutex<RefreshSlot>>,
    generation: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.slot);
        if slot.pending.as_ref().is_some_and(|p| p.generation == self.generation) {
            slot.pending = None;
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// API client that refreshes expired credentials and retries once.
///
/// Clones share the same transport and coordination slot.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    refresher: Weak<dyn TokenRefresher>,
    slot: Arc<Mutex<RefreshSlot>>,
}

impl ApiClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, refresher: Weak<dyn TokenRefresher>) -> Self {
        Self { transport, refresher, slot: Arc::new(Mutex::new(RefreshSlot::default())) }
    }

    /// `true` while a refresh call is outstanding.
    #[must_use]
    pub fn refresh_in_flight(&self) -> bool {
        lock_slot(&self.slot).pending.is_some()
    }

    /// Send a request, returning the JSON body of a 2xx response.
    ///
    /// # Errors
    ///
    /// - the request's own rejection for non-401 failures, exempt requests,
    ///   and a replay that fails again
    /// - the refresh error when the credential refresh fails
    /// - `AuthError::Transport` when no response was received
    pub async fn send(&self, request: ApiRequest) -> Result<Value, AuthError> {
        let response = self.transport.execute(&request).await?;
        if response.is_success() {
            return Ok(response.body);
        }

        let error = AuthError::rejected(response.status, &response.body);
        if !error.is_unauthorized() || !request.retry.allows_refresh() {
            return Err(error);
        }

        let request = request.into_retry();
        debug!(path = %request.path, "credential expired, waiting on refresh");
        self.refresh_once().await?;

        debug!(path = %request.path, "replaying request after refresh");
        self.transport.execute(&request).await?.into_result()
    }

    /// Join the outstanding refresh, or start one.
    async fn refresh_once(&self) -> Result<(), AuthError> {
        let future = {
            let mut slot = lock_slot(&self.slot);
            if let Some(pending) = &slot.pending {
                pending.future.clone()
            } else {
                slot.generation += 1;
                let generation = slot.generation;
                let future = self.start_refresh(generation);
                slot.pending = Some(PendingRefresh { generation, future: future.clone() });
                future
            }
        };
        future.await
    }

    fn start_refresh(&self, generation: u64) -> RefreshFuture {
        let refresher = self.refresher.clone();
        let release = SlotRelease { slot: Arc::clone(&self.slot), generation };

        let task = tokio::spawn(async move {
            let Some(refresher) = refresher.upgrade() else {
                drop(release);
                return Err(AuthError::StoreClosed);
            };

            info!(generation, "refreshing session credential");
            let result = refresher.refresh().await;
            drop(release);

            match &result {
                Ok(()) => info!(generation, "session credential refreshed"),
                Err(err) => {
                    warn!(generation, error = %err, "credential refresh failed, ending session");
                    refresher.expire_session().await;
                }
            }
            result
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(AuthError::RefreshAborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
#[path = "interceptor_test.rs"]
mod tests;
