use super::*;
use crate::transport::RetryState;
use crate::transport::test_helpers::FakeTransport;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

const REFRESH: &str = "/auth/refresh-token";
const ORDERS: &str = "/orders";

// =========================================================================
// StubRefresher
// =========================================================================

struct StubRefresher {
    transport: Arc<FakeTransport>,
    expired: AtomicUsize,
}

#[async_trait::async_trait]
impl TokenRefresher for StubRefresher {
    async fn refresh(&self) -> Result<(), AuthError> {
        self.transport
            .execute(&ApiRequest::post(REFRESH).exempt())
            .await?
            .into_result()
            .map(|_| ())
    }

    async fn expire_session(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    transport: Arc<FakeTransport>,
    refresher: Arc<StubRefresher>,
    client: ApiClient,
}

fn harness() -> Harness {
    let transport = FakeTransport::new();
    let refresher = Arc::new(StubRefresher { transport: Arc::clone(&transport), expired: AtomicUsize::new(0) });
    let weak: Weak<dyn TokenRefresher> = Arc::downgrade(&refresher) as Weak<dyn TokenRefresher>;
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let client = ApiClient::new(dyn_transport, weak);
    Harness { transport, refresher, client }
}

fn replays(h: &Harness, path: &str) -> usize {
    h.transport
        .calls(path)
        .iter()
        .filter(|c| c.retry == RetryState::Retried)
        .count()
}

// =========================================================================
// pass-through
// =========================================================================

#[tokio::test]
async fn success_passes_through_without_refresh() {
    let h = harness();
    h.transport.respond(ORDERS, 200, json!({ "orders": [] }));

    let body = h.client.send(ApiRequest::get(ORDERS)).await.unwrap();

    assert_eq!(body, json!({ "orders": [] }));
    assert_eq!(h.transport.call_count(REFRESH), 0);
    assert!(!h.client.refresh_in_flight());
}

#[tokio::test]
async fn non_401_failure_is_returned_unchanged() {
    let h = harness();
    h.transport.respond(ORDERS, 500, json!({ "message": "Server error" }));

    let err = h.client.send(ApiRequest::get(ORDERS)).await.unwrap_err();

    assert_eq!(err, AuthError::Rejected { status: 500, message: "Server error".into() });
    assert_eq!(h.transport.call_count(REFRESH), 0);
    assert_eq!(h.transport.call_count(ORDERS), 1);
}

#[tokio::test]
async fn transport_failure_is_not_intercepted() {
    let h = harness();
    h.transport.fail(ORDERS, "connection reset");

    let err = h.client.send(ApiRequest::get(ORDERS)).await.unwrap_err();

    assert_eq!(err, AuthError::Transport("connection reset".into()));
    assert_eq!(h.transport.call_count(REFRESH), 0);
}

#[tokio::test]
async fn exempt_request_401_is_not_intercepted() {
    let h = harness();
    h.transport.respond(ORDERS, 401, json!({ "message": "Unauthorized" }));

    let err = h.client.send(ApiRequest::get(ORDERS).exempt()).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(h.transport.call_count(REFRESH), 0);
}

// =========================================================================
// refresh and replay
// =========================================================================

#[tokio::test]
async fn expired_credential_refreshes_and_replays_once() {
    let h = harness();
    h.transport.respond(ORDERS, 401, json!({ "message": "Unauthorized - Access token expired" }));
    h.transport.respond(ORDERS, 200, json!({ "orders": [1] }));
    h.transport.respond(REFRESH, 200, json!({ "message": "Token refreshed successfully" }));

    let body = h.client.send(ApiRequest::get(ORDERS)).await.unwrap();

    assert_eq!(body, json!({ "orders": [1] }));
    assert_eq!(h.transport.call_count(REFRESH), 1);
    assert_eq!(h.transport.call_count(ORDERS), 2);
    assert_eq!(replays(&h, ORDERS), 1);
    assert_eq!(h.refresher.expired.load(Ordering::SeqCst), 0);
    assert!(!h.client.refresh_in_flight());
}

#[tokio::test]
async fn replay_that_fails_with_401_is_not_intercepted_again() {
    let h = harness();
    h.transport.respond(ORDERS, 401, json!({ "message": "still expired" }));
    h.transport.respond(REFRESH, 200, json!({}));

    let err = h.client.send(ApiRequest::get(ORDERS)).await.unwrap_err();

    assert_eq!(err, AuthError::Rejected { status: 401, message: "still expired".into() });
    assert_eq!(h.transport.call_count(REFRESH), 1);
    assert_eq!(h.transport.call_count(ORDERS), 2);
}

#[tokio::test]
async fn replay_keeps_method_and_body() {
    let h = harness();
    h.transport.respond(ORDERS, 401, json!({}));
    h.transport.respond(ORDERS, 201, json!({ "id": 9 }));
    h.transport.respond(REFRESH, 200, json!({}));

    let request = ApiRequest::post(ORDERS).json(json!({ "sku": "tee", "qty": 2 }));
    h.client.send(request).await.unwrap();

    let calls = h.transport.calls(ORDERS);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].retry, RetryState::Retried);
    assert_eq!(calls[1].body, Some(json!({ "sku": "tee", "qty": 2 })));
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let h = harness();
    for _ in 0..3 {
        h.transport.respond(ORDERS, 401, json!({ "message": "expired" }));
    }
    h.transport.respond(ORDERS, 200, json!({ "ok": true }));
    h.transport.respond(REFRESH, 200, json!({}));
    h.transport.gate(REFRESH);

    assert!(!h.client.refresh_in_flight());

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let client = h.client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get(ORDERS)).await })
        })
        .collect();

    h.transport.wait_for_calls(ORDERS, 3).await;
    h.transport.wait_for_calls(REFRESH, 1).await;
    assert!(h.client.refresh_in_flight());

    h.transport.open(REFRESH);
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), json!({ "ok": true }));
    }

    assert_eq!(h.transport.call_count(REFRESH), 1);
    assert_eq!(h.transport.call_count(ORDERS), 6);
    assert_eq!(replays(&h, ORDERS), 3);
    assert!(!h.client.refresh_in_flight());
}

#[tokio::test]
async fn refresh_failure_rejects_every_waiter_with_refresh_error() {
    let h = harness();
    h.transport.respond(ORDERS, 401, json!({ "message": "own failure" }));
    h.transport.respond(REFRESH, 401, json!({ "message": "Invalid refresh token" }));
    h.transport.gate(REFRESH);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let client = h.client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get(ORDERS)).await })
        })
        .collect();

    h.transport.wait_for_calls(ORDERS, 2).await;
    h.transport.wait_for_calls(REFRESH, 1).await;
    h.transport.open(REFRESH);

    let expected = AuthError::Rejected { status: 401, message: "Invalid refresh token".into() };
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap_err(), expected);
    }

    assert_eq!(h.transport.call_count(REFRESH), 1);
    assert_eq!(h.transport.call_count(ORDERS), 2);
    assert_eq!(replays(&h, ORDERS), 0);
    assert_eq!(h.refresher.expired.load(Ordering::SeqCst), 1);
    assert!(!h.client.refresh_in_flight());
}

#[tokio::test]
async fn settled_refresh_frees_slot_for_next_cycle() {
    let h = harness();
    h.transport.respond(ORDERS, 401, json!({}));
    h.transport.respond(ORDERS, 200, json!({ "n": 1 }));
    h.transport.respond(ORDERS, 401, json!({}));
    h.transport.respond(ORDERS, 200, json!({ "n": 2 }));
    h.transport.respond(REFRESH, 200, json!({}));

    assert_eq!(h.client.send(ApiRequest::get(ORDERS)).await.unwrap(), json!({ "n": 1 }));
    assert!(!h.client.refresh_in_flight());
    assert_eq!(h.client.send(ApiRequest::get(ORDERS)).await.unwrap(), json!({ "n": 2 }));

    assert_eq!(h.transport.call_count(REFRESH), 2);
}

#[tokio::test]
async fn dropped_refresher_reports_closed_store() {
    let h = harness();
    h.transport.respond(ORDERS, 401, json!({}));
    let Harness { transport, refresher, client } = h;
    drop(refresher);

    let err = client.send(ApiRequest::get(ORDERS)).await.unwrap_err();

    assert_eq!(err, AuthError::StoreClosed);
    assert_eq!(transport.call_count(REFRESH), 0);
    assert!(!client.refresh_in_flight());
}
