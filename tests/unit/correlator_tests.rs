//! Unit tests for request/response correlation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use acp_agent::rpc::correlator::{Correlator, PeerHandle, PeerRequest};
use acp_agent::rpc::message::{Message, RequestId, Response, RpcError};
use acp_agent::rpc::writer::Outbound;
use acp_agent::AppError;

fn correlator() -> (Arc<Correlator>, mpsc::Receiver<Message>) {
    let (outbound, rx) = Outbound::channel(16);
    (Arc::new(Correlator::new(outbound)), rx)
}

/// Wait for the next outbound request and return its id.
async fn next_request_id(rx: &mut mpsc::Receiver<Message>) -> RequestId {
    match rx.recv().await.expect("request must be written") {
        Message::Request(request) => request.id,
        other => panic!("expected a request, got {other:?}"),
    }
}

// ── Matching ────────────────────────────────────────────────────────────────

/// A response wakes the caller waiting on its id with the peer's result.
#[tokio::test]
async fn response_resolves_matching_waiter() {
    let (correlator, mut rx) = correlator();
    let caller = Arc::clone(&correlator);
    let pending = tokio::spawn(async move {
        caller
            .send_and_await("fs/read_text_file", json!({ "path": "a" }), Duration::from_secs(5))
            .await
    });

    let id = next_request_id(&mut rx).await;
    assert_eq!(correlator.pending_count(), 1);
    assert!(correlator.resolve(Response {
        id,
        outcome: Ok(json!({ "content": "hello" })),
    }));

    let result = pending.await.expect("join").expect("request succeeds");
    assert_eq!(result, json!({ "content": "hello" }));
    assert_eq!(correlator.pending_count(), 0);
}

/// Out-of-order replies reach the right callers.
#[tokio::test]
async fn concurrent_requests_are_matched_by_id() {
    let (correlator, mut rx) = correlator();
    let first = {
        let c = Arc::clone(&correlator);
        tokio::spawn(async move { c.send_and_await("a", json!({}), Duration::from_secs(5)).await })
    };
    let first_id = next_request_id(&mut rx).await;
    let second = {
        let c = Arc::clone(&correlator);
        tokio::spawn(async move { c.send_and_await("b", json!({}), Duration::from_secs(5)).await })
    };
    let second_id = next_request_id(&mut rx).await;
    assert_ne!(first_id, second_id, "ids are never reused");

    correlator.resolve(Response {
        id: second_id,
        outcome: Ok(json!("second")),
    });
    correlator.resolve(Response {
        id: first_id,
        outcome: Ok(json!("first")),
    });

    assert_eq!(first.await.expect("join").expect("first"), json!("first"));
    assert_eq!(second.await.expect("join").expect("second"), json!("second"));
}

/// An error object from the peer surfaces as `AppError::Remote`.
#[tokio::test]
async fn error_reply_surfaces_as_remote_error() {
    let (correlator, mut rx) = correlator();
    let caller = Arc::clone(&correlator);
    let pending = tokio::spawn(async move {
        caller
            .send_and_await("fs/read_text_file", json!({}), Duration::from_secs(5))
            .await
    });

    let id = next_request_id(&mut rx).await;
    correlator.resolve(Response {
        id,
        outcome: Err(RpcError::new(-32_004, "no such file")),
    });

    let err = pending.await.expect("join").expect_err("must fail");
    assert_eq!(err, AppError::Remote(RpcError::new(-32_004, "no such file")));
}

/// Unknown and duplicate ids are discarded.
#[tokio::test]
async fn stray_responses_are_discarded() {
    let (correlator, _rx) = correlator();

    assert!(!correlator.resolve(Response {
        id: RequestId::Number(99),
        outcome: Ok(json!(null)),
    }));
    assert!(!correlator.resolve(Response {
        id: RequestId::Str("foreign".into()),
        outcome: Ok(json!(null)),
    }));
}

// ── Failure paths ───────────────────────────────────────────────────────────

/// No reply within the timeout fails the caller and clears the entry.
#[tokio::test]
async fn unanswered_request_times_out() {
    let (correlator, _rx) = correlator();

    let err = correlator
        .send_and_await("fs/read_text_file", json!({}), Duration::from_millis(50))
        .await
        .expect_err("must time out");

    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    assert_eq!(correlator.pending_count(), 0, "timed-out entry is removed");
}

/// Closing the correlator fails outstanding callers and refuses new ones.
#[tokio::test]
async fn close_fails_pending_and_later_requests() {
    let (correlator, mut rx) = correlator();
    let caller = Arc::clone(&correlator);
    let pending = tokio::spawn(async move {
        caller
            .send_and_await("fs/read_text_file", json!({}), Duration::from_secs(30))
            .await
    });
    next_request_id(&mut rx).await;

    correlator.close();

    let err = pending.await.expect("join").expect_err("must fail");
    assert!(matches!(err, AppError::ConnectionClosed(_)), "got {err:?}");
    assert!(correlator.is_closed());

    let err = correlator
        .send_and_await("x", json!({}), Duration::from_secs(1))
        .await
        .expect_err("closed correlator refuses requests");
    assert!(matches!(err, AppError::ConnectionClosed(_)), "got {err:?}");
}

/// A stopped writer fails the request immediately.
#[tokio::test]
async fn stopped_writer_fails_request() {
    let (correlator, rx) = correlator();
    drop(rx);

    let err = correlator
        .send_and_await("x", json!({}), Duration::from_secs(5))
        .await
        .expect_err("must fail");

    assert!(matches!(err, AppError::ConnectionClosed(_)), "got {err:?}");
    assert_eq!(correlator.pending_count(), 0);
}

// ── PeerHandle ──────────────────────────────────────────────────────────────

/// `PeerHandle` applies its configured timeout.
#[tokio::test]
async fn peer_handle_applies_its_timeout() {
    let (correlator, _rx) = correlator();
    let peer = PeerHandle::new(correlator, Duration::from_millis(20));

    let err = peer
        .request("_fs/list_dirs", json!({ "path": "." }))
        .await
        .expect_err("must time out");

    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
}
