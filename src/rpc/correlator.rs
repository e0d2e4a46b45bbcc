//! Correlation of locally issued requests with the peer's replies.
//!
//! [`Correlator::send_and_await`] allocates an id from a monotonically
//! increasing counter, records a pending entry holding a [`oneshot`] waiter,
//! hands the request to the writer, and suspends the caller. The dispatch
//! loop feeds every inbound [`Response`] to [`Correlator::resolve`], which
//! wakes exactly the waiter registered under that id.
//!
//! Ids are never reused, so an id can have at most one pending entry. A
//! waiter gives up on timeout, and the entry is removed whenever the waiting
//! future ends, including when it is dropped mid-wait. [`Correlator::close`]
//! fails every outstanding waiter with [`AppError::ConnectionClosed`] and
//! rejects later requests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::rpc::message::{Message, RequestId, Response, RpcError};
use crate::rpc::writer::Outbound;
use crate::{AppError, Result};

type Waiter = oneshot::Sender<std::result::Result<Value, RpcError>>;

/// A request awaiting the peer's reply.
#[derive(Debug)]
struct PendingRequest {
    method: String,
    issued_at: Instant,
    waiter: Waiter,
}

#[derive(Debug, Default)]
struct Table {
    pending: HashMap<i64, PendingRequest>,
    closed: bool,
}

/// Pending-request table for one connection.
#[derive(Debug)]
pub struct Correlator {
    next_id: AtomicI64,
    table: Mutex<Table>,
    outbound: Outbound,
}

impl Correlator {
    /// Create a correlator that writes requests through `outbound`.
    #[must_use]
    pub fn new(outbound: Outbound) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            table: Mutex::new(Table::default()),
            outbound,
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `method` to the peer and wait up to `timeout` for its reply.
    ///
    /// # Errors
    ///
    /// - [`AppError::Remote`]: the peer answered with an error object.
    /// - [`AppError::Timeout`]: no reply within `timeout`.
    /// - [`AppError::ConnectionClosed`]: the connection closed before a
    ///   reply arrived, or was already closed.
    pub async fn send_and_await(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = self.table();
            if table.closed {
                return Err(AppError::ConnectionClosed(format!(
                    "cannot send {method}: connection closed"
                )));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            table.pending.insert(
                id,
                PendingRequest {
                    method: method.to_owned(),
                    issued_at: Instant::now(),
                    waiter: tx,
                },
            );
            id
        };
        let _guard = PendingGuard { correlator: self, id };

        debug!(request_id = id, method, "correlator: request issued");
        self.outbound
            .send(Message::request(RequestId::Number(id), method, params))
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(err))) => Err(AppError::Remote(err)),
            Ok(Err(_)) => Err(AppError::ConnectionClosed(format!(
                "connection closed while awaiting {method}"
            ))),
            Err(_) => {
                warn!(request_id = id, method, ?timeout, "correlator: request timed out");
                Err(AppError::Timeout(format!(
                    "{method} not answered within {timeout:?}"
                )))
            }
        }
    }

    /// Deliver `response` to the waiter registered under its id.
    ///
    /// Returns `false` when no request with that id is pending; the
    /// response is logged and discarded.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(id) = response.id.as_i64() else {
            warn!(request_id = %response.id, "correlator: response with foreign id, discarding");
            return false;
        };

        let Some(entry) = self.table().pending.remove(&id) else {
            warn!(request_id = id, "correlator: stray or duplicate response, discarding");
            return false;
        };

        debug!(
            request_id = id,
            method = entry.method.as_str(),
            elapsed_ms = u64::try_from(entry.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "correlator: response matched"
        );
        if entry.waiter.send(response.outcome).is_err() {
            debug!(request_id = id, "correlator: waiter gone before delivery");
        }
        true
    }

    /// Fail every pending request with [`AppError::ConnectionClosed`] and
    /// refuse new ones.
    pub fn close(&self) {
        let drained: Vec<(i64, PendingRequest)> = {
            let mut table = self.table();
            table.closed = true;
            table.pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "correlator: abandoning pending requests");
        }
        // Dropping each waiter wakes its caller with a receive error.
        drop(drained);
    }

    /// Number of requests currently awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().pending.len()
    }

    /// Whether [`Correlator::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.table().closed
    }
}

/// Removes the pending entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.table().pending.remove(&self.id);
    }
}

/// Capability to issue requests to the peer.
///
/// Tool handlers receive this explicitly and never touch the socket; tests
/// substitute a fake.
pub trait PeerRequest: Send + Sync {
    /// Send `method` with `params` and wait for the peer's result.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the underlying transport or peer.
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;
}

/// [`PeerRequest`] backed by a connection's [`Correlator`] with a fixed timeout.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    correlator: Arc<Correlator>,
    timeout: Duration,
}

impl PeerHandle {
    /// Wrap `correlator`, bounding every request by `timeout`.
    #[must_use]
    pub fn new(correlator: Arc<Correlator>, timeout: Duration) -> Self {
        Self {
            correlator,
            timeout,
        }
    }
}

impl PeerRequest for PeerHandle {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(self.correlator.send_and_await(method, params, self.timeout))
    }
}
