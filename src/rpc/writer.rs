//! Outbound writer task.
//!
//! Exactly one task owns the write half of a connection. Everything else,
//! whether the dispatch loop answering a request or a spawned prompt task
//! streaming notifications, hands [`Message`]s to it through an
//! [`Outbound`] handle. The writer encodes each one with the connection's
//! [`WireCodec`], appends the `\n` delimiter, and writes it in full before
//! taking the next, so messages reach the peer whole and in hand-off order.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rpc::message::{Message, RequestId, WireCodec};
use crate::{AppError, Result};

/// Cloneable hand-off to the connection's single writer task.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    /// Create a handle and the receiver the writer task drains.
    #[must_use]
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Queue `message` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionClosed`] once the writer has stopped.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| AppError::ConnectionClosed("writer stopped".into()))
    }

    /// Send a notification.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionClosed`] once the writer has stopped.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.send(Message::notification(method, params)).await
    }

    /// Answer request `id` with `outcome`, mapping errors onto JSON-RPC error
    /// objects.
    ///
    /// A closed writer is logged rather than returned: there is nobody left
    /// to tell.
    pub async fn respond(&self, id: RequestId, outcome: Result<Value>) {
        let message = match outcome {
            Ok(result) => Message::success(id.clone(), result),
            Err(err) => Message::error(id.clone(), err.to_rpc_error()),
        };
        if self.send(message).await.is_err() {
            debug!(request_id = %id, "outbound: response dropped, connection closed");
        }
    }

    /// Whether the writer task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Upper bound on flushing already-queued messages once the writer is told
/// to stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Writer task: serialises queued messages and writes them to `sink`.
///
/// Exits when every [`Outbound`] is dropped, or when `cancel` fires after
/// writing whatever was already queued, so a reply handed off just before
/// the peer hung up still goes out.
///
/// # Errors
///
/// Returns [`AppError::Io`] if a write or flush fails; the receiver is
/// dropped on return, so later [`Outbound::send`] calls fail with
/// [`AppError::ConnectionClosed`].
pub async fn run_writer<W>(
    mut sink: W,
    codec: WireCodec,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("writer: cancellation received, draining queue");
                return drain(&mut sink, codec, &mut rx).await;
            }

            msg = rx.recv() => {
                let Some(message) = msg else {
                    debug!("writer: outbound channel closed, stopping");
                    return Ok(());
                };
                write_message(&mut sink, codec, &message).await?;
            }
        }
    }
}

/// Write the messages queued so far, giving up after [`DRAIN_TIMEOUT`].
async fn drain<W>(sink: &mut W, codec: WireCodec, rx: &mut mpsc::Receiver<Message>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    rx.close();
    let flush = async {
        let mut written = 0_usize;
        while let Ok(message) = rx.try_recv() {
            write_message(sink, codec, &message).await?;
            written += 1;
        }
        Ok::<_, AppError>(written)
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, flush).await {
        Ok(Ok(written)) => {
            debug!(written, "writer: queue drained, stopping");
            Ok(())
        }
        Ok(Err(err)) => Err(err),
        Err(_) => {
            warn!("writer: peer stalled while draining, stopping");
            Ok(())
        }
    }
}

async fn write_message<W>(sink: &mut W, codec: WireCodec, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut line = match codec.encode(message) {
        Ok(line) => line,
        Err(err) => {
            warn!(%err, "writer: dropping unencodable message");
            return Ok(());
        }
    };
    trace!(line = %line, "writer: sending");
    line.push('\n');

    sink.write_all(line.as_bytes()).await.map_err(|e| {
        warn!(error = %e, "writer: write failed");
        AppError::Io(format!("write failed: {e}"))
    })?;
    sink.flush()
        .await
        .map_err(|e| AppError::Io(format!("flush failed: {e}")))
}
