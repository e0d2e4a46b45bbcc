//! Inbound reader task.
//!
//! Drives a [`FramedRead`] over the connection's read half with
//! [`LineCodec`], classifies every complete line with the connection's
//! [`WireCodec`], and forwards the result through a tokio [`mpsc`] channel.
//!
//! Malformed lines are logged and dropped; framing continues with the next
//! line. Only end of stream or an I/O error ends the task, and both are
//! reported as [`InboundEvent::Closed`].

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rpc::codec::LineCodec;
use crate::rpc::message::{Message, WireCodec};

/// Event emitted by [`run_reader`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A decoded envelope.
    Message(Message),
    /// The stream ended; no further events follow.
    Closed {
        /// Human-readable reason.
        reason: String,
    },
}

/// Reader task: frames, decodes, and forwards inbound messages.
///
/// When `cancel` fires the task exits without emitting
/// [`InboundEvent::Closed`].
pub async fn run_reader<R>(
    source: R,
    framer: LineCodec,
    codec: WireCodec,
    events: mpsc::Sender<InboundEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(source, framer);

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => {
                match item {
                    None => break "stream closed".to_owned(),

                    Some(Err(err)) => {
                        warn!(error = %err, "reader: stream error, stopping");
                        break format!("stream error: {err}");
                    }

                    Some(Ok(line)) => {
                        trace!(line = %line, "reader: received");
                        match codec.decode(&line) {
                            Ok(message) => {
                                if events.send(InboundEvent::Message(message)).await.is_err() {
                                    debug!("reader: event channel closed, stopping");
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(
                                    error = %err,
                                    raw_line = %line,
                                    "reader: decode error, skipping line"
                                );
                            }
                        }
                    }
                }
            }
        }
    };

    debug!(reason = reason.as_str(), "reader: stream ended");
    if events.send(InboundEvent::Closed { reason }).await.is_err() {
        debug!("reader: event channel closed before close could be delivered");
    }
}
