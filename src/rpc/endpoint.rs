//! One side of a bidirectional JSON-RPC connection.
//!
//! An [`Endpoint`] owns the connection plumbing shared by the agent and the
//! client roles: the single writer, the reader, and the [`Correlator`].
//! [`Endpoint::run`] spawns the reader and writer tasks and then loops over
//! inbound events:
//!
//! - responses go to the correlator, waking the local caller;
//! - requests and notifications go to the role's [`Dispatcher`].
//!
//! When the stream closes (or `cancel` fires) the correlator is closed, so
//! every outstanding reverse call fails with
//! [`AppError::ConnectionClosed`](crate::AppError::ConnectionClosed) instead
//! of hanging, and the dispatcher is told.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::codec::{LineCodec, DEFAULT_MAX_LINE_BYTES};
use crate::rpc::correlator::Correlator;
use crate::rpc::message::{FieldCasing, Message, Notification, Request, WireCodec};
use crate::rpc::reader::{run_reader, InboundEvent};
use crate::rpc::writer::{run_writer, Outbound};
use crate::Result;

/// Default depth of the outbound and inbound queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Role-specific handling of inbound requests and notifications.
///
/// Implementations must return promptly: long-running work is spawned so the
/// read loop keeps servicing the connection (including replies to the
/// implementation's own reverse calls).
pub trait Dispatcher: Send {
    /// Handle a request; the reply goes out through the role's [`Outbound`].
    fn on_request(&mut self, request: Request) -> impl Future<Output = ()> + Send;

    /// Handle a notification.
    fn on_notification(&mut self, notification: Notification) -> impl Future<Output = ()> + Send;

    /// The connection has closed; no further calls follow.
    fn on_closed(&mut self, reason: &str);
}

/// Tunables for an [`Endpoint`].
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    /// Payload key casing on this connection.
    pub casing: FieldCasing,
    /// Longest accepted inbound line.
    pub max_line_bytes: usize,
    /// Depth of the outbound and inbound queues.
    pub queue_depth: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            casing: FieldCasing::Camel,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Connection plumbing, built before the dispatcher so the dispatcher can
/// hold the [`Outbound`] and [`Correlator`] handles.
#[derive(Debug)]
pub struct Endpoint {
    config: EndpointConfig,
    outbound: Outbound,
    outbound_rx: mpsc::Receiver<Message>,
    correlator: Arc<Correlator>,
}

impl Endpoint {
    /// Create the plumbing for one connection.
    #[must_use]
    pub fn new(config: EndpointConfig) -> Self {
        let (outbound, outbound_rx) = Outbound::channel(config.queue_depth);
        let correlator = Arc::new(Correlator::new(outbound.clone()));
        Self {
            config,
            outbound,
            outbound_rx,
            correlator,
        }
    }

    /// Handle to the connection's single writer.
    #[must_use]
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// The connection's pending-request table.
    #[must_use]
    pub fn correlator(&self) -> Arc<Correlator> {
        Arc::clone(&self.correlator)
    }

    /// Serve the connection until the stream closes or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok(())`; transport faults end the
    /// connection and are logged.
    pub async fn run<R, W, D>(
        self,
        source: R,
        sink: W,
        mut dispatcher: D,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        D: Dispatcher,
    {
        let Self {
            config,
            outbound,
            outbound_rx,
            correlator,
        } = self;
        let codec = WireCodec::new(config.casing);
        let io_cancel = cancel.child_token();

        let writer_cancel = io_cancel.clone();
        let writer = tokio::spawn(async move {
            if let Err(err) = run_writer(sink, codec, outbound_rx, writer_cancel).await {
                warn!(%err, "endpoint: writer stopped with error");
            }
        });

        let (event_tx, mut event_rx) = mpsc::channel(config.queue_depth.max(1));
        let reader = tokio::spawn(run_reader(
            source,
            LineCodec::with_max_length(config.max_line_bytes),
            codec,
            event_tx,
            io_cancel.clone(),
        ));
        // Only spawned tasks keep the writer alive from here on.
        drop(outbound);

        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => break "cancelled".to_owned(),

                event = event_rx.recv() => match event {
                    Some(InboundEvent::Message(Message::Response(response))) => {
                        correlator.resolve(response);
                    }
                    Some(InboundEvent::Message(Message::Request(request))) => {
                        dispatcher.on_request(request).await;
                    }
                    Some(InboundEvent::Message(Message::Notification(notification))) => {
                        dispatcher.on_notification(notification).await;
                    }
                    Some(InboundEvent::Closed { reason }) => break reason,
                    None => break "reader stopped".to_owned(),
                },
            }
        };

        debug!(reason = reason.as_str(), "endpoint: connection closing");
        correlator.close();
        dispatcher.on_closed(&reason);
        io_cancel.cancel();
        let (reader, writer) = tokio::join!(reader, writer);
        if let Err(err) = reader {
            warn!(%err, "endpoint: reader task failed");
        }
        if let Err(err) = writer {
            warn!(%err, "endpoint: writer task failed");
        }
        Ok(())
    }
}
