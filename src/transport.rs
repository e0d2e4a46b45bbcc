//! Byte streams the agent serves: a TCP accept loop or the process's stdio.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::{AgentConnection, AgentContext};
use crate::{AppError, Result};

/// Bind the agent's TCP listener.
///
/// # Errors
///
/// Returns `AppError::Io` if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Io(format!("failed to bind {addr}: {err}")))
}

/// Accept connections until `cancel` fires, serving each with its own
/// [`AgentConnection`].
///
/// On shutdown every open connection is cancelled and awaited.
///
/// # Errors
///
/// Returns `AppError::Io` if the listener's address cannot be read.
pub async fn serve_tcp(
    listener: TcpListener,
    context: AgentContext,
    cancel: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    let connections = TaskTracker::new();
    let span = info_span!("tcp_server", addr = %local);

    async {
        info!("agent listening");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("listener shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            warn!(%peer, %err, "failed to set TCP_NODELAY");
                        }
                        let (reader, writer) = stream.into_split();
                        let connection = AgentConnection::new(context.clone());
                        let conn_cancel = cancel.child_token();
                        connections.spawn(
                            async move {
                                info!("connection accepted");
                                if let Err(err) = connection.serve(reader, writer, conn_cancel).await {
                                    warn!(%err, "connection ended with error");
                                }
                            }
                            .instrument(info_span!("connection", %peer)),
                        );
                    }
                    Err(err) => warn!(%err, "accept failed"),
                },
            }
        }
    }
    .instrument(span)
    .await;

    connections.close();
    connections.wait().await;
    Ok(())
}

/// Serve a single connection over stdin/stdout.
///
/// Logs must go to stderr in this mode; stdout carries the protocol.
///
/// # Errors
///
/// Propagates failures from the connection.
pub async fn serve_stdio(context: AgentContext, cancel: CancellationToken) -> Result<()> {
    let connection = AgentConnection::new(context);
    connection
        .serve(tokio::io::stdin(), tokio::io::stdout(), cancel)
        .instrument(info_span!("connection", peer = "stdio"))
        .await
}
