//! Bidirectional JSON-RPC 2.0 over newline-delimited byte streams.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing.
//! - `message`: envelope classification and the per-connection wire codec.
//! - `correlator`: pending-request table for locally issued requests.
//! - `reader` / `writer`: the two I/O tasks of a connection.
//! - `endpoint`: wires the above together around a role [`Dispatcher`](endpoint::Dispatcher).

pub mod codec;
pub mod correlator;
pub mod endpoint;
pub mod message;
pub mod reader;
pub mod writer;
