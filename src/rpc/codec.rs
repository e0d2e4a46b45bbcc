//! Newline framing for JSON-RPC byte streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or oversized message from the peer cannot grow
//! the receive buffer without bound. The inner codec scans only bytes it has
//! not inspected before, so framing stays linear in the buffer size even when
//! a single message (file contents) arrives across many reads.
//!
//! # Usage
//!
//! Use [`LineCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] on the inbound half. Outbound lines are
//! written whole by the writer task.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use acp_agent::rpc::codec::LineCodec;
//!
//! let lines = FramedRead::new(socket_read_half, LineCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Default maximum line length accepted by [`LineCodec`]: 8 MiB.
///
/// File contents travel inside single messages, so the limit is generous.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1_048_576;

/// Newline-delimited framing for bidirectional JSON-RPC streams.
///
/// # Decoder
///
/// Yields each complete `\n`-terminated segment (a trailing `\r` is
/// stripped) in arrival order. Blank segments are discarded. Bytes after the
/// last delimiter stay buffered until the next read completes them.
///
/// Lines longer than the configured maximum are logged and discarded up to
/// the next delimiter; framing then resumes with the following line. A
/// decode error would end a [`tokio_util::codec::FramedRead`] stream, so
/// oversized input is never surfaced as one.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    /// Create a new `LineCodec` with the [`DEFAULT_MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a `LineCodec` rejecting lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// Maximum accepted line length in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Decode(format!("line too long: exceeded {} bytes", self.max_length))
            }
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(other) => return Ok(other),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        max_length = self.max_length,
                        "line codec: oversized line, discarding until next delimiter"
                    );
                }
                Err(err) => return Err(self.map_error(err)),
            }
        }
    }

    /// Drain complete lines at end of stream.
    ///
    /// An undelimited tail is never emitted as a message: it is logged and
    /// discarded.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        let dropped = src.len();
        src.clear();
        // Reset the scan offset the inner codec keeps into `src`.
        self.inner = LinesCodec::new_with_max_length(self.max_length);
        if dropped > 0 {
            warn!(dropped, "line codec: unterminated message at end of stream");
        }
        Ok(None)
    }
}
