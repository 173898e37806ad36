//! Output sinks for the streaming writer
//!
//! A sink receives encoded bytes, buffers them until the writer asks for a
//! flush, and is told how the stream ends: `finish()` after a complete
//! payload, `abort()` when the payload must not look complete.

use async_trait::async_trait;

use crate::error::{ExportError, ExportResult};

pub mod buffer;
pub mod channel;
pub mod file;

pub use buffer::BufferSink;
pub use channel::{BodyChunk, ChannelSink};
pub use file::FileSink;

/// Destination of an export payload
#[async_trait]
pub trait ExportSink: Send {
    /// Append bytes to the pending buffer
    async fn write(&mut self, bytes: &[u8]) -> ExportResult<()>;

    /// Push pending bytes to the consumer
    ///
    /// # Returns
    /// * `ExportResult<()>` - `Cancelled` if the consumer has gone away
    async fn flush(&mut self) -> ExportResult<()>;

    /// Complete the payload. Pending bytes are flushed first.
    async fn finish(&mut self) -> ExportResult<()>;

    /// Terminate the payload abnormally
    ///
    /// Pending bytes are discarded and the consumer observes a failure
    /// instead of a clean end of stream.
    async fn abort(&mut self, err: &ExportError);

    /// Bytes accepted so far
    fn bytes_written(&self) -> u64;
}

pub(crate) fn disconnected() -> ExportError {
    ExportError::Cancelled("client disconnected".to_string())
}
