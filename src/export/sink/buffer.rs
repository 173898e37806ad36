//! In-memory sink
//!
//! Collects the flushed payload in a `Vec<u8>`. Used by tests and by callers
//! that want the whole export in memory. It can also simulate a consumer
//! that disconnects after a fixed number of writes.

use async_trait::async_trait;

use crate::error::{ExportError, ExportResult};

use super::{ExportSink, disconnected};

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    flushed: Vec<u8>,
    pending: Vec<u8>,
    writes: u64,
    flushes: u64,
    disconnect_after: Option<u64>,
    finished: bool,
    aborted: Option<ExportError>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a consumer that goes away after `writes` successful writes
    pub fn disconnect_after(writes: u64) -> Self {
        Self {
            disconnect_after: Some(writes),
            ..Self::default()
        }
    }

    /// Bytes the consumer has received
    pub fn contents(&self) -> &[u8] {
        &self.flushed
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.flushed
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reason passed to `abort`, if the payload was aborted
    pub fn aborted(&self) -> Option<&ExportError> {
        self.aborted.as_ref()
    }

    fn is_disconnected(&self) -> bool {
        self.disconnect_after.is_some_and(|limit| self.writes >= limit)
    }
}

#[async_trait]
impl ExportSink for BufferSink {
    async fn write(&mut self, bytes: &[u8]) -> ExportResult<()> {
        if self.is_disconnected() {
            return Err(disconnected());
        }
        self.pending.extend_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    async fn flush(&mut self) -> ExportResult<()> {
        self.flushed.append(&mut self.pending);
        self.flushes += 1;
        Ok(())
    }

    async fn finish(&mut self) -> ExportResult<()> {
        self.flush().await?;
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self, err: &ExportError) {
        self.pending.clear();
        self.aborted = Some(err.clone());
    }

    fn bytes_written(&self) -> u64 {
        (self.flushed.len() + self.pending.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_bytes_invisible_until_flush() {
        let mut sink = BufferSink::new();
        sink.write(b"abc").await.unwrap();
        assert!(sink.contents().is_empty());
        sink.finish().await.unwrap();
        assert_eq!(sink.contents(), b"abc");
        assert!(sink.is_finished());
    }

    #[tokio::test]
    async fn test_disconnect_after_writes() {
        let mut sink = BufferSink::disconnect_after(2);
        sink.write(b"a").await.unwrap();
        sink.write(b"b").await.unwrap();
        assert!(sink.write(b"c").await.unwrap_err().is_cancellation());
    }

    #[tokio::test]
    async fn test_abort_discards_pending() {
        let mut sink = BufferSink::new();
        sink.write(b"[").await.unwrap();
        sink.abort(&ExportError::Sink("x".into())).await;
        assert!(sink.contents().is_empty());
        assert!(sink.aborted().is_some());
    }
}
