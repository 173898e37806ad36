//! Channel-backed sink feeding an HTTP response body
//!
//! Each flush sends the pending bytes as one chunk over a bounded mpsc
//! channel. The bound is the backpressure: when the client reads slowly the
//! send waits, which in turn stops the writer from pulling more rows. A
//! closed channel means the receiving body was dropped, i.e. the client
//! disconnected.
//!
//! How the body ends travels separately on a oneshot. Once the data channel
//! drains, the body ends cleanly only if the sink was finished; an abort, or
//! a sink dropped without finishing, ends it with an error chunk. The abort
//! therefore reaches the client even when the data channel is full.

use std::io;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{ExportError, ExportResult};

use super::{ExportSink, disconnected};

/// One body chunk; an `Err` terminates the body abnormally
pub type BodyChunk = std::result::Result<Vec<u8>, io::Error>;

/// How the body ends once all data chunks are delivered
type BodyEnd = std::result::Result<(), io::Error>;

/// Sink that forwards flushed chunks to a channel
pub struct ChannelSink {
    tx: mpsc::Sender<BodyChunk>,
    end: Option<oneshot::Sender<BodyEnd>>,
    pending: Vec<u8>,
    bytes_written: u64,
    chunks_sent: u64,
}

impl ChannelSink {
    /// Create a sink and the body stream it feeds
    ///
    /// # Arguments
    /// * `capacity` - Chunks buffered before `flush` waits for the reader
    ///
    /// # Returns
    /// * `(ChannelSink, BoxStream<'static, BodyChunk>)` - Writer half and
    ///   response body
    pub fn channel(capacity: usize) -> (Self, BoxStream<'static, BodyChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (end_tx, end_rx) = oneshot::channel();
        let sink = Self {
            tx,
            end: Some(end_tx),
            pending: Vec::with_capacity(8 * 1024),
            bytes_written: 0,
            chunks_sent: 0,
        };
        (sink, body_stream(rx, end_rx))
    }

    /// Handle on the data channel, used to notice the reader going away
    pub fn sender(&self) -> mpsc::Sender<BodyChunk> {
        self.tx.clone()
    }

    /// Chunks delivered to the channel so far
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    fn end_with(&mut self, end: BodyEnd) -> bool {
        match self.end.take() {
            Some(tx) => tx.send(end).is_ok(),
            None => false,
        }
    }
}

fn body_stream(
    rx: mpsc::Receiver<BodyChunk>,
    end: oneshot::Receiver<BodyEnd>,
) -> BoxStream<'static, BodyChunk> {
    futures::stream::unfold(Some((rx, end)), |state| async move {
        let (mut rx, end) = state?;
        if let Some(chunk) = rx.recv().await {
            return Some((chunk, Some((rx, end))));
        }
        // All senders are gone, so the end signal is settled
        match end.await {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some((Err(failure), None)),
            Err(_) => Some((Err(io::Error::other("export ended before completing")), None)),
        }
    })
    .boxed()
}

#[async_trait]
impl ExportSink for ChannelSink {
    async fn write(&mut self, bytes: &[u8]) -> ExportResult<()> {
        if self.tx.is_closed() {
            return Err(disconnected());
        }
        self.pending.extend_from_slice(bytes);
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> ExportResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.pending, Vec::with_capacity(8 * 1024));
        self.tx.send(Ok(chunk)).await.map_err(|_| disconnected())?;
        self.chunks_sent += 1;
        Ok(())
    }

    async fn finish(&mut self) -> ExportResult<()> {
        self.flush().await?;
        self.end_with(Ok(()));
        Ok(())
    }

    async fn abort(&mut self, err: &ExportError) {
        self.pending.clear();
        if !self.end_with(Err(io::Error::other(err.to_string()))) {
            debug!("Body receiver already gone, abort not delivered");
        }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_are_sent_on_flush_only() {
        let (mut sink, mut body) = ChannelSink::channel(4);
        sink.write(b"ab").await.unwrap();
        sink.write(b"cd").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.bytes_written(), 4);
        assert_eq!(sink.chunks_sent(), 1);

        sink.finish().await.unwrap();
        drop(sink);
        assert_eq!(body.next().await.unwrap().unwrap(), b"abcd".to_vec());
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_cancellation() {
        let (mut sink, body) = ChannelSink::channel(4);
        drop(body);
        let err = sink.write(b"x").await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_abort_ends_body_with_error() {
        let (mut sink, body) = ChannelSink::channel(4);
        sink.write(b"[{").await.unwrap();
        sink.abort(&ExportError::Sink("boom".into())).await;
        drop(sink);

        let chunks: Vec<BodyChunk> = body.collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_err());
    }

    #[tokio::test]
    async fn test_abort_with_full_channel_still_reaches_reader() {
        let (mut sink, body) = ChannelSink::channel(1);
        sink.write(b"a").await.unwrap();
        sink.flush().await.unwrap();

        // Channel is full; abort must not wait for the reader
        sink.abort(&ExportError::Cancelled("deadline".into())).await;
        drop(sink);

        let chunks: Vec<BodyChunk> = body.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), b"a");
        assert!(chunks[1].is_err());
    }

    #[tokio::test]
    async fn test_sink_dropped_unfinished_is_failure() {
        let (mut sink, body) = ChannelSink::channel(2);
        sink.write(b"[").await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        let chunks: Vec<BodyChunk> = body.collect().await;
        assert!(chunks.last().is_some_and(|chunk| chunk.is_err()));
    }
}
