//! Streaming writer
//!
//! Drains a bounded row sequence into a sink. The writer moves through
//! `Idle -> Writing -> Completed | Aborted`:
//!
//! - the format prefix is written with the first row (or at completion for
//!   an empty export, so an empty payload is still well-formed)
//! - every row is encoded and written on its own; the sink is flushed every
//!   `flush_interval` rows
//! - cancellation is checked before every pull and raced against every
//!   pull, write and flush
//! - a failure is never allowed to look like a complete payload: formats
//!   with an in-band marker end with a marker line, the others are aborted
//!
//! The row source is closed on every exit path before `run` returns.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::error::{ExportError, ExportResult};
use crate::model::ExportRow;

use super::encoders::{FormatEncoder, RowEncoder};
use super::guard::{BoundedRows, Pull};
use super::negotiate::ExportFormat;
use super::progress::ProgressTracker;
use super::sink::ExportSink;

/// Writer lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub enum WriterState {
    Idle,
    Writing,
    Completed,
    Aborted(ExportError),
}

/// What to do when the export cap truncates the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TruncationPolicy {
    /// Complete normally; the payload simply ends at the cap
    #[default]
    Silent,
    /// Formats with an in-band channel end with a `limit_exceeded` marker
    Marker,
}

/// Writer settings
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Rows between sink flushes
    pub flush_interval: u64,
    pub truncation: TruncationPolicy,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            flush_interval: 10,
            truncation: TruncationPolicy::Silent,
        }
    }
}

impl WriterOptions {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            flush_interval: config.flush_interval_items.max(1),
            truncation: if config.truncation_marker {
                TruncationPolicy::Marker
            } else {
                TruncationPolicy::Silent
            },
        }
    }
}

/// Summary of one export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub session_id: Uuid,
    pub format: ExportFormat,
    pub state: WriterState,
    pub rows_written: u64,
    pub bytes_written: u64,
    pub flushes: u64,
    /// The cap cut off further matching rows
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl ExportOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == WriterState::Completed
    }

    /// Reason the export was aborted, if it was
    pub fn abort_reason(&self) -> Option<&ExportError> {
        match &self.state {
            WriterState::Aborted(err) => Some(err),
            _ => None,
        }
    }
}

fn cancelled() -> ExportError {
    ExportError::Cancelled("export cancelled".to_string())
}

/// Writer bound to one encoder and one sink
pub struct StreamingWriter<S> {
    session_id: Uuid,
    encoder: FormatEncoder,
    sink: S,
    options: WriterOptions,
    state: WriterState,
    rows_written: u64,
    /// Identity key of the last row handed to the sink
    last_written: Option<i64>,
    flushes: u64,
    tracker: Option<ProgressTracker>,
}

impl<S: ExportSink> StreamingWriter<S> {
    /// Create an idle writer
    ///
    /// # Arguments
    /// * `encoder` - Encoder for the negotiated format
    /// * `sink` - Output sink
    /// * `options` - Flush cadence and truncation policy
    pub fn new(encoder: FormatEncoder, sink: S, mut options: WriterOptions) -> Self {
        options.flush_interval = options.flush_interval.max(1);
        Self {
            session_id: Uuid::new_v4(),
            encoder,
            sink,
            options,
            state: WriterState::Idle,
            rows_written: 0,
            last_written: None,
            flushes: 0,
            tracker: None,
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    /// Report progress to a tracker while running
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn state(&self) -> &WriterState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drain `rows` into the sink
    ///
    /// # Arguments
    /// * `rows` - Bounded row sequence; closed before this returns
    /// * `cancel` - Cancellation signal for the request
    ///
    /// # Returns
    /// * `ExportOutcome` - Terminal state and counters. Failures are reported
    ///   in the outcome, never as a panic or error to the caller.
    pub async fn run<R: ExportRow>(
        &mut self,
        mut rows: BoundedRows<R>,
        cancel: &CancellationToken,
    ) -> ExportOutcome {
        let started = Instant::now();
        let format = self.encoder.format();
        debug!(session_id = %self.session_id, %format, "Export stream started");

        let result = self.drive(&mut rows, cancel).await;

        if let Err(e) = rows.close().await {
            warn!(session_id = %self.session_id, "Failed to close row source: {}", e);
        }

        let truncated = match result {
            Ok(truncated) => {
                self.state = WriterState::Completed;
                truncated
            }
            Err(err) => {
                self.terminate(&err, self.last_written, cancel).await;
                self.state = WriterState::Aborted(err);
                false
            }
        };

        if let Some(ref tracker) = self.tracker {
            tracker.finish();
        }

        let outcome = ExportOutcome {
            session_id: self.session_id,
            format,
            state: self.state.clone(),
            rows_written: self.rows_written,
            bytes_written: self.sink.bytes_written(),
            flushes: self.flushes,
            truncated,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if outcome.is_completed() {
            info!(
                session_id = %outcome.session_id,
                %format,
                rows = outcome.rows_written,
                bytes = outcome.bytes_written,
                truncated = outcome.truncated,
                "Export completed in {} ms",
                outcome.elapsed_ms
            );
        }

        outcome
    }

    /// Main loop; returns whether the cap truncated the export
    async fn drive<R: ExportRow>(
        &mut self,
        rows: &mut BoundedRows<R>,
        cancel: &CancellationToken,
    ) -> ExportResult<bool> {
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }

            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                pulled = rows.pull() => pulled?,
            };

            match pulled {
                Pull::Row(row) => {
                    if self.state == WriterState::Idle {
                        self.begin(cancel).await?;
                    }

                    let bytes = self.encoder.encode(&row, self.rows_written)?;
                    self.write(&bytes, cancel).await?;
                    self.rows_written += 1;
                    self.last_written = Some(row.identity());

                    if let Some(ref tracker) = self.tracker {
                        tracker.update(self.rows_written);
                    }
                    if self.rows_written % self.options.flush_interval == 0 {
                        self.flush(cancel).await?;
                    }
                }
                Pull::LimitReached => {
                    let limit = rows.max_items();
                    self.complete(cancel, Some(limit)).await?;
                    return Ok(true);
                }
                Pull::Exhausted => {
                    self.complete(cancel, None).await?;
                    return Ok(false);
                }
            }
        }
    }

    async fn begin(&mut self, cancel: &CancellationToken) -> ExportResult<()> {
        self.state = WriterState::Writing;
        let prefix = self.encoder.prefix();
        if !prefix.is_empty() {
            self.write(prefix, cancel).await?;
        }
        Ok(())
    }

    async fn complete(
        &mut self,
        cancel: &CancellationToken,
        truncated_at: Option<u64>,
    ) -> ExportResult<()> {
        if self.state == WriterState::Idle {
            self.begin(cancel).await?;
        }

        if let Some(limit) = truncated_at {
            if self.options.truncation == TruncationPolicy::Marker {
                let err = ExportError::LimitExceeded { limit };
                if let Some(marker) = self.encoder.error_marker(&err, self.last_written) {
                    self.write(&marker, cancel).await?;
                }
            }
        }

        let suffix = self.encoder.suffix();
        if !suffix.is_empty() {
            self.write(suffix, cancel).await?;
        }

        self.flushes += 1;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            finished = self.sink.finish() => finished,
        }
    }

    async fn write(&mut self, bytes: &[u8], cancel: &CancellationToken) -> ExportResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            written = self.sink.write(bytes) => written,
        }
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> ExportResult<()> {
        self.flushes += 1;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            flushed = self.sink.flush() => flushed,
        }
    }

    /// End an export that failed
    async fn terminate(
        &mut self,
        err: &ExportError,
        last_id: Option<i64>,
        cancel: &CancellationToken,
    ) {
        let session_id = self.session_id;

        if err.is_cancellation() {
            info!(
                %session_id,
                rows = self.rows_written,
                "Export aborted: {}",
                err
            );
            self.sink.abort(err).await;
            return;
        }

        error!(
            %session_id,
            code = err.code(),
            rows = self.rows_written,
            last_id = ?last_id,
            "Export failed mid-stream: {}",
            err
        );

        let Some(marker) = self.encoder.error_marker(err, last_id) else {
            self.sink.abort(err).await;
            return;
        };

        let sink = &mut self.sink;
        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            delivered = async {
                sink.write(&marker).await?;
                sink.finish().await
            } => delivered,
        };
        if let Err(e) = delivered {
            debug!(%session_id, "Could not deliver error marker: {}", e);
            self.sink.abort(err).await;
        }
    }
}
