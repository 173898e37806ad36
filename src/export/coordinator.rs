//! Export coordinator
//!
//! Brings the pipeline together for one request: negotiate the format,
//! build the filter, check the encoder can handle the row type, open the
//! ordered source, cap it, and hand everything to a streaming writer.
//!
//! Everything that can fail before the first byte fails here and is
//! returned as an error, so the transport can still answer with a proper
//! status code. Once the stream has started, failures only show up in the
//! payload and in the [`ExportOutcome`].

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::error::{ExportResult, Result};
use crate::filter::{FilterParams, FilterSpec};
use crate::model::ExportRow;
use crate::store::{Page, RowSource, list_page};

use super::encoders::{BinaryOptions, FormatEncoder, RowEncoder};
use super::guard::BoundedRows;
use super::negotiate::ExportFormat;
use super::progress::ProgressTracker;
use super::sink::{BodyChunk, ChannelSink, ExportSink};
use super::writer::{ExportOutcome, StreamingWriter, WriterOptions};

/// Parameters of one export request
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub filter: FilterParams,
    /// Explicit `format` parameter
    pub format: Option<String>,
    /// Raw `Accept` header
    pub accept: Option<String>,
    /// Resume strictly after this identity key
    pub cursor: Option<i64>,
    /// Requested cap; can only lower the configured one
    pub limit: Option<u64>,
}

/// A started export
pub struct ExportStream {
    pub session_id: Uuid,
    pub format: ExportFormat,
    pub content_type: &'static str,
    /// `attachment; filename=..` for download formats
    pub content_disposition: Option<String>,
    /// Response body chunks
    pub body: BoxStream<'static, BodyChunk>,
    /// Resolves once the writer reaches a terminal state
    pub outcome: JoinHandle<ExportOutcome>,
}

struct PreparedExport<R> {
    session_id: Uuid,
    encoder: FormatEncoder,
    rows: BoundedRows<R>,
}

/// Export pipeline for one row type
pub struct ExportCoordinator<R: ExportRow> {
    source: Arc<dyn RowSource<R>>,
    config: ExportConfig,
    binary: Arc<BinaryOptions>,
}

impl<R: ExportRow> Clone for ExportCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            config: self.config.clone(),
            binary: self.binary.clone(),
        }
    }
}

impl<R: ExportRow> ExportCoordinator<R> {
    /// Create a coordinator
    ///
    /// # Arguments
    /// * `source` - Ordered row source
    /// * `config` - Export section of the configuration
    /// * `binary` - Binary encoder options, built once at startup
    pub fn new(
        source: Arc<dyn RowSource<R>>,
        config: ExportConfig,
        binary: Arc<BinaryOptions>,
    ) -> Self {
        Self {
            source,
            config,
            binary,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Cap for a request: the configured limit, lowered by the request
    pub fn effective_limit(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(limit) => limit.min(self.config.export_limit),
            None => self.config.export_limit,
        }
    }

    /// Clamp a requested page size to `[1, max_page_size]`
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1))
    }

    async fn prepare(&self, request: &ExportRequest) -> ExportResult<PreparedExport<R>> {
        let format = ExportFormat::negotiate(request.format.as_deref(), request.accept.as_deref());
        let encoder = FormatEncoder::for_format(format, self.binary.clone());
        encoder.prepare::<R>()?;

        let filter = FilterSpec::from_params(&request.filter);
        let limit = self.effective_limit(request.limit);
        let session_id = Uuid::new_v4();
        debug!(
            %session_id,
            %format,
            clauses = filter.clauses().len(),
            cursor = ?request.cursor,
            limit,
            "Opening export"
        );

        let rows = self.source.open(&filter, request.cursor).await?;
        Ok(PreparedExport {
            session_id,
            encoder,
            rows: BoundedRows::new(rows, limit),
        })
    }

    /// Start a streaming export
    ///
    /// The writer runs on its own task and feeds the returned body through a
    /// bounded channel. `cancel` is cancelled when the body is dropped (the
    /// client went away) or when the export deadline passes.
    ///
    /// # Arguments
    /// * `request` - Export parameters
    /// * `cancel` - Request-scoped cancellation token
    ///
    /// # Returns
    /// * `ExportResult<ExportStream>` - Headers, body and outcome handle, or
    ///   the error that prevented the stream from starting
    pub async fn stream_export(
        &self,
        request: ExportRequest,
        cancel: CancellationToken,
    ) -> ExportResult<ExportStream> {
        let PreparedExport {
            session_id,
            encoder,
            rows,
        } = self.prepare(&request).await?;

        let format = encoder.format();
        let content_type = encoder.content_type();
        let content_disposition = format.is_attachment().then(|| {
            format!(
                "attachment; filename=\"{}.{}\"",
                R::RESOURCE,
                encoder.file_extension()
            )
        });

        let (sink, body) = ChannelSink::channel(self.config.channel_capacity);
        let done = CancellationToken::new();
        spawn_watcher(
            session_id,
            sink.sender(),
            cancel.clone(),
            done.clone(),
            self.config.timeout(),
        );

        let options = WriterOptions::from_config(&self.config);
        let outcome = tokio::spawn(async move {
            let _done = done.drop_guard();
            let mut writer = StreamingWriter::new(encoder, sink, options).with_session_id(session_id);
            writer.run(rows, &cancel).await
        });

        info!(%session_id, %format, "Export stream opened");

        Ok(ExportStream {
            session_id,
            format,
            content_type,
            content_disposition,
            body,
            outcome,
        })
    }

    /// Run an export to completion against any sink
    ///
    /// # Arguments
    /// * `request` - Export parameters
    /// * `sink` - Output sink
    /// * `cancel` - Cancellation token
    /// * `tracker` - Optional progress display
    ///
    /// # Returns
    /// * `ExportResult<(ExportOutcome, S)>` - Outcome and the sink, or the
    ///   error that prevented the export from starting
    pub async fn export_to_sink<S: ExportSink>(
        &self,
        request: ExportRequest,
        sink: S,
        cancel: &CancellationToken,
        tracker: Option<ProgressTracker>,
    ) -> ExportResult<(ExportOutcome, S)> {
        let PreparedExport {
            session_id,
            encoder,
            rows,
        } = self.prepare(&request).await?;

        let mut writer = StreamingWriter::new(encoder, sink, WriterOptions::from_config(&self.config))
            .with_session_id(session_id);
        if let Some(tracker) = tracker {
            writer = writer.with_progress(tracker);
        }

        let outcome = writer.run(rows, cancel).await;
        Ok((outcome, writer.into_sink()))
    }

    /// Read one keyset page for the list endpoint
    ///
    /// # Arguments
    /// * `filter` - Filter parameters
    /// * `cursor` - Resume strictly after this key
    /// * `limit` - Requested page size, clamped to the configured bounds
    pub async fn list(
        &self,
        filter: &FilterParams,
        cursor: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Page<R>> {
        let filter = FilterSpec::from_params(filter);
        let page = list_page(self.source.as_ref(), &filter, cursor, self.page_size(limit)).await?;
        Ok(page)
    }
}

/// Cancel the export when the body receiver is dropped or the deadline passes
fn spawn_watcher(
    session_id: Uuid,
    tx: mpsc::Sender<BodyChunk>,
    cancel: CancellationToken,
    done: CancellationToken,
    timeout: Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = done.cancelled() => {}
            _ = cancel.cancelled() => {}
            _ = tx.closed() => {
                info!(%session_id, "Client disconnected, cancelling export");
                cancel.cancel();
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(%session_id, "Export exceeded {}s deadline, cancelling", timeout.as_secs());
                cancel.cancel();
            }
        }
    });
}
