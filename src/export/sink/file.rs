//! File sink for CLI exports
//!
//! Writes through a large `BufWriter`; `flush()` pushes buffered bytes to
//! the file. An aborted export leaves the partial file behind under a
//! `.partial` name so it is never mistaken for a complete payload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::{ExportError, ExportResult, Result, StorefrontError};

use super::ExportSink;

/// Sink writing to a local file
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    bytes_written: u64,
}

impl FileSink {
    /// Create the output file
    ///
    /// # Arguments
    /// * `path` - Output file path; its directory must exist
    ///
    /// # Returns
    /// * `Result<Self>` - Sink or error
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        validate_path(path)?;

        let file = File::create(path).await.map_err(|e| {
            StorefrontError::Generic(format!("Failed to create {}: {e}", path.display()))
        })?;
        debug!("Created export file: {}", path.display());

        Ok(Self {
            writer: BufWriter::with_capacity(1024 * 1024, file),
            path: path.to_path_buf(),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn validate_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(StorefrontError::Generic(format!(
                "Directory does not exist: {}",
                parent.display()
            )));
        }
    }
    Ok(())
}

fn sink_error(e: std::io::Error) -> ExportError {
    ExportError::Sink(e.to_string())
}

#[async_trait]
impl ExportSink for FileSink {
    async fn write(&mut self, bytes: &[u8]) -> ExportResult<()> {
        self.writer.write_all(bytes).await.map_err(sink_error)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> ExportResult<()> {
        self.writer.flush().await.map_err(sink_error)
    }

    async fn finish(&mut self) -> ExportResult<()> {
        self.flush().await?;
        debug!(
            "Finalized export file: {} ({} bytes)",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }

    async fn abort(&mut self, err: &ExportError) {
        if let Err(e) = self.writer.flush().await {
            warn!("Failed to flush partial export: {}", e);
        }

        let mut partial = self.path.clone().into_os_string();
        partial.push(".partial");
        match tokio::fs::rename(&self.path, &partial).await {
            Ok(()) => warn!(
                "Export aborted ({}), partial output kept at {}",
                err,
                PathBuf::from(partial).display()
            ),
            Err(e) => warn!("Export aborted ({}), could not rename output: {}", err, e),
        }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
