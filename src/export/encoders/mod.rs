//! Format encoders
//!
//! Each encoder turns one row at a time into bytes for its wire format and
//! knows the fixed prefix and suffix that frame a complete payload. The set
//! of formats is closed, so dispatch goes through the [`FormatEncoder`] enum
//! rather than a trait object; the enum is resolved once per request.
//!
//! Decoders for all three formats live here as well. Clients and tests use
//! them to read a payload back into rows.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{ErrorInfo, ErrorResponse, ExportError, ExportResult, Result, StorefrontError};
use crate::model::ExportRow;

use super::negotiate::ExportFormat;

pub mod json_array;
pub mod msgpack;
pub mod ndjson;

pub use json_array::JsonArrayEncoder;
pub use msgpack::{BinaryOptions, MsgpackEncoder, SchemaRegistry};
pub use ndjson::NdjsonEncoder;

/// Row-at-a-time encoder for one wire format
pub trait RowEncoder: Send + Sync {
    /// MIME type of the payload
    fn content_type(&self) -> &'static str;

    /// File extension used in download filenames
    fn file_extension(&self) -> &'static str;

    /// Check that rows of type `R` can be encoded at all
    ///
    /// Runs before the first byte is written.
    fn prepare<R: ExportRow>(&self) -> ExportResult<()> {
        Ok(())
    }

    /// Bytes written before the first row
    fn prefix(&self) -> &'static [u8] {
        b""
    }

    /// Encode one row
    ///
    /// # Arguments
    /// * `row` - Row to encode
    /// * `index` - Zero-based position of the row in the payload
    ///
    /// # Returns
    /// * `ExportResult<Vec<u8>>` - Encoded bytes, or `EncodeFailure` for this row
    fn encode<R: ExportRow>(&self, row: &R, index: u64) -> ExportResult<Vec<u8>>;

    /// Bytes written after the last row
    fn suffix(&self) -> &'static [u8] {
        b""
    }

    /// In-band line that terminates the payload after an error
    ///
    /// Formats without a marker return `None`; the stream is then aborted.
    fn error_marker(&self, _err: &ExportError, _last_id: Option<i64>) -> Option<Vec<u8>> {
        None
    }
}

/// Encoder for a negotiated format
#[derive(Debug, Clone)]
pub enum FormatEncoder {
    Binary(MsgpackEncoder),
    Lines(NdjsonEncoder),
    Array(JsonArrayEncoder),
}

impl FormatEncoder {
    /// Resolve the encoder for a format
    ///
    /// # Arguments
    /// * `format` - Negotiated format
    /// * `binary` - Shared binary encoder options
    pub fn for_format(format: ExportFormat, binary: Arc<BinaryOptions>) -> Self {
        match format {
            ExportFormat::BinaryCompact => FormatEncoder::Binary(MsgpackEncoder::new(binary)),
            ExportFormat::LineDelimited => FormatEncoder::Lines(NdjsonEncoder),
            ExportFormat::BufferedArray => FormatEncoder::Array(JsonArrayEncoder),
        }
    }

    /// Format this encoder produces
    pub fn format(&self) -> ExportFormat {
        match self {
            FormatEncoder::Binary(_) => ExportFormat::BinaryCompact,
            FormatEncoder::Lines(_) => ExportFormat::LineDelimited,
            FormatEncoder::Array(_) => ExportFormat::BufferedArray,
        }
    }

    /// Whether the format can carry an in-band error marker
    pub fn supports_marker(&self) -> bool {
        matches!(self, FormatEncoder::Lines(_))
    }
}

impl RowEncoder for FormatEncoder {
    fn content_type(&self) -> &'static str {
        match self {
            FormatEncoder::Binary(e) => e.content_type(),
            FormatEncoder::Lines(e) => e.content_type(),
            FormatEncoder::Array(e) => e.content_type(),
        }
    }

    fn file_extension(&self) -> &'static str {
        match self {
            FormatEncoder::Binary(e) => e.file_extension(),
            FormatEncoder::Lines(e) => e.file_extension(),
            FormatEncoder::Array(e) => e.file_extension(),
        }
    }

    fn prepare<R: ExportRow>(&self) -> ExportResult<()> {
        match self {
            FormatEncoder::Binary(e) => e.prepare::<R>(),
            FormatEncoder::Lines(e) => e.prepare::<R>(),
            FormatEncoder::Array(e) => e.prepare::<R>(),
        }
    }

    fn prefix(&self) -> &'static [u8] {
        match self {
            FormatEncoder::Binary(e) => e.prefix(),
            FormatEncoder::Lines(e) => e.prefix(),
            FormatEncoder::Array(e) => e.prefix(),
        }
    }

    fn encode<R: ExportRow>(&self, row: &R, index: u64) -> ExportResult<Vec<u8>> {
        match self {
            FormatEncoder::Binary(e) => e.encode(row, index),
            FormatEncoder::Lines(e) => e.encode(row, index),
            FormatEncoder::Array(e) => e.encode(row, index),
        }
    }

    fn suffix(&self) -> &'static [u8] {
        match self {
            FormatEncoder::Binary(e) => e.suffix(),
            FormatEncoder::Lines(e) => e.suffix(),
            FormatEncoder::Array(e) => e.suffix(),
        }
    }

    fn error_marker(&self, err: &ExportError, last_id: Option<i64>) -> Option<Vec<u8>> {
        match self {
            FormatEncoder::Binary(e) => e.error_marker(err, last_id),
            FormatEncoder::Lines(e) => e.error_marker(err, last_id),
            FormatEncoder::Array(e) => e.error_marker(err, last_id),
        }
    }
}

/// Rows read back from a payload
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<R> {
    /// Rows in payload order
    pub rows: Vec<R>,
    /// Trailing in-band marker, line-delimited payloads only
    pub marker: Option<ErrorInfo>,
}

/// Decode a complete payload
///
/// # Arguments
/// * `format` - Wire format of the payload
/// * `bytes` - Payload bytes
///
/// # Returns
/// * `Result<Decoded<R>>` - Rows plus the trailing marker, if any
pub fn decode_rows<R: ExportRow>(format: ExportFormat, bytes: &[u8]) -> Result<Decoded<R>> {
    match format {
        ExportFormat::LineDelimited => decode_lines(bytes),
        ExportFormat::BufferedArray => {
            let rows = serde_json::from_slice(bytes)
                .map_err(|e| StorefrontError::Generic(format!("Invalid JSON array payload: {e}")))?;
            Ok(Decoded { rows, marker: None })
        }
        ExportFormat::BinaryCompact => decode_packed(bytes),
    }
}

fn decode_lines<R: ExportRow>(bytes: &[u8]) -> Result<Decoded<R>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| StorefrontError::Generic(format!("NDJSON payload is not UTF-8: {e}")))?;

    let mut rows = Vec::new();
    let mut marker = None;
    for (line_no, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        if marker.is_some() {
            return Err(format!("Line {} follows the terminating marker", line_no + 1).into());
        }

        let value: Value = serde_json::from_str(line)
            .map_err(|e| StorefrontError::Generic(format!("Line {}: {e}", line_no + 1)))?;
        if is_marker(&value) {
            let response: ErrorResponse = serde_json::from_value(value)
                .map_err(|e| StorefrontError::Generic(format!("Line {}: {e}", line_no + 1)))?;
            marker = Some(response.error);
        } else {
            let row = serde_json::from_value(value)
                .map_err(|e| StorefrontError::Generic(format!("Line {}: {e}", line_no + 1)))?;
            rows.push(row);
        }
    }

    Ok(Decoded { rows, marker })
}

fn is_marker(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.len() == 1 && object.contains_key("error"))
}

fn decode_packed<R: ExportRow>(bytes: &[u8]) -> Result<Decoded<R>> {
    let mut reader = bytes;
    let mut rows = Vec::new();
    while !reader.is_empty() {
        let row = rmp_serde::from_read(&mut reader).map_err(|e| {
            StorefrontError::Generic(format!("Invalid MessagePack row {}: {e}", rows.len() + 1))
        })?;
        rows.push(row);
    }
    Ok(Decoded { rows, marker: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProductRow;

    fn options() -> Arc<BinaryOptions> {
        Arc::new(BinaryOptions::new(SchemaRegistry::new().with::<ProductRow>()))
    }

    fn payload(encoder: &FormatEncoder, rows: &[ProductRow]) -> Vec<u8> {
        let mut bytes = encoder.prefix().to_vec();
        for (index, row) in rows.iter().enumerate() {
            bytes.extend(encoder.encode(row, index as u64).unwrap());
        }
        bytes.extend_from_slice(encoder.suffix());
        bytes
    }

    #[test]
    fn test_each_format_reads_back() {
        let rows: Vec<ProductRow> = (1..=3).map(ProductRow::synthetic).collect();
        for format in [
            ExportFormat::BinaryCompact,
            ExportFormat::LineDelimited,
            ExportFormat::BufferedArray,
        ] {
            let encoder = FormatEncoder::for_format(format, options());
            assert_eq!(encoder.format(), format);
            let decoded: Decoded<ProductRow> = decode_rows(format, &payload(&encoder, &rows)).unwrap();
            assert_eq!(decoded.rows, rows, "{format:?}");
        }
    }

    #[test]
    fn test_only_lines_support_marker() {
        let err = ExportError::UpstreamUnavailable("down".into());
        let lines = FormatEncoder::for_format(ExportFormat::LineDelimited, options());
        let array = FormatEncoder::for_format(ExportFormat::BufferedArray, options());
        assert!(lines.supports_marker());
        assert!(lines.error_marker(&err, Some(1)).is_some());
        assert!(!array.supports_marker());
        assert!(array.error_marker(&err, Some(1)).is_none());
    }

    #[test]
    fn test_marker_line_decodes_as_marker() {
        let mut bytes = serde_json::to_vec(&ProductRow::synthetic(1)).unwrap();
        bytes.push(b'\n');
        bytes.extend_from_slice(br#"{"error":{"code":"encode_failure","message":"x","lastId":1}}"#);
        bytes.push(b'\n');

        let decoded: Decoded<ProductRow> = decode_rows(ExportFormat::LineDelimited, &bytes).unwrap();
        assert_eq!(decoded.rows.len(), 1);
        let marker = decoded.marker.unwrap();
        assert_eq!(marker.code, "encode_failure");
        assert_eq!(marker.last_id, Some(1));
    }

    #[test]
    fn test_truncated_binary_fails_to_decode() {
        let encoder = FormatEncoder::for_format(ExportFormat::BinaryCompact, options());
        let bytes = payload(&encoder, &[ProductRow::synthetic(1), ProductRow::synthetic(2)]);
        let result = decode_rows::<ProductRow>(ExportFormat::BinaryCompact, &bytes[..bytes.len() - 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_array_fails_to_decode() {
        let result = decode_rows::<ProductRow>(ExportFormat::BufferedArray, b"[{\"id\":1");
        assert!(result.is_err());
    }
}
