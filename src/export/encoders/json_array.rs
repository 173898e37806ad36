//! Buffered JSON array encoder
//!
//! Writes `[`, the rows separated by `,`, then `]`. Most JSON consumers
//! parse the array only once the closing bracket arrives, so the time to
//! the first usable row is worse than with line-delimited output even though
//! bytes flow at the same rate. Intermediaries that buffer the whole body
//! amplify that tail latency further. The format has no in-band error
//! channel; a failed stream is cut off without `]`.

use crate::error::{ExportError, ExportResult};
use crate::model::ExportRow;

use super::RowEncoder;
use super::ndjson::to_checked_value;

pub const CONTENT_TYPE: &str = "application/json";
pub const EXTENSION: &str = "json";

/// JSON array encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArrayEncoder;

impl RowEncoder for JsonArrayEncoder {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn file_extension(&self) -> &'static str {
        EXTENSION
    }

    fn prefix(&self) -> &'static [u8] {
        b"["
    }

    fn encode<R: ExportRow>(&self, row: &R, index: u64) -> ExportResult<Vec<u8>> {
        let value = to_checked_value(row)?;
        let mut bytes = Vec::with_capacity(256);
        if index > 0 {
            bytes.push(b',');
        }
        serde_json::to_writer(&mut bytes, &value).map_err(|e| ExportError::EncodeFailure {
            id: row.identity(),
            reason: e.to_string(),
        })?;
        Ok(bytes)
    }

    fn suffix(&self) -> &'static [u8] {
        b"]"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProductRow;

    #[test]
    fn test_separator_only_between_rows() {
        let first = JsonArrayEncoder.encode(&ProductRow::synthetic(1), 0).unwrap();
        let second = JsonArrayEncoder.encode(&ProductRow::synthetic(2), 1).unwrap();
        assert_eq!(first[0], b'{');
        assert_eq!(second[0], b',');
    }

    #[test]
    fn test_empty_payload_is_valid_array() {
        let mut bytes = JsonArrayEncoder.prefix().to_vec();
        bytes.extend_from_slice(JsonArrayEncoder.suffix());
        let rows: Vec<ProductRow> = serde_json::from_slice(&bytes).unwrap();
        assert!(rows.is_empty());
    }
}
