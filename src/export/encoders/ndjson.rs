//! Line-delimited JSON encoder
//!
//! One compact JSON object per row, each terminated by `\n`. Every line is
//! independently parseable, so a consumer can act on the first row as soon
//! as its line arrives. A failed stream ends with a single marker line of
//! the form `{"error":{"code":..,"message":..,"lastId":..}}`.

use serde_json::Value;

use crate::error::{ErrorResponse, ExportError, ExportResult};
use crate::model::ExportRow;

use super::RowEncoder;

pub const CONTENT_TYPE: &str = "application/x-ndjson";
pub const EXTENSION: &str = "ndjson";

/// NDJSON encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct NdjsonEncoder;

impl RowEncoder for NdjsonEncoder {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn file_extension(&self) -> &'static str {
        EXTENSION
    }

    fn encode<R: ExportRow>(&self, row: &R, _index: u64) -> ExportResult<Vec<u8>> {
        let value = to_checked_value(row)?;
        let mut line = serde_json::to_vec(&value).map_err(|e| ExportError::EncodeFailure {
            id: row.identity(),
            reason: e.to_string(),
        })?;
        line.push(b'\n');
        Ok(line)
    }

    fn error_marker(&self, err: &ExportError, last_id: Option<i64>) -> Option<Vec<u8>> {
        let json = ErrorResponse::marker(err, last_id).to_json_compact().ok()?;
        let mut line = json.into_bytes();
        line.push(b'\n');
        Some(line)
    }
}

/// Serialize a row to JSON and check it against the row schema
pub(crate) fn to_checked_value<R: ExportRow>(row: &R) -> ExportResult<Value> {
    let id = row.identity();
    let value = serde_json::to_value(row).map_err(|e| ExportError::EncodeFailure {
        id,
        reason: e.to_string(),
    })?;
    R::schema().check_json(id, &value)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProductRow;

    #[test]
    fn test_one_line_per_row() {
        let bytes = NdjsonEncoder.encode(&ProductRow::synthetic(1), 0).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        let parsed: ProductRow = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.id, 1);
    }

    #[test]
    fn test_null_price_is_encode_failure() {
        let row = ProductRow {
            price: None,
            ..ProductRow::synthetic(42)
        };
        let err = NdjsonEncoder.encode(&row, 0).unwrap_err();
        assert!(matches!(err, ExportError::EncodeFailure { id: 42, .. }));
    }

    #[test]
    fn test_marker_is_single_json_line() {
        let err = ExportError::EncodeFailure {
            id: 43,
            reason: "bad".into(),
        };
        let marker = NdjsonEncoder.error_marker(&err, Some(42)).unwrap();
        let text = String::from_utf8(marker).unwrap();
        assert!(text.ends_with('\n'));
        let value: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["error"]["code"], "encode_failure");
        assert_eq!(value["error"]["lastId"], 42);
    }
}
