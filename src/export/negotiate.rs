//! Format negotiation
//!
//! Picks the export wire format from an explicit `format` parameter or the
//! `Accept` header. Negotiation never fails: anything unrecognized falls back
//! to the buffered JSON array.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::encoders::{json_array, msgpack, ndjson};

/// Export wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    /// Positional MessagePack values
    BinaryCompact,
    /// Newline-delimited JSON
    LineDelimited,
    /// A single JSON array
    #[default]
    BufferedArray,
}

impl ExportFormat {
    /// Resolve the format for a request
    ///
    /// # Arguments
    /// * `explicit` - Value of the `format` parameter; wins when recognized
    /// * `accept` - Raw `Accept` header
    ///
    /// # Returns
    /// * `ExportFormat` - Negotiated format; `BufferedArray` when nothing matches
    pub fn negotiate(explicit: Option<&str>, accept: Option<&str>) -> Self {
        if let Some(format) = explicit.and_then(Self::from_token) {
            return format;
        }

        accept
            .and_then(|header| {
                media_ranges(header)
                    .into_iter()
                    .find_map(|range| Self::from_token(&range))
            })
            .unwrap_or_default()
    }

    /// Map a format name or media type to a format
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "msgpack" | "binary" | "application/x-msgpack" | "application/msgpack" => {
                Some(ExportFormat::BinaryCompact)
            }
            "ndjson" | "jsonl" | "jsonlines" | "application/x-ndjson" | "application/jsonl" => {
                Some(ExportFormat::LineDelimited)
            }
            "json" | "array" | "application/json" => Some(ExportFormat::BufferedArray),
            _ => None,
        }
    }

    /// MIME type sent as `Content-Type`
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::BinaryCompact => msgpack::CONTENT_TYPE,
            ExportFormat::LineDelimited => ndjson::CONTENT_TYPE,
            ExportFormat::BufferedArray => json_array::CONTENT_TYPE,
        }
    }

    /// Extension used in download filenames
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::BinaryCompact => msgpack::EXTENSION,
            ExportFormat::LineDelimited => ndjson::EXTENSION,
            ExportFormat::BufferedArray => json_array::EXTENSION,
        }
    }

    /// Whether the payload is offered as a file download
    pub fn is_attachment(&self) -> bool {
        !matches!(self, ExportFormat::BufferedArray)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::BinaryCompact => "msgpack",
            ExportFormat::LineDelimited => "ndjson",
            ExportFormat::BufferedArray => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| format!("unknown export format '{s}'"))
    }
}

/// Media types of an `Accept` header, highest quality first
///
/// Ranges with equal quality keep header order; `q=0` ranges are dropped.
fn media_ranges(header: &str) -> Vec<String> {
    let mut ranges: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let media = pieces.next()?.trim();
            if media.is_empty() {
                return None;
            }
            let quality = pieces
                .filter_map(|param| {
                    let (key, value) = param.split_once('=')?;
                    if key.trim() != "q" {
                        return None;
                    }
                    value.trim().parse::<f32>().ok()
                })
                .next()
                .unwrap_or(1.0);
            Some((media.to_string(), quality))
        })
        .filter(|(_, quality)| *quality > 0.0)
        .collect();

    // sort_by is stable
    ranges.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranges.into_iter().map(|(media, _)| media).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_token_wins_over_accept() {
        let format = ExportFormat::negotiate(Some("ndjson"), Some("application/x-msgpack"));
        assert_eq!(format, ExportFormat::LineDelimited);
    }

    #[test]
    fn test_explicit_tokens_are_case_insensitive() {
        assert_eq!(
            ExportFormat::negotiate(Some("MsgPack"), None),
            ExportFormat::BinaryCompact
        );
        assert_eq!(
            ExportFormat::negotiate(Some("JsonL"), None),
            ExportFormat::LineDelimited
        );
    }

    #[test]
    fn test_unknown_explicit_falls_through_to_accept() {
        let format = ExportFormat::negotiate(Some("xml"), Some("application/x-ndjson"));
        assert_eq!(format, ExportFormat::LineDelimited);
    }

    #[test]
    fn test_accept_quality_ordering() {
        let accept = "application/json;q=0.5, application/x-ndjson;q=0.9, */*;q=0.1";
        assert_eq!(
            ExportFormat::negotiate(None, Some(accept)),
            ExportFormat::LineDelimited
        );
    }

    #[test]
    fn test_accept_ties_keep_header_order() {
        let accept = "application/msgpack, application/x-ndjson";
        assert_eq!(
            ExportFormat::negotiate(None, Some(accept)),
            ExportFormat::BinaryCompact
        );
    }

    #[test]
    fn test_zero_quality_is_ignored() {
        let accept = "application/x-msgpack;q=0, text/html";
        assert_eq!(
            ExportFormat::negotiate(None, Some(accept)),
            ExportFormat::BufferedArray
        );
    }

    #[test]
    fn test_default_is_buffered_array() {
        assert_eq!(ExportFormat::negotiate(None, None), ExportFormat::BufferedArray);
        assert_eq!(
            ExportFormat::negotiate(None, Some("*/*")),
            ExportFormat::BufferedArray
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(ExportFormat::LineDelimited.content_type(), "application/x-ndjson");
        assert_eq!(ExportFormat::BinaryCompact.extension(), "msgpack");
        assert_eq!(ExportFormat::BinaryCompact.content_type(), "application/x-msgpack");
        assert!(!ExportFormat::BufferedArray.is_attachment());
    }
}
