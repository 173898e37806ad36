//! Fixed-width RFC 3339 timestamps
//!
//! Row timestamps are always rendered as `YYYY-MM-DDTHH:MM:SS.mmmZ` so that
//! string comparison in the store orders the same way as time does. The
//! module doubles as a `#[serde(with = "timestamp")]` helper; formats that
//! are not human readable get epoch milliseconds instead of text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer, de};

/// Output format for every persisted or exported timestamp
pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Render a timestamp in the canonical fixed-width form
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(FORMAT).to_string()
}

/// Parse any RFC 3339 timestamp into UTC
pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(&format(ts))
    } else {
        serializer.serialize_i64(ts.timestamp_millis())
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    if !deserializer.is_human_readable() {
        let millis = i64::deserialize(deserializer)?;
        return DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {millis}")));
    }
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid RFC 3339 timestamp: {raw}")))
}
