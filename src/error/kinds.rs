use std::time::Duration;
use std::{fmt, io};

/// Crate-wide `Result` type using [`StorefrontError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, StorefrontError>;

/// `Result` type for the row-at-a-time export pipeline.
///
/// Cursors, the sequence guard, encoders, sinks and the streaming writer
/// all report [`ExportError`] directly so the writer can decide per error
/// kind how to terminate the stream.
pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// Top-level error type for storefront operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum StorefrontError {
    /// Export pipeline errors.
    Export(ExportError),

    /// Admission (rate limit / concurrency) rejections.
    Admission(AdmissionError),

    /// Configuration errors.
    Config(ConfigError),

    /// Row store errors outside of a running export.
    Store(StoreError),

    /// I/O errors.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Errors raised while producing an export stream.
///
/// Every variant is cheap to clone so the streaming writer can keep the
/// abort reason in its terminal state and still hand it to the sink and
/// the log.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    /// The binary encoder has no schema for the row type.
    SchemaNotRegistered(String),

    /// The export cap was hit. A policy outcome, not a failure.
    LimitExceeded { limit: u64 },

    /// Client disconnected or the export deadline elapsed.
    Cancelled(String),

    /// A single row could not be serialized.
    EncodeFailure { id: i64, reason: String },

    /// The row store failed before or during the stream.
    UpstreamUnavailable(String),

    /// The output sink failed for a reason other than disconnect.
    Sink(String),
}

/// Admission policy rejections. Raised before any row is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Client exceeded its request quota for the current window.
    RateLimited { client: String, retry_after: Duration },

    /// Too many exports are already streaming.
    TooManyConcurrent { limit: usize },
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/// Row store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Inserted identity key is not greater than every existing key.
    NonMonotonicKey { key: i64, max: i64 },

    /// Store backend could not be reached.
    Unavailable(String),

    /// Unknown store backend name in the configuration.
    UnknownBackend(String),
}

impl ExportError {
    /// Stable machine-readable code used in error bodies and marker lines
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::SchemaNotRegistered(_) => "schema_not_registered",
            ExportError::LimitExceeded { .. } => "limit_exceeded",
            ExportError::Cancelled(_) => "cancelled",
            ExportError::EncodeFailure { .. } => "encode_failure",
            ExportError::UpstreamUnavailable(_) => "upstream_unavailable",
            ExportError::Sink(_) => "sink_error",
        }
    }

    /// Whether this error ends the stream because the consumer is gone
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExportError::Cancelled(_))
    }
}

impl StorefrontError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            StorefrontError::Export(e) => e.code(),
            StorefrontError::Admission(_) => "policy_rejected",
            StorefrontError::Config(_) => "invalid_config",
            StorefrontError::Store(StoreError::Unavailable(_)) => "upstream_unavailable",
            StorefrontError::Store(_) => "store_error",
            StorefrontError::Io(_) => "io_error",
            StorefrontError::MongoDb(_) => "upstream_unavailable",
            StorefrontError::Generic(_) => "internal_error",
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for StorefrontError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorefrontError::Export(e) => write!(f, "Export error: {e}"),
            StorefrontError::Admission(e) => write!(f, "Request rejected: {e}"),
            StorefrontError::Config(e) => write!(f, "Configuration error: {e}"),
            StorefrontError::Store(e) => write!(f, "Store error: {e}"),
            StorefrontError::Io(e) => write!(f, "I/O error: {e}"),
            StorefrontError::MongoDb(e) => write!(f, "MongoDB error: {e}"),
            StorefrontError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::SchemaNotRegistered(row_type) => {
                write!(f, "No binary schema registered for row type '{row_type}'")
            }
            ExportError::LimitExceeded { limit } => {
                write!(f, "Export limit of {limit} rows exceeded")
            }
            ExportError::Cancelled(reason) => write!(f, "Export cancelled: {reason}"),
            ExportError::EncodeFailure { id, reason } => {
                write!(f, "Failed to encode row {id}: {reason}")
            }
            ExportError::UpstreamUnavailable(msg) => write!(f, "Row store unavailable: {msg}"),
            ExportError::Sink(msg) => write!(f, "Output sink failed: {msg}"),
        }
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::RateLimited {
                client,
                retry_after,
            } => write!(
                f,
                "Rate limit exceeded for {client}, retry after {}s",
                retry_after.as_secs().max(1)
            ),
            AdmissionError::TooManyConcurrent { limit } => {
                write!(f, "Too many concurrent exports (limit {limit})")
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NonMonotonicKey { key, max } => {
                write!(f, "Identity key {key} is not greater than current maximum {max}")
            }
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {msg}"),
            StoreError::UnknownBackend(name) => write!(f, "Unknown store backend: {name}"),
        }
    }
}

impl std::error::Error for StorefrontError {}
impl std::error::Error for ExportError {}
impl std::error::Error for AdmissionError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for StoreError {}

/* ========================= Conversions to StorefrontError ========================= */

impl From<io::Error> for StorefrontError {
    fn from(err: io::Error) -> Self {
        StorefrontError::Io(err)
    }
}

impl From<mongodb::error::Error> for StorefrontError {
    fn from(err: mongodb::error::Error) -> Self {
        StorefrontError::MongoDb(err)
    }
}

impl From<ExportError> for StorefrontError {
    fn from(err: ExportError) -> Self {
        StorefrontError::Export(err)
    }
}

impl From<AdmissionError> for StorefrontError {
    fn from(err: AdmissionError) -> Self {
        StorefrontError::Admission(err)
    }
}

impl From<ConfigError> for StorefrontError {
    fn from(err: ConfigError) -> Self {
        StorefrontError::Config(err)
    }
}

impl From<StoreError> for StorefrontError {
    fn from(err: StoreError) -> Self {
        StorefrontError::Store(err)
    }
}

impl From<String> for StorefrontError {
    fn from(msg: String) -> Self {
        StorefrontError::Generic(msg)
    }
}

impl From<&str> for StorefrontError {
    fn from(msg: &str) -> Self {
        StorefrontError::Generic(msg.to_owned())
    }
}

impl From<mongodb::error::Error> for ExportError {
    fn from(err: mongodb::error::Error) -> Self {
        ExportError::UpstreamUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_error_codes_are_stable() {
        assert_eq!(
            ExportError::SchemaNotRegistered("product".into()).code(),
            "schema_not_registered"
        );
        assert_eq!(ExportError::LimitExceeded { limit: 10 }.code(), "limit_exceeded");
        assert_eq!(
            ExportError::EncodeFailure {
                id: 1,
                reason: "null".into()
            }
            .code(),
            "encode_failure"
        );
    }

    #[test]
    fn test_admission_maps_to_policy_rejected() {
        let err: StorefrontError = AdmissionError::TooManyConcurrent { limit: 4 }.into();
        assert_eq!(err.code(), "policy_rejected");
        assert!(err.to_string().contains("limit 4"));
    }

    #[test]
    fn test_retry_after_never_displays_zero() {
        let err = AdmissionError::RateLimited {
            client: "10.0.0.1".into(),
            retry_after: Duration::from_millis(200),
        };
        assert!(err.to_string().ends_with("retry after 1s"));
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(ExportError::Cancelled("client disconnected".into()).is_cancellation());
        assert!(!ExportError::Sink("disk full".into()).is_cancellation());
    }
}
