//! Error handling module for the storefront export engine.
//!
//! This module provides:
//! - A top-level [`StorefrontError`] wrapping the specific error kinds
//! - [`ExportError`], the taxonomy seen by the streaming pipeline
//! - JSON error bodies shared by HTTP responses and in-band stream markers
//!
//! # Example
//!
//! ```rust
//! use storefront::error::{ErrorResponse, ExportError};
//!
//! let marker = ErrorResponse::marker(&ExportError::LimitExceeded { limit: 10 }, Some(7));
//! assert_eq!(marker.error.code, "limit_exceeded");
//! ```

pub mod kinds;
pub mod response;

// Re-export commonly used types
pub use kinds::{
    AdmissionError, ConfigError, ExportError, ExportResult, Result, StoreError, StorefrontError,
};
pub use response::{ErrorInfo, ErrorResponse};
