//! Storefront Export Library
//!
//! This library provides the streaming export engine behind the storefront
//! catalog API: a filtered, identity-ordered scan of a row store, capped at
//! a configured limit and encoded incrementally as NDJSON, a JSON array or a
//! positional MessagePack stream.
//!
//! # Modules
//!
//! - `admission`: Per-client rate limit and global export concurrency cap
//! - `cache`: Tag-based cache invalidation contract
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `export`: Guard, encoders, sinks, streaming writer and coordinator
//! - `filter`: Filter builder
//! - `model`: Row records and schemas
//! - `server`: axum HTTP transport
//! - `store`: Ordered row sources (in-memory and MongoDB)
//!
//! # Example
//!
//! ```no_run
//! use storefront::{config::Config, server};
//!
//! #[tokio::main]
//! async fn main() -> storefront::Result<()> {
//!     let mut config = Config::default();
//!     config.store.seed_rows = 10_000;
//!     server::serve(config).await
//! }
//! ```

pub mod admission;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod model;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{ExportError, Result, StorefrontError};
pub use export::{ExportCoordinator, ExportFormat, ExportRequest};
pub use model::{ExportRow, ProductRow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
