//! Streaming export engine
//!
//! Turns a large, filtered, identity-ordered result into a capped,
//! incrementally flushed payload in one of three wire formats.
//!
//! # Architecture
//!
//! 1. **BoundedRows** (`guard`): caps an ordered row sequence and reports
//!    whether the cap truncated anything
//! 2. **FormatEncoder** (`encoders`): encodes one row at a time for the
//!    negotiated format
//! 3. **ExportSink** (`sink`): receives bytes and decides when they reach
//!    the consumer
//! 4. **StreamingWriter** (`writer`): drains the sequence into the sink,
//!    flushing periodically and handling cancellation and failures
//!
//! The **ExportCoordinator** wires them together per request.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use storefront::config::ExportConfig;
//! use storefront::export::{BinaryOptions, BufferSink, ExportCoordinator, ExportRequest, SchemaRegistry};
//! use storefront::model::{ProductRow, synthetic_products};
//! use storefront::store::InMemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> storefront::error::Result<()> {
//! let store = InMemoryStore::with_rows(synthetic_products(100), 50);
//! let binary = BinaryOptions::new(SchemaRegistry::new().with::<ProductRow>());
//! let coordinator =
//!     ExportCoordinator::<ProductRow>::new(Arc::new(store), ExportConfig::default(), Arc::new(binary));
//!
//! let request = ExportRequest { format: Some("ndjson".into()), ..Default::default() };
//! let (outcome, _sink) = coordinator
//!     .export_to_sink(request, BufferSink::new(), &CancellationToken::new(), None)
//!     .await?;
//! assert_eq!(outcome.rows_written, 100);
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod encoders;
pub mod guard;
pub mod negotiate;
pub mod progress;
pub mod sink;
pub mod writer;

pub use coordinator::{ExportCoordinator, ExportRequest, ExportStream};
pub use encoders::{BinaryOptions, Decoded, FormatEncoder, RowEncoder, SchemaRegistry, decode_rows};
pub use guard::{BoundedRows, Pull};
pub use negotiate::ExportFormat;
pub use progress::ProgressTracker;
pub use sink::{BodyChunk, BufferSink, ChannelSink, ExportSink, FileSink};
pub use writer::{ExportOutcome, StreamingWriter, TruncationPolicy, WriterOptions, WriterState};
