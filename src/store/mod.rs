//! Ordered row sources
//!
//! This module abstracts the external row store behind two traits:
//!
//! 1. **RowSource**: opens a filtered scan ordered by identity key ascending,
//!    optionally resuming strictly after a cursor key
//! 2. **RowCursor**: the pull-based, lazily fetched sequence an open scan
//!    yields, with an explicit `close()` step
//!
//! [`OrderedRows`] wraps every cursor handed to the pipeline. It enforces
//! the ascending-key invariant, re-applies the cursor bound, and closes the
//! underlying store resource exactly once. Adapters also release their
//! resource on `Drop`, so an abandoned sequence never leaks a store cursor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{ExportError, ExportResult, Result};
use crate::filter::FilterSpec;
use crate::model::{ExportRow, ProductRow, synthetic_products};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoRowSource;

/// Lazily fetched rows from one open store scan
#[async_trait]
pub trait RowCursor<R>: Send {
    /// Fetch the next row
    ///
    /// # Returns
    /// * `ExportResult<Option<R>>` - Next row, or None once exhausted
    async fn next_row(&mut self) -> ExportResult<Option<R>>;

    /// Release the store resource held by this cursor
    async fn close(&mut self) -> ExportResult<()>;
}

/// Store capable of ordered, filtered, streaming scans
#[async_trait]
pub trait RowSource<R: ExportRow>: Send + Sync {
    /// Open a scan ordered by identity key ascending
    ///
    /// # Arguments
    /// * `filter` - Conjunctive filter pushed down to the store
    /// * `cursor` - Resume strictly after this key
    ///
    /// # Returns
    /// * `ExportResult<OrderedRows<R>>` - Open sequence; holds one store resource
    async fn open(&self, filter: &FilterSpec, cursor: Option<i64>)
    -> ExportResult<OrderedRows<R>>;
}

/// Ordered view over a [`RowCursor`]
pub struct OrderedRows<R> {
    inner: Option<Box<dyn RowCursor<R>>>,
    after: Option<i64>,
    last: Option<i64>,
    delivered: u64,
    source: &'static str,
}

impl<R: ExportRow> OrderedRows<R> {
    /// Wrap an adapter cursor
    ///
    /// # Arguments
    /// * `inner` - Adapter cursor
    /// * `after` - Cursor bound the scan was opened with
    /// * `source` - Adapter name for logging
    pub fn new(inner: Box<dyn RowCursor<R>>, after: Option<i64>, source: &'static str) -> Self {
        Self {
            inner: Some(inner),
            after,
            last: None,
            delivered: 0,
            source,
        }
    }

    /// Pull the next row in ascending identity order
    ///
    /// The store resource is released as soon as the sequence is exhausted
    /// or fails.
    pub async fn next(&mut self) -> ExportResult<Option<R>> {
        loop {
            let Some(inner) = self.inner.as_mut() else {
                return Ok(None);
            };

            let fetched = inner.next_row().await;
            let row = match fetched {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.close().await?;
                    return Ok(None);
                }
                Err(e) => {
                    if let Err(close_err) = self.close().await {
                        warn!("Failed to close {} cursor after error: {}", self.source, close_err);
                    }
                    return Err(e);
                }
            };

            let key = row.identity();
            if self.after.is_some_and(|after| key <= after) {
                continue;
            }
            if let Some(last) = self.last {
                if key <= last {
                    if let Err(close_err) = self.close().await {
                        warn!("Failed to close {} cursor after order violation: {}", self.source, close_err);
                    }
                    return Err(ExportError::UpstreamUnavailable(format!(
                        "{} returned key {key} after {last}; identity order violated",
                        self.source
                    )));
                }
            }

            self.last = Some(key);
            self.delivered += 1;
            return Ok(Some(row));
        }
    }

    /// Release the store resource. Idempotent.
    pub async fn close(&mut self) -> ExportResult<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.close().await?;
            debug!(
                "Closed {} row cursor after {} rows",
                self.source, self.delivered
            );
        }
        Ok(())
    }

    /// Whether the store resource has been released
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Identity key of the last delivered row
    pub fn last_key(&self) -> Option<i64> {
        self.last
    }
}

impl<R> Drop for OrderedRows<R> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            debug!("{} row cursor dropped without explicit close", self.source);
        }
    }
}

/// One page of a keyset-paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<R> {
    /// Rows in ascending identity order
    pub items: Vec<R>,
    /// Cursor for the next page; absent on the last page
    pub next_cursor: Option<i64>,
}

/// Read one keyset page
///
/// # Arguments
/// * `source` - Row store
/// * `filter` - Conjunctive filter
/// * `cursor` - Resume strictly after this key
/// * `limit` - Page size (at least one row)
///
/// # Returns
/// * `ExportResult<Page<R>>` - Rows plus the cursor for the following page
pub async fn list_page<R: ExportRow>(
    source: &dyn RowSource<R>,
    filter: &FilterSpec,
    cursor: Option<i64>,
    limit: usize,
) -> ExportResult<Page<R>> {
    let limit = limit.max(1);
    let mut rows = source.open(filter, cursor).await?;

    let collected = collect_page(&mut rows, limit).await;
    let closed = rows.close().await;
    let (items, has_more) = collected?;
    closed?;

    let next_cursor = if has_more {
        items.last().map(ExportRow::identity)
    } else {
        None
    };

    Ok(Page { items, next_cursor })
}

async fn collect_page<R: ExportRow>(
    rows: &mut OrderedRows<R>,
    limit: usize,
) -> ExportResult<(Vec<R>, bool)> {
    let mut items = Vec::with_capacity(limit);
    while items.len() < limit {
        match rows.next().await? {
            Some(row) => items.push(row),
            None => return Ok((items, false)),
        }
    }
    let has_more = rows.next().await?.is_some();
    Ok((items, has_more))
}

/// Open the product source selected by the configuration
///
/// With `seed_rows > 0` the memory backend starts with that many synthetic
/// products; a MongoDB collection is only seeded while it is empty.
///
/// # Arguments
/// * `config` - Store section of the configuration
///
/// # Returns
/// * `Result<Arc<dyn RowSource<ProductRow>>>` - Shared source or connection error
pub async fn open_configured(config: &StoreConfig) -> Result<Arc<dyn RowSource<ProductRow>>> {
    match config.backend {
        StoreBackend::Memory => {
            let store = InMemoryStore::with_rows(
                synthetic_products(config.seed_rows),
                config.batch_size as usize,
            );
            info!("In-memory product store ready with {} rows", config.seed_rows);
            Ok(Arc::new(store))
        }
        StoreBackend::Mongodb => {
            let source = MongoRowSource::connect(config).await?;
            if config.seed_rows > 0 {
                let existing = source.collection().estimated_document_count().await?;
                if existing == 0 {
                    let inserted = mongo::seed_collection(
                        source.collection(),
                        synthetic_products(config.seed_rows),
                    )
                    .await?;
                    info!("Seeded {} products into empty collection", inserted);
                } else {
                    debug!("Collection holds {} documents, skipping seed", existing);
                }
            }
            Ok(Arc::new(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProductRow;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedCursor {
        keys: VecDeque<i64>,
    }

    #[async_trait]
    impl RowCursor<ProductRow> for ScriptedCursor {
        async fn next_row(&mut self) -> ExportResult<Option<ProductRow>> {
            Ok(self.keys.pop_front().map(ProductRow::synthetic))
        }

        async fn close(&mut self) -> ExportResult<()> {
            Ok(())
        }
    }

    fn ordered(keys: &[i64], after: Option<i64>) -> OrderedRows<ProductRow> {
        let cursor = ScriptedCursor {
            keys: keys.iter().copied().collect(),
        };
        OrderedRows::new(Box::new(cursor), after, "scripted")
    }

    #[tokio::test]
    async fn test_rows_below_cursor_are_skipped() {
        let mut rows = ordered(&[3, 5, 8], Some(4));
        assert_eq!(rows.next().await.unwrap().unwrap().id, 5);
        assert_eq!(rows.next().await.unwrap().unwrap().id, 8);
        assert!(rows.next().await.unwrap().is_none());
        assert!(rows.is_closed());
    }

    #[tokio::test]
    async fn test_out_of_order_key_is_fatal() {
        let mut rows = ordered(&[1, 4, 2], None);
        rows.next().await.unwrap();
        rows.next().await.unwrap();
        let err = rows.next().await.unwrap_err();
        assert_eq!(err.code(), "upstream_unavailable");
        assert!(rows.is_closed());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_fatal() {
        let mut rows = ordered(&[1, 1], None);
        rows.next().await.unwrap();
        assert!(rows.next().await.is_err());
    }

    struct FailingClose {
        keys: VecDeque<i64>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RowCursor<ProductRow> for FailingClose {
        async fn next_row(&mut self) -> ExportResult<Option<ProductRow>> {
            Ok(self.keys.pop_front().map(ProductRow::synthetic))
        }

        async fn close(&mut self) -> ExportResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(ExportError::UpstreamUnavailable("kill cursor failed".into()))
        }
    }

    #[tokio::test]
    async fn test_order_violation_survives_failed_close() {
        let closes = Arc::new(AtomicUsize::new(0));
        let cursor = FailingClose {
            keys: VecDeque::from([7, 3]),
            closes: closes.clone(),
        };
        let mut rows = OrderedRows::<ProductRow>::new(Box::new(cursor), None, "failing");

        rows.next().await.unwrap();
        let err = rows.next().await.unwrap_err();
        assert!(err.to_string().contains("identity order violated"));
        assert!(rows.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Closing again is a no-op
        rows.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_key_tracks_delivery() {
        let mut rows = ordered(&[10, 20], None);
        assert_eq!(rows.last_key(), None);
        rows.next().await.unwrap();
        assert_eq!(rows.last_key(), Some(10));
    }
}
