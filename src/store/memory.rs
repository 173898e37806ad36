//! In-memory keyset row store
//!
//! Rows live in a `BTreeMap` keyed by identity. Cursors never copy the
//! whole map: each fetch takes a read lock, scans forward from the last
//! scanned key and buffers at most `batch_size` matching rows. Concurrent
//! inserts are visible to open cursors as long as their key lies beyond the
//! scan position, which is exactly the keyset-resumption guarantee.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{CacheInvalidator, CacheTag, NoopInvalidator};
use crate::error::{ExportResult, Result, StoreError};
use crate::filter::FilterSpec;
use crate::model::{ExportRow, FilterTarget};

use super::{OrderedRows, RowCursor, RowSource};

/// Row store backed by an ordered map
#[derive(Clone)]
pub struct InMemoryStore<R> {
    rows: Arc<RwLock<BTreeMap<i64, R>>>,
    batch_size: usize,
    open_cursors: Arc<AtomicUsize>,
    opened_total: Arc<AtomicU64>,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl<R: ExportRow + FilterTarget> InMemoryStore<R> {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `batch_size` - Rows buffered per cursor fetch
    pub fn new(batch_size: usize) -> Self {
        Self::with_rows(std::iter::empty(), batch_size)
    }

    /// Create a store pre-loaded with rows
    ///
    /// # Arguments
    /// * `rows` - Initial rows; a later row with a duplicate key replaces the earlier one
    /// * `batch_size` - Rows buffered per cursor fetch
    pub fn with_rows(rows: impl IntoIterator<Item = R>, batch_size: usize) -> Self {
        let map: BTreeMap<i64, R> = rows.into_iter().map(|row| (row.identity(), row)).collect();
        Self {
            rows: Arc::new(RwLock::new(map)),
            batch_size: batch_size.max(1),
            open_cursors: Arc::new(AtomicUsize::new(0)),
            opened_total: Arc::new(AtomicU64::new(0)),
            invalidator: Arc::new(NoopInvalidator),
        }
    }

    /// Attach the cache collaborator notified on writes
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }

    /// Append a row
    ///
    /// Identity keys are monotonic and never reused, so the new key must be
    /// greater than every stored key.
    ///
    /// # Arguments
    /// * `row` - Row to append
    ///
    /// # Returns
    /// * `Result<()>` - `NonMonotonicKey` if the key would go backwards
    pub async fn insert(&self, row: R) -> Result<()> {
        let key = row.identity();
        {
            let mut rows = self.rows.write().await;
            if let Some((&max, _)) = rows.last_key_value() {
                if key <= max {
                    return Err(StoreError::NonMonotonicKey { key, max }.into());
                }
            }
            rows.insert(key, row);
        }
        self.invalidator.invalidate(CacheTag::Lists);
        Ok(())
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Cursors currently holding a store resource
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Cursors opened since the store was created
    pub fn opened_total(&self) -> u64 {
        self.opened_total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: ExportRow + FilterTarget> RowSource<R> for InMemoryStore<R> {
    async fn open(
        &self,
        filter: &FilterSpec,
        cursor: Option<i64>,
    ) -> ExportResult<OrderedRows<R>> {
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        let lease = CursorLease::acquire(self.open_cursors.clone());

        let scan = MemoryCursor {
            rows: self.rows.clone(),
            filter: filter.clone(),
            scan_from: cursor,
            buffer: VecDeque::with_capacity(self.batch_size),
            batch_size: self.batch_size,
            exhausted: false,
            lease: Some(lease),
        };

        Ok(OrderedRows::new(Box::new(scan), cursor, "memory"))
    }
}

/// Open-cursor gauge entry, released on drop
struct CursorLease {
    gauge: Arc<AtomicUsize>,
}

impl CursorLease {
    fn acquire(gauge: Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self { gauge }
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemoryCursor<R> {
    rows: Arc<RwLock<BTreeMap<i64, R>>>,
    filter: FilterSpec,
    /// Exclusive lower bound of the next scan
    scan_from: Option<i64>,
    buffer: VecDeque<R>,
    batch_size: usize,
    exhausted: bool,
    lease: Option<CursorLease>,
}

impl<R: ExportRow + FilterTarget> MemoryCursor<R> {
    async fn fetch_batch(&mut self) {
        let rows = self.rows.read().await;
        let lower = match self.scan_from {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        let mut reached_end = true;
        for (key, row) in rows.range((lower, Bound::Unbounded)) {
            self.scan_from = Some(*key);
            if self.filter.matches(row) {
                self.buffer.push_back(row.clone());
                if self.buffer.len() >= self.batch_size {
                    reached_end = false;
                    break;
                }
            }
        }

        if reached_end {
            self.exhausted = true;
        }
    }
}

#[async_trait]
impl<R: ExportRow + FilterTarget> RowCursor<R> for MemoryCursor<R> {
    async fn next_row(&mut self) -> ExportResult<Option<R>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_batch().await;
        }

        let row = self.buffer.pop_front();
        if row.is_none() && self.lease.take().is_some() {
            debug!("Memory cursor exhausted, lease released");
        }
        Ok(row)
    }

    async fn close(&mut self) -> ExportResult<()> {
        self.buffer.clear();
        self.exhausted = true;
        self.lease = None;
        Ok(())
    }
}
