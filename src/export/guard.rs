//! Bounded sequence guard
//!
//! Caps an ordered row sequence at `max_items` and tells the writer whether
//! the cap truncated anything. The guard reads at most one row beyond the
//! cap to find out, and never yields it.

use tracing::debug;

use crate::error::ExportResult;
use crate::model::ExportRow;
use crate::store::OrderedRows;

/// Outcome of one pull through the guard
#[derive(Debug, Clone, PartialEq)]
pub enum Pull<R> {
    /// Next row, unchanged
    Row(R),
    /// The cap was reached and at least one further row exists
    LimitReached,
    /// The source ran out at or before the cap
    Exhausted,
}

impl<R> Pull<R> {
    /// Whether no further rows will be yielded
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Pull::Row(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    LimitReached,
    Exhausted,
}

impl<R> From<Terminal> for Pull<R> {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::LimitReached => Pull::LimitReached,
            Terminal::Exhausted => Pull::Exhausted,
        }
    }
}

/// Row sequence capped at a fixed number of items
pub struct BoundedRows<R> {
    rows: OrderedRows<R>,
    max_items: u64,
    yielded: u64,
    last_yielded: Option<i64>,
    terminal: Option<Terminal>,
}

impl<R: ExportRow> BoundedRows<R> {
    /// Wrap an ordered sequence
    ///
    /// # Arguments
    /// * `rows` - Ordered source sequence
    /// * `max_items` - Maximum rows yielded
    pub fn new(rows: OrderedRows<R>, max_items: u64) -> Self {
        Self {
            rows,
            max_items,
            yielded: 0,
            last_yielded: None,
            terminal: None,
        }
    }

    /// Pull the next row or the terminal outcome
    ///
    /// Once a terminal value has been returned the source is closed and every
    /// later call returns the same value. Source failures are returned as
    /// `Err` and also close the source.
    pub async fn pull(&mut self) -> ExportResult<Pull<R>> {
        if let Some(terminal) = self.terminal {
            return Ok(terminal.into());
        }

        if self.yielded >= self.max_items {
            // Peek one row past the cap
            let more = self.rows.next().await?.is_some();
            let terminal = if more {
                Terminal::LimitReached
            } else {
                Terminal::Exhausted
            };
            return self.finish(terminal).await;
        }

        match self.rows.next().await? {
            Some(row) => {
                self.yielded += 1;
                self.last_yielded = Some(row.identity());
                Ok(Pull::Row(row))
            }
            None => self.finish(Terminal::Exhausted).await,
        }
    }

    async fn finish(&mut self, terminal: Terminal) -> ExportResult<Pull<R>> {
        self.terminal = Some(terminal);
        self.rows.close().await?;
        if terminal == Terminal::LimitReached {
            debug!("Export cap of {} rows reached", self.max_items);
        }
        Ok(terminal.into())
    }

    /// Release the underlying source. Idempotent.
    pub async fn close(&mut self) -> ExportResult<()> {
        self.rows.close().await
    }

    /// Whether the underlying source has been released
    pub fn is_closed(&self) -> bool {
        self.rows.is_closed()
    }

    /// Rows yielded so far
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// The cap
    pub fn max_items(&self) -> u64 {
        self.max_items
    }

    /// Identity key of the last yielded row; the peeked row is never counted
    pub fn last_key(&self) -> Option<i64> {
        self.last_yielded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSpec;
    use crate::model::{ProductRow, synthetic_products};
    use crate::store::{InMemoryStore, RowSource};

    async fn guarded(total: u64, cap: u64) -> (InMemoryStore<ProductRow>, BoundedRows<ProductRow>) {
        let store = InMemoryStore::with_rows(synthetic_products(total), 8);
        let rows = store.open(&FilterSpec::all(), None).await.unwrap();
        (store, BoundedRows::new(rows, cap))
    }

    async fn drain(guard: &mut BoundedRows<ProductRow>) -> (u64, Pull<ProductRow>) {
        let mut count = 0;
        loop {
            match guard.pull().await.unwrap() {
                Pull::Row(_) => count += 1,
                terminal => return (count, terminal),
            }
        }
    }

    #[tokio::test]
    async fn test_under_cap_is_exhausted() {
        let (store, mut guard) = guarded(5, 10).await;
        assert_eq!(drain(&mut guard).await, (5, Pull::Exhausted));
        assert_eq!(store.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_exactly_at_cap_is_exhausted() {
        let (_, mut guard) = guarded(10, 10).await;
        assert_eq!(drain(&mut guard).await, (10, Pull::Exhausted));
    }

    #[tokio::test]
    async fn test_over_cap_reports_limit_reached() {
        let (store, mut guard) = guarded(11, 10).await;
        assert_eq!(drain(&mut guard).await, (10, Pull::LimitReached));
        assert_eq!(guard.last_key(), Some(10));
        assert_eq!(store.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_terminal_value_is_sticky() {
        let (_, mut guard) = guarded(3, 1).await;
        drain(&mut guard).await;
        assert_eq!(guard.pull().await.unwrap(), Pull::LimitReached);
        assert_eq!(guard.pull().await.unwrap(), Pull::LimitReached);
        assert!(guard.is_closed());
    }

    #[tokio::test]
    async fn test_zero_cap_yields_nothing() {
        let (_, mut guard) = guarded(0, 0).await;
        assert_eq!(drain(&mut guard).await, (0, Pull::Exhausted));
    }
}
