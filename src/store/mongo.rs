//! MongoDB row store
//!
//! Rows are stored with `_id` set to the identity key, so ordering and
//! cursor resumption use the primary index: `find({_id: {$gt: cursor}, ...})`
//! sorted by `{_id: 1}`. The driver cursor fetches `batch_size` documents per
//! round trip and is killed on the server when it is dropped.

use std::marker::PhantomData;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Cursor};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{ExportError, ExportResult, Result, StoreError};
use crate::filter::FilterSpec;
use crate::model::ExportRow;

use super::{OrderedRows, RowCursor, RowSource};

/// Row source backed by a MongoDB collection
#[derive(Clone)]
pub struct MongoRowSource {
    collection: Collection<Document>,
    batch_size: u32,
}

impl MongoRowSource {
    /// Connect using the store section of the configuration
    ///
    /// # Arguments
    /// * `config` - Store configuration (uri, database, collection, batch size)
    ///
    /// # Returns
    /// * `Result<Self>` - Connected source, or `StoreError::Unavailable`
    ///   when the deployment does not answer a ping
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.max_pool_size = Some(config.max_pool_size);

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let collection = client
            .database(&config.database)
            .collection::<Document>(&config.collection);

        info!(
            "MongoDB row source ready: {}.{}",
            config.database, config.collection
        );

        Ok(Self::new(collection, config.batch_size))
    }

    /// Wrap an existing collection handle
    pub fn new(collection: Collection<Document>, batch_size: u32) -> Self {
        Self {
            collection,
            batch_size: batch_size.max(1),
        }
    }

    /// Underlying collection handle
    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    /// Query document for a filtered scan resuming after `cursor`
    pub(crate) fn query_document(filter: &FilterSpec, cursor: Option<i64>) -> Document {
        let filter_doc = filter.to_document();
        let Some(after) = cursor else {
            return filter_doc;
        };

        let bound = doc! { "_id": { "$gt": after } };
        if filter_doc.is_empty() {
            bound
        } else {
            doc! { "$and": [bound, filter_doc] }
        }
    }
}

#[async_trait]
impl<R: ExportRow> RowSource<R> for MongoRowSource {
    async fn open(
        &self,
        filter: &FilterSpec,
        cursor: Option<i64>,
    ) -> ExportResult<OrderedRows<R>> {
        let query = Self::query_document(filter, cursor);
        debug!("Opening MongoDB scan with query {}", query);

        let handle = self
            .collection
            .find(query)
            .sort(doc! { "_id": 1 })
            .batch_size(self.batch_size)
            .await?;

        Ok(OrderedRows::new(
            Box::new(MongoCursor::<R>::new(handle)),
            cursor,
            "mongodb",
        ))
    }
}

/// Driver cursor yielding typed rows
pub struct MongoCursor<R> {
    cursor: Option<Cursor<Document>>,
    total_fetched: u64,
    closed: bool,
    _row: PhantomData<fn() -> R>,
}

impl<R> MongoCursor<R> {
    fn new(cursor: Cursor<Document>) -> Self {
        Self {
            cursor: Some(cursor),
            total_fetched: 0,
            closed: false,
            _row: PhantomData,
        }
    }
}

#[async_trait]
impl<R: ExportRow> RowCursor<R> for MongoCursor<R> {
    async fn next_row(&mut self) -> ExportResult<Option<R>> {
        if self.closed {
            return Ok(None);
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        match cursor.try_next().await {
            Ok(Some(document)) => {
                self.total_fetched += 1;
                decode_document(document).map(Some)
            }
            Ok(None) => {
                debug!(
                    "MongoDB cursor exhausted after {} documents",
                    self.total_fetched
                );
                self.cursor = None;
                self.closed = true;
                Ok(None)
            }
            Err(e) => {
                self.cursor = None;
                self.closed = true;
                Err(e.into())
            }
        }
    }

    async fn close(&mut self) -> ExportResult<()> {
        if !self.closed {
            // Dropping the driver cursor kills it on the server
            self.cursor = None;
            self.closed = true;
            debug!(
                "Closed MongoDB cursor after fetching {} documents",
                self.total_fetched
            );
        }
        Ok(())
    }
}

impl<R> Drop for MongoCursor<R> {
    fn drop(&mut self) {
        if !self.closed {
            debug!("MongoCursor dropped without explicit close");
            self.cursor = None;
        }
    }
}

/// Move `_id` back to `id` and deserialize the row
fn decode_document<R: ExportRow>(mut document: Document) -> ExportResult<R> {
    let id = match document.remove("_id") {
        Some(Bson::Int64(id)) => id,
        Some(Bson::Int32(id)) => i64::from(id),
        other => {
            return Err(ExportError::UpstreamUnavailable(format!(
                "document _id is not an integer identity key: {other:?}"
            )));
        }
    };
    document.insert("id", id);

    bson::from_document(document).map_err(|e| ExportError::EncodeFailure {
        id,
        reason: e.to_string(),
    })
}

/// Render a row as a stored document with `_id` = identity
pub fn to_stored_document<R: ExportRow>(row: &R) -> ExportResult<Document> {
    let id = row.identity();
    let mut document = bson::to_document(row).map_err(|e| ExportError::EncodeFailure {
        id,
        reason: e.to_string(),
    })?;
    document.remove("id");

    let mut stored = doc! { "_id": id };
    stored.extend(document);
    Ok(stored)
}

/// Insert rows into a collection, used by `serve` to seed demo data
pub async fn seed_collection<R: ExportRow>(
    collection: &Collection<Document>,
    rows: impl IntoIterator<Item = R>,
) -> Result<u64> {
    let documents = rows
        .into_iter()
        .map(|row| to_stored_document(&row))
        .collect::<ExportResult<Vec<_>>>()?;
    if documents.is_empty() {
        return Ok(0);
    }

    let inserted = collection.insert_many(documents).await?;
    Ok(inserted.inserted_ids.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Clause;
    use crate::model::ProductRow;

    #[tokio::test]
    async fn test_unreachable_deployment_is_unavailable() {
        let config = StoreConfig {
            uri: "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200&connectTimeoutMS=200"
                .to_string(),
            ..Default::default()
        };
        let err = MongoRowSource::connect(&config).await.err().unwrap();
        assert!(matches!(
            err,
            crate::error::StorefrontError::Store(StoreError::Unavailable(_))
        ));
        assert_eq!(err.code(), "upstream_unavailable");
    }

    #[test]
    fn test_query_without_cursor_is_plain_filter() {
        let filter = FilterSpec::all().with(Clause::InStock(true));
        let query = MongoRowSource::query_document(&filter, None);
        assert_eq!(query, doc! { "inStock": { "$eq": true } });
    }

    #[test]
    fn test_query_with_cursor_only() {
        let query = MongoRowSource::query_document(&FilterSpec::all(), Some(40));
        assert_eq!(query, doc! { "_id": { "$gt": 40_i64 } });
    }

    #[test]
    fn test_query_combines_cursor_and_filter() {
        let filter = FilterSpec::all().with(Clause::CategoryEq(2));
        let query = MongoRowSource::query_document(&filter, Some(7));
        let parts = query.get_array("$and").unwrap();
        assert_eq!(parts[0], Bson::Document(doc! { "_id": { "$gt": 7_i64 } }));
    }

    #[test]
    fn test_stored_document_round_trip() {
        let row = ProductRow::synthetic(12);
        let stored = to_stored_document(&row).unwrap();
        assert_eq!(stored.get_i64("_id").unwrap(), 12);
        assert!(!stored.contains_key("id"));
        // Stored as text so range pushdown compares like the filter renders
        assert_eq!(stored.get_str("modifiedAt").unwrap(), "2024-01-01T00:12:00.000Z");

        let decoded: ProductRow = decode_document(stored).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_non_integer_id_is_rejected() {
        let err = decode_document::<ProductRow>(doc! { "_id": "abc" }).unwrap_err();
        assert_eq!(err.code(), "upstream_unavailable");
    }

    #[test]
    fn test_undecodable_document_names_row() {
        let err = decode_document::<ProductRow>(doc! { "_id": 5_i64, "name": 3 }).unwrap_err();
        assert!(matches!(err, ExportError::EncodeFailure { id: 5, .. }));
    }
}
