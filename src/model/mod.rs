//! Row records exported by the engine
//!
//! A row is a flat, immutable projection of a persisted entity: an identity
//! key plus a handful of scalar or nullable fields. Rows never reference
//! other rows, which is what lets the pipeline encode them one at a time
//! without loading relations.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod schema;
pub mod timestamp;

pub use schema::{FieldKind, FieldSpec, RowSchema};

/// A row type that can flow through the export pipeline
pub trait ExportRow: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Row type name used as the schema registry key
    const ROW_TYPE: &'static str;

    /// Resource name used for download filenames
    const RESOURCE: &'static str;

    /// Monotonic identity key; never reused
    fn identity(&self) -> i64;

    /// Exported shape of this row type
    fn schema() -> RowSchema;
}

/// Field accessors used to evaluate a filter in-process.
///
/// A row that does not carry a field returns `None`, and any clause on
/// that field then excludes the row.
pub trait FilterTarget {
    fn category_id(&self) -> Option<i64>;
    fn price(&self) -> Option<f64>;
    fn in_stock(&self) -> Option<bool>;
    fn modified_at(&self) -> Option<DateTime<Utc>>;
}

/// Catalog product row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRow {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
    /// Nullable in storage; exports reject rows without a price
    pub price: Option<f64>,
    pub in_stock: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(with = "timestamp")]
    pub modified_at: DateTime<Utc>,
}

impl ExportRow for ProductRow {
    const ROW_TYPE: &'static str = "product";
    const RESOURCE: &'static str = "products";

    fn identity(&self) -> i64 {
        self.id
    }

    fn schema() -> RowSchema {
        RowSchema::new(
            Self::ROW_TYPE,
            vec![
                FieldSpec::required("id", FieldKind::Int),
                FieldSpec::required("name", FieldKind::String),
                FieldSpec::required("categoryId", FieldKind::Int),
                FieldSpec::required("price", FieldKind::Float),
                FieldSpec::required("inStock", FieldKind::Bool),
                FieldSpec::optional("description", FieldKind::String),
                FieldSpec::required("modifiedAt", FieldKind::DateTime),
            ],
        )
    }
}

impl FilterTarget for ProductRow {
    fn category_id(&self) -> Option<i64> {
        Some(self.category_id)
    }

    fn price(&self) -> Option<f64> {
        self.price
    }

    fn in_stock(&self) -> Option<bool> {
        Some(self.in_stock)
    }

    fn modified_at(&self) -> Option<DateTime<Utc>> {
        Some(self.modified_at)
    }
}

/// 2024-01-01T00:00:00Z
const SYNTHETIC_EPOCH: i64 = 1_704_067_200;

impl ProductRow {
    /// Deterministic demo row for `id`
    ///
    /// Ten categories, a price cycle of one thousand, every third product out
    /// of stock, one modification per minute starting at 2024-01-01.
    pub fn synthetic(id: i64) -> Self {
        Self {
            id,
            name: format!("Product {id}"),
            category_id: id.rem_euclid(10),
            price: Some(id.rem_euclid(1000) as f64 + 0.99),
            in_stock: id % 3 != 0,
            description: (id % 4 != 0).then(|| format!("Description of product {id}")),
            modified_at: DateTime::from_timestamp(SYNTHETIC_EPOCH + id * 60, 0)
                .unwrap_or_default(),
        }
    }
}

/// Generate `count` synthetic products with keys `1..=count`
pub fn synthetic_products(count: u64) -> impl Iterator<Item = ProductRow> {
    (1..=count as i64).map(ProductRow::synthetic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_serializes_camel_case() {
        let row = ProductRow::synthetic(5);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["categoryId"], 5);
        assert_eq!(json["inStock"], true);
        assert_eq!(json["modifiedAt"], "2024-01-01T00:05:00.000Z");
    }

    #[test]
    fn test_synthetic_rows_satisfy_their_schema() {
        let schema = ProductRow::schema();
        for row in synthetic_products(12) {
            let json = serde_json::to_value(&row).unwrap();
            assert!(schema.check_json(row.id, &json).is_ok(), "row {}", row.id);
        }
    }

    #[test]
    fn test_missing_price_fails_schema() {
        let row = ProductRow {
            price: None,
            ..ProductRow::synthetic(9)
        };
        let json = serde_json::to_value(&row).unwrap();
        assert!(ProductRow::schema().check_json(9, &json).is_err());
    }
}
