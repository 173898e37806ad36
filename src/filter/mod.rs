//! Filter builder
//!
//! Translates the optional export/list query parameters into a conjunctive
//! [`FilterSpec`]. A spec can be evaluated in-process against a
//! [`FilterTarget`] or pushed down to MongoDB as a query document.
//!
//! Contradictory input such as `minPrice > maxPrice` is accepted as is and
//! simply matches nothing.

use bson::{Bson, Document, doc};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{FilterTarget, timestamp};

/// Optional filter parameters as supplied by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParams {
    /// Exact category identifier
    pub category_id: Option<i64>,
    /// Inclusive lower price bound
    pub min_price: Option<f64>,
    /// Inclusive upper price bound
    pub max_price: Option<f64>,
    /// Stock flag
    pub in_stock: Option<bool>,
    /// Strict lower bound on the modification timestamp
    pub modified_after: Option<DateTime<Utc>>,
}

/// A single predicate on one row field
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    CategoryEq(i64),
    PriceAtLeast(f64),
    PriceAtMost(f64),
    InStock(bool),
    ModifiedAfter(DateTime<Utc>),
}

impl Clause {
    /// Evaluate the clause against a row
    pub fn matches<T: FilterTarget + ?Sized>(&self, row: &T) -> bool {
        match self {
            Clause::CategoryEq(id) => row.category_id() == Some(*id),
            Clause::PriceAtLeast(min) => row.price().is_some_and(|p| p >= *min),
            Clause::PriceAtMost(max) => row.price().is_some_and(|p| p <= *max),
            Clause::InStock(flag) => row.in_stock() == Some(*flag),
            Clause::ModifiedAfter(ts) => row.modified_at().is_some_and(|m| m > *ts),
        }
    }

    /// Serialized field name the clause applies to
    pub fn field(&self) -> &'static str {
        match self {
            Clause::CategoryEq(_) => "categoryId",
            Clause::PriceAtLeast(_) | Clause::PriceAtMost(_) => "price",
            Clause::InStock(_) => "inStock",
            Clause::ModifiedAfter(_) => "modifiedAt",
        }
    }

    fn to_document(&self) -> Document {
        let (op, value) = match self {
            Clause::CategoryEq(id) => ("$eq", Bson::Int64(*id)),
            Clause::PriceAtLeast(min) => ("$gte", Bson::Double(*min)),
            Clause::PriceAtMost(max) => ("$lte", Bson::Double(*max)),
            Clause::InStock(flag) => ("$eq", Bson::Boolean(*flag)),
            Clause::ModifiedAfter(ts) => ("$gt", Bson::String(timestamp::format(ts))),
        };
        let mut condition = Document::new();
        condition.insert(op, value);
        let mut document = Document::new();
        document.insert(self.field(), condition);
        document
    }
}

/// Conjunction of clauses. An empty spec matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    clauses: Vec<Clause>,
}

impl FilterSpec {
    /// Spec that imposes no constraint
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a spec from caller parameters
    ///
    /// # Arguments
    /// * `params` - Optional filter parameters; unset ones add no clause
    ///
    /// # Returns
    /// * `FilterSpec` - Conjunction of the set parameters
    pub fn from_params(params: &FilterParams) -> Self {
        if let (Some(min), Some(max)) = (params.min_price, params.max_price) {
            if min > max {
                debug!(min, max, "Contradictory price range, filter will match nothing");
            }
        }

        let clauses = [
            params.category_id.map(Clause::CategoryEq),
            params.min_price.map(Clause::PriceAtLeast),
            params.max_price.map(Clause::PriceAtMost),
            params.in_stock.map(Clause::InStock),
            params.modified_after.map(Clause::ModifiedAfter),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self { clauses }
    }

    /// Add one clause
    pub fn with(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Clauses in insertion order
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Whether the spec matches every row
    pub fn is_unconstrained(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate every clause against a row
    pub fn matches<T: FilterTarget + ?Sized>(&self, row: &T) -> bool {
        self.clauses.iter().all(|clause| clause.matches(row))
    }

    /// Render the spec as a MongoDB query document
    ///
    /// A single clause renders as `{field: {op: value}}`; several clauses
    /// are wrapped in `$and` so that two bounds on one field never collide.
    pub fn to_document(&self) -> Document {
        match self.clauses.as_slice() {
            [] => Document::new(),
            [only] => only.to_document(),
            many => {
                let parts: Vec<Bson> = many
                    .iter()
                    .map(|clause| Bson::Document(clause.to_document()))
                    .collect();
                doc! { "$and": parts }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProductRow;

    #[test]
    fn test_empty_params_match_everything() {
        let spec = FilterSpec::from_params(&FilterParams::default());
        assert!(spec.is_unconstrained());
        assert!(spec.matches(&ProductRow::synthetic(1)));
        assert!(spec.to_document().is_empty());
    }

    #[test]
    fn test_clauses_are_conjunctive() {
        let params = FilterParams {
            category_id: Some(3),
            in_stock: Some(true),
            ..Default::default()
        };
        let spec = FilterSpec::from_params(&params);
        assert_eq!(spec.clauses().len(), 2);
        // 13: category 3, in stock; 3: category 3, out of stock
        assert!(spec.matches(&ProductRow::synthetic(13)));
        assert!(!spec.matches(&ProductRow::synthetic(3)));
    }

    #[test]
    fn test_contradictory_range_matches_nothing() {
        let params = FilterParams {
            min_price: Some(500.0),
            max_price: Some(100.0),
            ..Default::default()
        };
        let spec = FilterSpec::from_params(&params);
        assert!((1..=2000).map(ProductRow::synthetic).all(|r| !spec.matches(&r)));
    }

    #[test]
    fn test_price_clause_excludes_null_price() {
        let row = ProductRow {
            price: None,
            ..ProductRow::synthetic(1)
        };
        assert!(!FilterSpec::all().with(Clause::PriceAtMost(1e9)).matches(&row));
    }

    #[test]
    fn test_modified_after_is_strict() {
        let row = ProductRow::synthetic(10);
        let spec = FilterSpec::all().with(Clause::ModifiedAfter(row.modified_at));
        assert!(!spec.matches(&row));
        assert!(spec.matches(&ProductRow::synthetic(11)));
    }

    #[test]
    fn test_to_document_single_and_multi() {
        let single = FilterSpec::all().with(Clause::CategoryEq(3)).to_document();
        assert_eq!(single, doc! { "categoryId": { "$eq": 3_i64 } });

        let multi = FilterSpec::all()
            .with(Clause::PriceAtLeast(1.0))
            .with(Clause::PriceAtMost(2.0))
            .to_document();
        let parts = multi.get_array("$and").unwrap();
        assert_eq!(parts.len(), 2);
    }
}
