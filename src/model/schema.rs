//! Row schemas
//!
//! A [`RowSchema`] describes the exported shape of a row type: which
//! fields exist, their kind, and whether null is acceptable. Encoders use
//! it to reject a row before any of its bytes reach the sink.

use serde_json::Value;

use crate::error::{ExportError, ExportResult};

use super::timestamp;

/// Scalar kind of an exported field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    String,
    DateTime,
}

/// One field of a row schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Serialized field name
    pub name: &'static str,
    /// Expected scalar kind
    pub kind: FieldKind,
    /// Whether null (or absence) is acceptable
    pub nullable: bool,
}

impl FieldSpec {
    /// Non-nullable field
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    /// Nullable field
    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

/// Exported shape of a row type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    /// Row type name, the registry key
    pub row_type: &'static str,
    /// Declared fields in wire order
    pub fields: Vec<FieldSpec>,
}

impl RowSchema {
    /// Create a schema
    ///
    /// # Arguments
    /// * `row_type` - Row type name
    /// * `fields` - Field declarations
    pub fn new(row_type: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { row_type, fields }
    }

    /// Check a row rendered as JSON against the schema
    ///
    /// # Arguments
    /// * `id` - Identity key of the row, for the error report
    /// * `value` - Serialized row
    ///
    /// # Returns
    /// * `ExportResult<()>` - `EncodeFailure` naming the first offending field
    pub fn check_json(&self, id: i64, value: &Value) -> ExportResult<()> {
        let object = value.as_object().ok_or_else(|| ExportError::EncodeFailure {
            id,
            reason: "row did not serialize to an object".to_string(),
        })?;

        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) => self.check_null(id, field)?,
                Some(value) => {
                    let ok = match field.kind {
                        FieldKind::Int => value.is_i64(),
                        FieldKind::Float => value.is_number(),
                        FieldKind::Bool => value.is_boolean(),
                        FieldKind::String => value.is_string(),
                        FieldKind::DateTime => {
                            value.as_str().and_then(timestamp::parse).is_some()
                        }
                    };
                    if !ok {
                        return Err(mismatch(id, field));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_null(&self, id: i64, field: &FieldSpec) -> ExportResult<()> {
        if field.nullable {
            Ok(())
        } else {
            Err(ExportError::EncodeFailure {
                id,
                reason: format!(
                    "non-nullable field '{}' of {} is null",
                    field.name, self.row_type
                ),
            })
        }
    }
}

fn mismatch(id: i64, field: &FieldSpec) -> ExportError {
    ExportError::EncodeFailure {
        id,
        reason: format!("field '{}' is not a {:?}", field.name, field.kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> RowSchema {
        RowSchema::new(
            "widget",
            vec![
                FieldSpec::required("id", FieldKind::Int),
                FieldSpec::required("weight", FieldKind::Float),
                FieldSpec::optional("label", FieldKind::String),
            ],
        )
    }

    #[test]
    fn test_check_json_accepts_nullable_gap() {
        let row = json!({ "id": 1, "weight": 2.5, "label": null });
        assert!(schema().check_json(1, &row).is_ok());
    }

    #[test]
    fn test_check_json_rejects_null_required_field() {
        let row = json!({ "id": 7, "weight": null });
        let err = schema().check_json(7, &row).unwrap_err();
        match err {
            ExportError::EncodeFailure { id, reason } => {
                assert_eq!(id, 7);
                assert!(reason.contains("'weight'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_check_json_rejects_wrong_kind() {
        let row = json!({ "id": 3, "weight": "heavy" });
        assert!(schema().check_json(3, &row).is_err());
    }

    #[test]
    fn test_check_json_accepts_integer_weight() {
        let row = json!({ "id": 3, "weight": 4 });
        assert!(schema().check_json(3, &row).is_ok());
    }
}
