use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::column::MappingTable;
use crate::error::TdsFluentError;
use crate::types::Cell;

/// A caller-supplied transformation from one raw row to an output value.
pub type CustomTransformFn = Arc<
    dyn Fn(&[Cell], &mut MappingTable) -> Result<JsonValue, TdsFluentError> + Send + Sync,
>;

/// Strategy converting one raw row into an output value.
///
/// `RowToObject` builds a keyed object through the column mappings;
/// `RowToArray` keeps extracted values only, in column order. Custom
/// strategies receive the cells and the query's mapping table.
#[derive(Clone, Default)]
pub enum RowTransformer {
    #[default]
    RowToObject,
    RowToArray,
    Custom(CustomTransformFn),
}

impl fmt::Debug for RowTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowTransformer::RowToObject => f.write_str("RowToObject"),
            RowTransformer::RowToArray => f.write_str("RowToArray"),
            RowTransformer::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl RowTransformer {
    /// Look up one of the two built-in strategies by name.
    ///
    /// # Errors
    /// Returns `TdsFluentError::UsageError` for an unknown name.
    pub fn named(name: &str) -> Result<Self, TdsFluentError> {
        match name {
            "rowToObject" => Ok(RowTransformer::RowToObject),
            "rowToArray" => Ok(RowTransformer::RowToArray),
            other => Err(TdsFluentError::UsageError(format!(
                "Row transformer \"{other}\" not defined"
            ))),
        }
    }

    /// Transform one row using the query's mapping table.
    ///
    /// # Errors
    /// Propagates extraction/coercion failures from the column mappings.
    pub fn apply(
        &self,
        row: &[Cell],
        columns: &mut MappingTable,
    ) -> Result<JsonValue, TdsFluentError> {
        match self {
            RowTransformer::RowToObject => {
                let mut result = JsonMap::new();
                for cell in row {
                    let mapping = columns.resolve(&cell.name);
                    mapping.apply(cell, &mut result)?;
                }
                Ok(JsonValue::Object(result))
            }
            RowTransformer::RowToArray => {
                let mut result = Vec::with_capacity(row.len());
                for cell in row {
                    let mapping = columns.resolve(&cell.name);
                    result.push(mapping.extract(cell)?.to_json());
                }
                Ok(JsonValue::Array(result))
            }
            RowTransformer::Custom(f) => f(row, columns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::TdsColumn;
    use crate::types::SqlValue;
    use serde_json::json;

    fn sample_row() -> Vec<Cell> {
        vec![
            Cell::new("id", SqlValue::Int(7)),
            Cell::new("name", SqlValue::Text("seven".into())),
        ]
    }

    #[test]
    fn row_to_object_uses_mappings() {
        let mut columns = MappingTable::new(None);
        columns.insert(TdsColumn::with_path("name", "meta.label"));

        let out = RowTransformer::RowToObject
            .apply(&sample_row(), &mut columns)
            .unwrap();
        assert_eq!(out, json!({"id": 7, "meta": {"label": "seven"}}));
    }

    #[test]
    fn row_to_array_keeps_order_and_skips_renaming() {
        let mut columns = MappingTable::new(None);
        columns.insert(TdsColumn::with_path("id", "renamed"));

        let out = RowTransformer::RowToArray
            .apply(&sample_row(), &mut columns)
            .unwrap();
        assert_eq!(out, json!([7, "seven"]));
    }

    #[test]
    fn unknown_named_transformer_errors() {
        let err = RowTransformer::named("rowToTuple").unwrap_err();
        assert!(err.to_string().contains("rowToTuple"));
    }
}
