use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::TdsFluentError;
use crate::types::{Cell, SqlValue};

/// Replacement for the default cell-value extraction step.
pub type GetValueFn =
    Arc<dyn Fn(&Cell) -> Result<SqlValue, TdsFluentError> + Send + Sync>;

/// Replacement for the whole assignment step (extraction included).
pub type ApplyMappingFn = Arc<
    dyn Fn(&Cell, &mut JsonMap<String, JsonValue>) -> Result<(), TdsFluentError> + Send + Sync,
>;

/// Function renaming result-set columns when no explicit mapping exists.
pub type RenameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Maps one result-set column onto an output key or dot-separated path,
/// with optional value coercion.
///
/// Coercions and overrides are consuming builder steps, so a fully
/// configured mapping is handed to the query in one expression:
/// ```rust
/// use tds_fluent::TdsColumn;
///
/// let col = TdsColumn::with_path("IsActive", "user.active").as_boolean();
/// # let _ = col;
/// ```
#[derive(Clone)]
pub struct TdsColumn {
    name: String,
    path: Option<String>,
    get_value: Option<GetValueFn>,
    apply: Option<ApplyMappingFn>,
}

impl fmt::Debug for TdsColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdsColumn")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("has_get_value", &self.get_value.is_some())
            .field("has_apply", &self.apply.is_some())
            .finish()
    }
}

impl TdsColumn {
    /// Mapping that writes the cell under its own column name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            get_value: None,
            apply: None,
        }
    }

    /// Mapping that writes the cell under `path`. A dot-separated path
    /// assigns into nested objects, creating intermediates as needed.
    #[must_use]
    pub fn with_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            get_value: None,
            apply: None,
        }
    }

    /// Source column name in the result set.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target key or path the extracted value is written to.
    #[must_use]
    pub fn target(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    /// Replace the extraction step with `f`.
    #[must_use]
    pub fn get_value_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Cell) -> Result<SqlValue, TdsFluentError> + Send + Sync + 'static,
    {
        self.get_value = Some(Arc::new(f));
        self
    }

    /// Replace the whole assignment step with `f`. Needed for custom
    /// aggregate shapes that a key/path assignment cannot express.
    #[must_use]
    pub fn apply_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Cell, &mut JsonMap<String, JsonValue>) -> Result<(), TdsFluentError>
            + Send
            + Sync
            + 'static,
    {
        self.apply = Some(Arc::new(f));
        self
    }

    /// Coerce the cell to a boolean on extraction.
    ///
    /// `Null` stays null; numbers map to `value != 0`; the usual string
    /// spellings (`TRUE/T/Y/YES/1`, `FALSE/F/N/NO/0`, case-insensitive) map
    /// to their boolean; anything else fails the row.
    #[must_use]
    pub fn as_boolean(self) -> Self {
        self.get_value_with(|cell| coerce_boolean(&cell.value))
    }

    /// Coerce the cell to a timestamp on extraction.
    ///
    /// `Null` stays null; numbers are epoch milliseconds; strings are parsed
    /// as RFC 3339 or the common `YYYY-MM-DD[ HH:MM:SS[.fff]]` shapes.
    #[must_use]
    pub fn as_date(self) -> Self {
        self.get_value_with(|cell| coerce_date(&cell.value))
    }

    /// Extract the output value for `cell`, honoring any override.
    pub fn extract(&self, cell: &Cell) -> Result<SqlValue, TdsFluentError> {
        match &self.get_value {
            Some(f) => f(cell),
            None => Ok(cell.value.clone()),
        }
    }

    /// Write `cell` into `result`, honoring overrides and deep paths.
    pub fn apply(
        &self,
        cell: &Cell,
        result: &mut JsonMap<String, JsonValue>,
    ) -> Result<(), TdsFluentError> {
        if let Some(f) = &self.apply {
            return f(cell, result);
        }

        let value = self.extract(cell)?.to_json();
        match &self.path {
            Some(path) => deep_set(result, path, value),
            None => {
                result.insert(self.name.clone(), value);
                Ok(())
            }
        }
    }
}

fn coerce_boolean(value: &SqlValue) -> Result<SqlValue, TdsFluentError> {
    match value {
        SqlValue::Null => Ok(SqlValue::Null),
        SqlValue::Bool(b) => Ok(SqlValue::Bool(*b)),
        SqlValue::Int(i) => Ok(SqlValue::Bool(*i != 0)),
        SqlValue::Float(f) if f.is_finite() => Ok(SqlValue::Bool(*f != 0.0)),
        SqlValue::Text(s) => {
            let upper = s.to_uppercase();
            match upper.as_str() {
                "TRUE" | "T" | "Y" | "YES" | "1" => Ok(SqlValue::Bool(true)),
                "FALSE" | "F" | "N" | "NO" | "0" => Ok(SqlValue::Bool(false)),
                _ => Err(TdsFluentError::ConversionError(format!(
                    "Unable to convert \"{s}\" to a boolean"
                ))),
            }
        }
        other => Err(TdsFluentError::ConversionError(format!(
            "Unable to convert {other:?} to a boolean"
        ))),
    }
}

fn coerce_date(value: &SqlValue) -> Result<SqlValue, TdsFluentError> {
    match value {
        SqlValue::Null => Ok(SqlValue::Null),
        SqlValue::Timestamp(dt) => Ok(SqlValue::Timestamp(*dt)),
        SqlValue::Int(ms) => DateTime::from_timestamp_millis(*ms)
            .map(|dt| SqlValue::Timestamp(dt.naive_utc()))
            .ok_or_else(|| {
                TdsFluentError::ConversionError(format!(
                    "Epoch milliseconds {ms} are out of range for a timestamp"
                ))
            }),
        SqlValue::Float(ms) if ms.is_finite() => {
            #[allow(clippy::cast_possible_truncation)]
            let ms = *ms as i64;
            DateTime::from_timestamp_millis(ms)
                .map(|dt| SqlValue::Timestamp(dt.naive_utc()))
                .ok_or_else(|| {
                    TdsFluentError::ConversionError(format!(
                        "Epoch milliseconds {ms} are out of range for a timestamp"
                    ))
                })
        }
        SqlValue::Text(s) => parse_date_text(s).ok_or_else(|| {
            TdsFluentError::ConversionError(format!("Unable to convert \"{s}\" to a date"))
        }),
        other => Err(TdsFluentError::ConversionError(format!(
            "Unable to convert {other:?} to a date"
        ))),
    }
}

fn parse_date_text(s: &str) -> Option<SqlValue> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(SqlValue::Timestamp(dt.naive_utc()));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(SqlValue::Timestamp(dt));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(SqlValue::Timestamp(d.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Assign `value` at the dot-separated `path` inside `root`, creating
/// intermediate objects as needed.
///
/// Colliding with an existing non-object intermediate is an error rather
/// than an overwrite, so mappings like `"a"` and `"a.b"` cannot silently
/// clobber each other.
pub(crate) fn deep_set(
    root: &mut JsonMap<String, JsonValue>,
    path: &str,
    value: JsonValue,
) -> Result<(), TdsFluentError> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Err(TdsFluentError::ConversionError(
            "Column mapping path must not be empty".to_string(),
        ));
    };

    let mut current = root;
    let mut key = first;
    for next in segments {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(JsonMap::new()));
        match entry {
            JsonValue::Object(map) => current = map,
            _ => {
                return Err(TdsFluentError::ConversionError(format!(
                    "Column mapping conflict at \"{key}\" in path \"{path}\": \
                     a non-object value is already present"
                )));
            }
        }
        key = next;
    }

    current.insert(key.to_string(), value);
    Ok(())
}

/// Per-query table of column mappings, keyed by source column name.
///
/// Mappings are created lazily on first reference: an explicit mapping wins,
/// then the session's default renamer, then the column name unchanged.
#[derive(Clone, Default)]
pub struct MappingTable {
    columns: HashMap<String, Arc<TdsColumn>>,
    renamer: Option<RenameFn>,
}

impl MappingTable {
    #[must_use]
    pub fn new(renamer: Option<RenameFn>) -> Self {
        Self {
            columns: HashMap::new(),
            renamer,
        }
    }

    /// Register an explicit mapping; replaces any previous mapping for the
    /// same source column.
    pub fn insert(&mut self, column: TdsColumn) {
        self.columns.insert(column.name().to_string(), Arc::new(column));
    }

    /// Existing mapping for `name`, or a lazily created default one.
    pub fn resolve(&mut self, name: &str) -> Arc<TdsColumn> {
        if let Some(existing) = self.columns.get(name) {
            return Arc::clone(existing);
        }

        let mapping = match &self.renamer {
            Some(rename) => TdsColumn::with_path(name, rename(name)),
            None => TdsColumn::new(name),
        };
        let mapping = Arc::new(mapping);
        self.columns.insert(name.to_string(), Arc::clone(&mapping));
        mapping
    }
}

impl fmt::Debug for MappingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingTable")
            .field("columns", &self.columns.keys().collect::<Vec<_>>())
            .field("has_renamer", &self.renamer.is_some())
            .finish()
    }
}

/// Turn `snake_case`, `SCREAMING_CASE`, or space-separated column names into
/// camelCase output keys; the usual default renamer for sessions.
#[must_use]
pub fn camel_case(name: &str) -> String {
    // All-caps names fold to lowercase between word breaks.
    let all_caps = !name.chars().any(char::is_lowercase);
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' || ch == ' ' || ch == '-' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else if out.is_empty() || all_caps {
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_mapping_without_renamer() {
        let mut table = MappingTable::new(None);
        let mapping = table.resolve("plain_name");
        assert_eq!(mapping.target(), "plain_name");
    }

    #[test]
    fn renamer_applies_to_lazy_mappings_only() {
        let mut table = MappingTable::new(Some(Arc::new(camel_case)));
        assert_eq!(table.resolve("first_name").target(), "firstName");

        table.insert(TdsColumn::with_path("last_name", "surname"));
        assert_eq!(table.resolve("last_name").target(), "surname");
    }

    #[test]
    fn boolean_coercion_table() {
        for (input, expected) in [
            (SqlValue::Int(0), false),
            (SqlValue::Int(7), true),
            (SqlValue::Float(0.0), false),
            (SqlValue::Float(2.5), true),
            (SqlValue::Text("yes".into()), true),
            (SqlValue::Text("T".into()), true),
            (SqlValue::Text("No".into()), false),
            (SqlValue::Text("0".into()), false),
            (SqlValue::Bool(true), true),
        ] {
            assert_eq!(coerce_boolean(&input).unwrap(), SqlValue::Bool(expected));
        }

        assert!(coerce_boolean(&SqlValue::Null).unwrap().is_null());
        assert!(coerce_boolean(&SqlValue::Text("maybe".into())).is_err());
        assert!(coerce_boolean(&SqlValue::Blob(vec![1])).is_err());
    }

    #[test]
    fn date_coercion_from_epoch_and_text() {
        let from_epoch = coerce_date(&SqlValue::Int(0)).unwrap();
        assert_eq!(
            from_epoch.as_timestamp().unwrap().format("%Y-%m-%d").to_string(),
            "1970-01-01"
        );

        let parsed = coerce_date(&SqlValue::Text("2024-05-01 12:30:00".into())).unwrap();
        assert_eq!(
            parsed.as_timestamp().unwrap().format("%H:%M").to_string(),
            "12:30"
        );

        assert!(coerce_date(&SqlValue::Null).unwrap().is_null());
        assert!(coerce_date(&SqlValue::Text("not a date".into())).is_err());
    }

    #[test]
    fn deep_set_round_trip() {
        let mut root = JsonMap::new();
        root.insert("other".to_string(), json!(42));
        deep_set(&mut root, "a.b.c", json!("deep")).unwrap();

        let root = JsonValue::Object(root);
        assert_eq!(root["a"]["b"]["c"], json!("deep"));
        assert_eq!(root["other"], json!(42));
    }

    #[test]
    fn deep_set_conflict_is_an_error() {
        let mut root = JsonMap::new();
        deep_set(&mut root, "a", json!(1)).unwrap();
        let err = deep_set(&mut root, "a.b", json!(2)).unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn camel_case_renames() {
        assert_eq!(camel_case("column_name"), "columnName");
        assert_eq!(camel_case("COLUMN_NAME"), "columnName");
        assert_eq!(camel_case("already"), "already");
    }
}
