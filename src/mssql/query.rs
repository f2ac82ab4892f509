use chrono::NaiveDateTime;
use futures_util::TryStreamExt;
use tiberius::{QueryItem, QueryStream};

use crate::driver::StatementEvents;
use crate::error::TdsFluentError;
use crate::types::{Cell, DriverRow, SqlValue};

/// Drain a query stream, forwarding each row through `events`, and return
/// the number of rows delivered.
pub async fn drain_stream(
    mut stream: QueryStream<'_>,
    events: &mut dyn StatementEvents,
) -> Result<Option<u64>, TdsFluentError> {
    let mut rows = 0u64;
    while let Some(item) = stream.try_next().await.map_err(|e| {
        TdsFluentError::ExecutionError(format!("SQL Server row fetch error: {e}"))
    })? {
        match item {
            QueryItem::Metadata(_) => {}
            QueryItem::Row(row) => {
                events.on_row(extract_row(&row)?)?;
                rows += 1;
            }
        }
    }
    Ok(Some(rows))
}

/// Drain a query stream into per-result-set buffers, for scripts whose
/// trailing result set carries output-parameter values.
pub async fn collect_result_sets(
    mut stream: QueryStream<'_>,
) -> Result<Vec<Vec<DriverRow>>, TdsFluentError> {
    let mut sets: Vec<Vec<DriverRow>> = Vec::new();
    while let Some(item) = stream.try_next().await.map_err(|e| {
        TdsFluentError::ExecutionError(format!("SQL Server row fetch error: {e}"))
    })? {
        match item {
            QueryItem::Metadata(_) => sets.push(Vec::new()),
            QueryItem::Row(row) => {
                if sets.is_empty() {
                    sets.push(Vec::new());
                }
                let extracted = extract_row(&row)?;
                if let Some(current) = sets.last_mut() {
                    current.push(extracted);
                }
            }
        }
    }
    Ok(sets)
}

/// Convert one tiberius row into the driver-agnostic cell shape.
pub fn extract_row(row: &tiberius::Row) -> Result<DriverRow, TdsFluentError> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut cells = Vec::with_capacity(names.len());
    for (idx, name) in names.into_iter().enumerate() {
        let value = extract_value(row, idx)?.unwrap_or(SqlValue::Null);
        cells.push(Cell::new(name, value));
    }
    Ok(cells)
}

/// Extract a value from a row at a specific index.
///
/// The tiberius row API varies by column type, so probe the common types in
/// order; anything unrecognized lands as NULL.
fn extract_value(
    row: &tiberius::Row,
    idx: usize,
) -> Result<Option<SqlValue>, TdsFluentError> {
    // Try integer
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return Ok(Some(SqlValue::Int(i64::from(val))));
    }

    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return Ok(Some(SqlValue::Int(val)));
    }

    // Try floating point
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return Ok(Some(SqlValue::Float(f64::from(val))));
    }

    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return Ok(Some(SqlValue::Float(val)));
    }

    // Try boolean
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return Ok(Some(SqlValue::Bool(val)));
    }

    // Try native datetime columns
    if let Ok(Some(val)) = row.try_get::<NaiveDateTime, _>(idx) {
        return Ok(Some(SqlValue::Timestamp(val)));
    }

    // Try string (most values can be represented as strings)
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        // Textual timestamps still show up from older column types.
        if val.contains('-') && (val.contains(':') || val.contains(' ')) {
            if let Ok(dt) = NaiveDateTime::parse_from_str(val, "%Y-%m-%d %H:%M:%S%.f") {
                return Ok(Some(SqlValue::Timestamp(dt)));
            } else if let Ok(dt) = NaiveDateTime::parse_from_str(val, "%Y-%m-%d %H:%M:%S") {
                return Ok(Some(SqlValue::Timestamp(dt)));
            }
        }

        return Ok(Some(SqlValue::Text(val.to_string())));
    }

    // Try bytes (binary data)
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return Ok(Some(SqlValue::Blob(val.to_vec())));
    }

    // NULL or an unmapped type
    Ok(None)
}
