use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::driver::{DriverConnection, Statement, StatementEvents};
use crate::error::TdsFluentError;
use crate::types::{Cell, SqlValue};

/// Caller-supplied stand-in for the database: receives the SQL text, the
/// flattened parameter map, and an output-value channel, and returns an
/// array of plain row objects (or `Null` for no rows).
pub type MockDataFn = dyn Fn(&str, &HashMap<String, SqlValue>, &mut MockOutputs) -> Result<JsonValue, TdsFluentError>
    + Send
    + Sync;

/// Output-parameter values a mock callback reports back; they are delivered
/// through the statement's output callbacks after the rows.
#[derive(Debug, Default)]
pub struct MockOutputs {
    values: Vec<(String, SqlValue)>,
}

impl MockOutputs {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        self.values.push((name.into(), value.into()));
    }
}

/// Last transaction verb a mock connection saw; useful in assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionAction {
    #[default]
    None,
    Begin,
    Save,
    Commit,
    Rollback,
}

/// `DriverConnection` that bypasses the database entirely, synthesizing a
/// result set from the configured mock callback.
pub struct MockConnection {
    callback: Arc<MockDataFn>,
    last_transaction_action: TransactionAction,
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("last_transaction_action", &self.last_transaction_action)
            .finish()
    }
}

impl MockConnection {
    #[must_use]
    pub fn new(callback: Arc<MockDataFn>) -> Self {
        Self {
            callback,
            last_transaction_action: TransactionAction::None,
        }
    }

    #[must_use]
    pub fn last_transaction_action(&self) -> TransactionAction {
        self.last_transaction_action
    }
}

fn flatten_params(statement: &Statement) -> HashMap<String, SqlValue> {
    statement
        .params
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn exec_sql(
        &mut self,
        statement: &Statement,
        events: &mut dyn StatementEvents,
    ) -> Result<Option<u64>, TdsFluentError> {
        debug!(sql = %statement.sql, "mock exec_sql");

        let params = flatten_params(statement);
        let mut outputs = MockOutputs::default();
        let data = (self.callback)(&statement.sql, &params, &mut outputs)?;

        match data {
            JsonValue::Null => {}
            JsonValue::Array(rows) => {
                for row in rows {
                    let JsonValue::Object(fields) = row else {
                        return Err(TdsFluentError::MockError(
                            "Mock data rows must be plain objects".to_string(),
                        ));
                    };
                    let cells: Vec<Cell> = fields
                        .into_iter()
                        .map(|(name, value)| Cell::new(name, SqlValue::from_json(&value)))
                        .collect();
                    events.on_row(cells)?;
                }
            }
            _ => {
                return Err(TdsFluentError::MockError(
                    "Mock data must be an array of rows or null".to_string(),
                ));
            }
        }

        for (name, value) in outputs.values {
            events.on_return_value(&name, value)?;
        }

        // The mock always reports an affected-row count of zero.
        Ok(Some(0))
    }

    async fn call_procedure(
        &mut self,
        statement: &Statement,
        events: &mut dyn StatementEvents,
    ) -> Result<Option<u64>, TdsFluentError> {
        self.exec_sql(statement, events).await
    }

    async fn begin_transaction(&mut self) -> Result<(), TdsFluentError> {
        self.last_transaction_action = TransactionAction::Begin;
        Ok(())
    }

    async fn save_transaction(&mut self, _name: &str) -> Result<(), TdsFluentError> {
        self.last_transaction_action = TransactionAction::Save;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), TdsFluentError> {
        self.last_transaction_action = TransactionAction::Commit;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<(), TdsFluentError> {
        self.last_transaction_action = TransactionAction::Rollback;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TdsFluentError> {
        Ok(())
    }
}

/// Fixture helper for writing mock callbacks: holds a row array and narrows
/// it the way a query would.
#[derive(Debug, Clone)]
pub struct MockData {
    data: Vec<JsonValue>,
}

impl MockData {
    /// Wrap a non-empty array of row objects.
    ///
    /// # Errors
    /// `TdsFluentError::MockError` when `data` is empty.
    pub fn new(data: Vec<JsonValue>) -> Result<Self, TdsFluentError> {
        if data.is_empty() {
            return Err(TdsFluentError::MockError("No mock data".to_string()));
        }
        Ok(Self { data })
    }

    /// Keep only the rows whose fields match every bound parameter value.
    ///
    /// When `required` is given, the parameter map must contain exactly
    /// those names.
    ///
    /// # Errors
    /// `TdsFluentError::MockError` for missing/extra required parameters or
    /// when no row matches.
    pub fn filtered(
        mut self,
        params: &HashMap<String, SqlValue>,
        required: Option<&[&str]>,
    ) -> Result<Self, TdsFluentError> {
        if let Some(required) = required {
            let missing: Vec<&str> = required
                .iter()
                .copied()
                .filter(|name| !params.contains_key(*name))
                .collect();
            if !missing.is_empty() {
                return Err(TdsFluentError::MockError(format!(
                    "Some required parameters are missing: {missing:?}"
                )));
            }

            let extra: Vec<&str> = params
                .keys()
                .map(String::as_str)
                .filter(|name| !required.contains(name))
                .collect();
            if !extra.is_empty() {
                return Err(TdsFluentError::MockError(format!(
                    "Some extra parameters were found: {extra:?}"
                )));
            }
        }

        self.data.retain(|row| {
            params.iter().all(|(name, value)| {
                row.get(name).is_some_and(|field| *field == value.to_json())
            })
        });

        if self.data.is_empty() {
            let shown: HashMap<&str, JsonValue> = params
                .iter()
                .map(|(k, v)| (k.as_str(), v.to_json()))
                .collect();
            return Err(TdsFluentError::MockError(format!(
                "No mock data found for: {shown:?}"
            )));
        }

        Ok(self)
    }

    /// Project the rows down to `column_names`, or return them unchanged
    /// when `None`.
    #[must_use]
    pub fn select(&self, column_names: Option<&[&str]>) -> JsonValue {
        match column_names {
            Some(names) => JsonValue::Array(
                self.data
                    .iter()
                    .map(|row| {
                        let mut picked = serde_json::Map::new();
                        for name in names {
                            if let Some(value) = row.get(*name) {
                                picked.insert((*name).to_string(), value.clone());
                            }
                        }
                        JsonValue::Object(picked)
                    })
                    .collect(),
            ),
            None => JsonValue::Array(self.data.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> MockData {
        MockData::new(vec![
            json!({"id": 1, "name": "ada"}),
            json!({"id": 2, "name": "grace"}),
        ])
        .unwrap()
    }

    #[test]
    fn empty_fixture_is_an_error() {
        assert!(MockData::new(vec![]).is_err());
    }

    #[test]
    fn filtered_narrows_by_parameter_values() {
        let params: HashMap<String, SqlValue> =
            [("id".to_string(), SqlValue::Int(2))].into_iter().collect();
        let narrowed = fixture().filtered(&params, Some(&["id"])).unwrap();
        assert_eq!(narrowed.select(None), json!([{"id": 2, "name": "grace"}]));
    }

    #[test]
    fn filtered_validates_required_parameters() {
        let params: HashMap<String, SqlValue> =
            [("id".to_string(), SqlValue::Int(2))].into_iter().collect();
        let err = fixture().filtered(&params, Some(&["id", "name"])).unwrap_err();
        assert!(err.to_string().contains("missing"));

        let err = fixture().filtered(&params, Some(&[])).unwrap_err();
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn select_projects_columns() {
        assert_eq!(
            fixture().select(Some(&["name"])),
            json!([{"name": "ada"}, {"name": "grace"}])
        );
    }
}
