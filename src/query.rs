use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::warn;

use crate::column::{MappingTable, RenameFn, TdsColumn};
use crate::driver::{
    DriverConnection, OutputCallback, OutputParameterBinding, ParameterBinding, Statement,
    StatementEvents,
};
use crate::error::TdsFluentError;
use crate::promise::PromiseLibrary;
use crate::source::{ConnectionSource, LiveConnection};
use crate::transform::{CustomTransformFn, RowTransformer};
use crate::types::{ParamOptions, SqlType, SqlValue};

/// Per-row callback; errors fail the operation.
pub type RowCallback = Box<dyn FnMut(JsonValue) -> Result<(), TdsFluentError> + Send>;

/// What one executed query resolves with: the accumulated transformed rows,
/// or a row count when a per-row callback or `return_row_count()` was set.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<JsonValue>),
    RowCount(Option<u64>),
}

impl QueryOutcome {
    #[must_use]
    pub fn into_rows(self) -> Option<Vec<JsonValue>> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::RowCount(_) => None,
        }
    }

    #[must_use]
    pub fn row_count(&self) -> Option<u64> {
        match self {
            QueryOutcome::RowCount(count) => *count,
            QueryOutcome::Rows(_) => None,
        }
    }
}

pub(crate) type SharedConnection = Arc<Mutex<Option<LiveConnection>>>;

enum ExecKind {
    Statement,
    Procedure,
}

/// Single-use execution unit: accumulates SQL text, bindings, mappings, and
/// a transformer, then runs the statement through the configured connection
/// source.
///
/// Minted by [`TdsSession::sql`](crate::TdsSession::sql) or a
/// [`Transaction`](crate::Transaction); consumed by
/// [`execute`](Self::execute) or [`call_procedure`](Self::call_procedure).
pub struct TdsQuery {
    source: ConnectionSource,
    promise: PromiseLibrary,
    sql: Option<String>,
    columns: MappingTable,
    statement: Statement,
    for_each_row: Option<RowCallback>,
    return_row_count: bool,
    transformer: RowTransformer,
    tx_conn: Option<SharedConnection>,
}

impl fmt::Debug for TdsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdsQuery")
            .field("sql", &self.sql)
            .field("source", &self.source)
            .field("transformer", &self.transformer)
            .field("return_row_count", &self.return_row_count)
            .field("in_transaction", &self.tx_conn.is_some())
            .finish()
    }
}

impl TdsQuery {
    pub(crate) fn new(
        source: ConnectionSource,
        promise: PromiseLibrary,
        renamer: Option<RenameFn>,
    ) -> Self {
        Self {
            source,
            promise,
            sql: None,
            columns: MappingTable::new(renamer),
            statement: Statement::default(),
            for_each_row: None,
            return_row_count: false,
            transformer: RowTransformer::default(),
            tx_conn: None,
        }
    }

    pub(crate) fn transaction_bound(
        source: ConnectionSource,
        promise: PromiseLibrary,
        renamer: Option<RenameFn>,
        conn: SharedConnection,
    ) -> Self {
        let mut query = Self::new(source, promise, renamer);
        query.tx_conn = Some(conn);
        query
    }

    /// Set the SQL text (or procedure name for `call_procedure`). Set-once:
    /// a second call is a usage error regardless of the argument.
    ///
    /// # Errors
    /// `TdsFluentError::UsageError` if SQL is already set.
    pub fn sql(mut self, text: impl Into<String>) -> Result<Self, TdsFluentError> {
        if self.sql.is_some() {
            return Err(TdsFluentError::UsageError("SQL already set".to_string()));
        }
        self.sql = Some(text.into());
        Ok(self)
    }

    /// Reference a result column, creating its default mapping now (the
    /// session renamer applies, or the name maps to itself).
    #[must_use]
    pub fn column(mut self, name: &str) -> Self {
        self.columns.resolve(name);
        self
    }

    /// Map a result column onto an explicit key or dot-separated deep path.
    #[must_use]
    pub fn column_as(mut self, name: &str, target: &str) -> Self {
        self.columns.insert(TdsColumn::with_path(name, target));
        self
    }

    /// Register a fully configured column mapping (coercions, overrides).
    #[must_use]
    pub fn column_map(mut self, column: TdsColumn) -> Self {
        self.columns.insert(column);
        self
    }

    /// Bind an input parameter; rebinding a name replaces the earlier value.
    #[must_use]
    pub fn parameter(self, name: &str, sql_type: SqlType, value: impl Into<SqlValue>) -> Self {
        self.parameter_opts(name, sql_type, value, ParamOptions::default())
    }

    /// Bind an input parameter with explicit sizing options.
    #[must_use]
    pub fn parameter_opts(
        mut self,
        name: &str,
        sql_type: SqlType,
        value: impl Into<SqlValue>,
        options: ParamOptions,
    ) -> Self {
        self.statement.bind(ParameterBinding {
            name: name.to_string(),
            sql_type,
            value: value.into(),
            options,
        });
        self
    }

    /// Declare an output parameter whose reported value is handed to
    /// `callback`.
    #[must_use]
    pub fn output_parameter<F>(mut self, name: &str, sql_type: SqlType, callback: F) -> Self
    where
        F: Fn(&SqlValue) + Send + Sync + 'static,
    {
        self.statement.bind_output(OutputParameterBinding {
            name: name.to_string(),
            sql_type,
            value: None,
            options: ParamOptions::default(),
            callback: Some(Arc::new(callback)),
        });
        self
    }

    /// Declare an output parameter with an initial value and optional
    /// callback.
    #[must_use]
    pub fn output_parameter_value(
        mut self,
        name: &str,
        sql_type: SqlType,
        value: impl Into<SqlValue>,
        options: ParamOptions,
        callback: Option<OutputCallback>,
    ) -> Self {
        self.statement.bind_output(OutputParameterBinding {
            name: name.to_string(),
            sql_type,
            value: Some(value.into()),
            options,
            callback,
        });
        self
    }

    /// Stream each transformed row into `callback` instead of accumulating
    /// results; the operation then resolves with the row count.
    #[must_use]
    pub fn for_each_row<F>(mut self, callback: F) -> Self
    where
        F: FnMut(JsonValue) -> Result<(), TdsFluentError> + Send + 'static,
    {
        self.for_each_row = Some(Box::new(callback));
        self
    }

    /// Resolve with the affected/delivered row count instead of rows.
    #[must_use]
    pub fn return_row_count(mut self) -> Self {
        self.return_row_count = true;
        self
    }

    /// Select a built-in row transformer by name (`"rowToObject"` or
    /// `"rowToArray"`).
    ///
    /// # Errors
    /// `TdsFluentError::UsageError` for an unknown name.
    pub fn row_transformer(mut self, name: &str) -> Result<Self, TdsFluentError> {
        self.transformer = RowTransformer::named(name)?;
        Ok(self)
    }

    /// Install a caller-supplied row transformer.
    #[must_use]
    pub fn row_transformer_fn(mut self, transformer: CustomTransformFn) -> Self {
        self.transformer = RowTransformer::Custom(transformer);
        self
    }

    /// Execute the statement and settle with rows or a row count.
    ///
    /// # Errors
    /// Usage errors (no SQL), connection-source failures, driver errors, and
    /// row-transform/coercion failures all reject the operation.
    pub async fn execute(self) -> Result<QueryOutcome, TdsFluentError> {
        self.run(ExecKind::Statement).await
    }

    /// Call the stored procedure named by the SQL text; otherwise identical
    /// to [`execute`](Self::execute).
    ///
    /// # Errors
    /// Same classes as `execute`.
    pub async fn call_procedure(self) -> Result<QueryOutcome, TdsFluentError> {
        self.run(ExecKind::Procedure).await
    }

    async fn run(mut self, kind: ExecKind) -> Result<QueryOutcome, TdsFluentError> {
        let sql = self.sql.take().ok_or_else(|| {
            TdsFluentError::UsageError("SQL must be set before executing".to_string())
        })?;

        let mut statement = std::mem::take(&mut self.statement);
        statement.sql = sql;
        statement.row_count_only = self.return_row_count && self.for_each_row.is_none();

        let callbacks: HashMap<String, OutputCallback> = statement
            .output_params
            .iter()
            .filter_map(|out| {
                out.callback
                    .as_ref()
                    .map(|cb| (out.name.clone(), Arc::clone(cb)))
            })
            .collect();

        let wants_count = self.return_row_count || self.for_each_row.is_some();
        let mut sink = ExecutionSink {
            transformer: self.transformer,
            columns: self.columns,
            for_each_row: self.for_each_row,
            results: Vec::new(),
            callbacks,
        };

        // Bridge the driver's callback-style completion into the selected
        // promise library: the operation settles exactly once.
        let (settle, future) = self.promise.defer::<QueryOutcome>().split();

        let driven = match &self.tx_conn {
            Some(shared) => {
                let mut guard = shared.lock().await;
                match guard.as_mut() {
                    Some(live) => {
                        dispatch(live.driver(), &kind, &statement, &mut sink).await
                        // Inside a transaction the connection stays open for
                        // the next statement.
                    }
                    None => Err(TdsFluentError::ExecutionError(
                        "Transaction already completed".to_string(),
                    )),
                }
            }
            None => match self.source.connect().await {
                Ok(mut live) => {
                    let result = dispatch(live.driver(), &kind, &statement, &mut sink).await;
                    match (result, live.dispose().await) {
                        (Ok(count), Ok(())) => Ok(count),
                        (Ok(_), Err(dispose_err)) => Err(dispose_err),
                        (Err(e), Ok(())) => Err(e),
                        (Err(e), Err(dispose_err)) => {
                            warn!(error = %dispose_err, "connection disposal failed after statement error");
                            Err(e)
                        }
                    }
                }
                Err(e) => Err(e),
            },
        };

        match driven {
            Ok(row_count) => {
                let outcome = if wants_count {
                    QueryOutcome::RowCount(row_count)
                } else {
                    QueryOutcome::Rows(sink.results)
                };
                settle.resolve(outcome);
            }
            Err(e) => settle.reject(e),
        }

        future.wait().await
    }
}

async fn dispatch(
    conn: &mut dyn DriverConnection,
    kind: &ExecKind,
    statement: &Statement,
    sink: &mut ExecutionSink,
) -> Result<Option<u64>, TdsFluentError> {
    match kind {
        ExecKind::Statement => conn.exec_sql(statement, sink).await,
        ExecKind::Procedure => conn.call_procedure(statement, sink).await,
    }
}

/// Adapts the driver's row/return-value notifications onto the query's
/// transformer, per-row callback, and output-parameter callbacks.
struct ExecutionSink {
    transformer: RowTransformer,
    columns: MappingTable,
    for_each_row: Option<RowCallback>,
    results: Vec<JsonValue>,
    callbacks: HashMap<String, OutputCallback>,
}

impl StatementEvents for ExecutionSink {
    fn on_row(&mut self, row: crate::types::DriverRow) -> Result<(), TdsFluentError> {
        let value = self.transformer.apply(&row, &mut self.columns)?;
        match &mut self.for_each_row {
            Some(callback) => callback(value),
            None => {
                self.results.push(value);
                Ok(())
            }
        }
    }

    fn on_return_value(&mut self, name: &str, value: SqlValue) -> Result<(), TdsFluentError> {
        if let Some(callback) = self.callbacks.get(name) {
            callback(&value);
        }
        Ok(())
    }
}
