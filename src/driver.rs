use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TdsFluentError;
use crate::types::{DriverRow, ParamOptions, SqlType, SqlValue};

/// Callback fired when the driver reports an output-parameter value.
pub type OutputCallback = Arc<dyn Fn(&SqlValue) + Send + Sync>;

/// One input parameter bound onto a statement.
#[derive(Debug, Clone)]
pub struct ParameterBinding {
    pub name: String,
    pub sql_type: SqlType,
    pub value: SqlValue,
    pub options: ParamOptions,
}

/// One output parameter: declared toward the driver, delivered back through
/// the optional callback.
#[derive(Clone)]
pub struct OutputParameterBinding {
    pub name: String,
    pub sql_type: SqlType,
    pub value: Option<SqlValue>,
    pub options: ParamOptions,
    pub callback: Option<OutputCallback>,
}

impl fmt::Debug for OutputParameterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputParameterBinding")
            .field("name", &self.name)
            .field("sql_type", &self.sql_type)
            .field("value", &self.value)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Everything a driver connection needs to run one statement.
///
/// Parameter vectors keep insertion order (tiberius binds positionally as
/// `@P1..@Pn`); re-binding a name replaces the earlier entry in place.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<ParameterBinding>,
    pub output_params: Vec<OutputParameterBinding>,
    /// The caller only wants the affected-row count; drivers may skip row
    /// delivery and use their cheaper execution path.
    pub row_count_only: bool,
}

impl Statement {
    /// Insert or replace a parameter by name, keeping insertion order.
    pub fn bind(&mut self, binding: ParameterBinding) {
        match self.params.iter_mut().find(|p| p.name == binding.name) {
            Some(slot) => *slot = binding,
            None => self.params.push(binding),
        }
    }

    /// Insert or replace an output parameter by name.
    pub fn bind_output(&mut self, binding: OutputParameterBinding) {
        match self
            .output_params
            .iter_mut()
            .find(|p| p.name == binding.name)
        {
            Some(slot) => *slot = binding,
            None => self.output_params.push(binding),
        }
    }
}

/// Sink for the asynchronous notifications a statement produces before its
/// single completion.
///
/// Both handlers are fallible: an error aborts the statement and becomes the
/// operation's rejection instead of unwinding through the driver.
pub trait StatementEvents: Send {
    fn on_row(&mut self, row: DriverRow) -> Result<(), TdsFluentError>;

    fn on_return_value(&mut self, name: &str, value: SqlValue) -> Result<(), TdsFluentError>;
}

/// The narrow surface this crate consumes from an underlying connection.
///
/// Implemented by the tiberius binding and the mock connection; everything
/// above this trait is driver-agnostic.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run a SQL batch, streaming rows and output values through `events`,
    /// and return the driver-reported row count (if any).
    async fn exec_sql(
        &mut self,
        statement: &Statement,
        events: &mut dyn StatementEvents,
    ) -> Result<Option<u64>, TdsFluentError>;

    /// Call a stored procedure; `statement.sql` is the procedure name.
    async fn call_procedure(
        &mut self,
        statement: &Statement,
        events: &mut dyn StatementEvents,
    ) -> Result<Option<u64>, TdsFluentError>;

    async fn begin_transaction(&mut self) -> Result<(), TdsFluentError>;

    async fn save_transaction(&mut self, name: &str) -> Result<(), TdsFluentError>;

    async fn commit_transaction(&mut self) -> Result<(), TdsFluentError>;

    async fn rollback_transaction(&mut self) -> Result<(), TdsFluentError>;

    /// Tear down the underlying session. Pooled connections return to their
    /// pool instead of closing the socket.
    async fn close(&mut self) -> Result<(), TdsFluentError>;
}

/// Connection pool seam: anything that can lend out driver connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, TdsFluentError>;
}
