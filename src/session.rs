use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::column::RenameFn;
use crate::driver::ConnectionPool;
use crate::error::TdsFluentError;
use crate::mock::MockOutputs;
use crate::mssql::MssqlConfig;
use crate::promise::PromiseLibrary;
use crate::query::TdsQuery;
use crate::source::ConnectionSource;
use crate::transaction::{self, Transaction};
use crate::types::SqlValue;

const NO_SOURCE: &str =
    "Must set the connection pool, connection config, or mock data callback first";

/// Stateful configuration holder that mints execution units.
///
/// Configure exactly one connection source, optionally a default column
/// renamer and promise library, then chain queries:
/// ```rust,no_run
/// use tds_fluent::{TdsSession, MssqlConfig};
///
/// # async fn demo() -> Result<(), tds_fluent::TdsFluentError> {
/// let mut session = TdsSession::new();
/// session.set_connection_config(MssqlConfig::new("db", "app", "sa", "pw"))?;
///
/// let rows = session
///     .sql("SELECT id, display_name FROM users WHERE id = @P1")?
///     .parameter("id", tds_fluent::SqlType::Int, 42)
///     .execute()
///     .await?;
/// # let _ = rows;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TdsSession {
    source: Option<ConnectionSource>,
    renamer: Option<RenameFn>,
    promise: PromiseLibrary,
}

impl fmt::Debug for TdsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdsSession")
            .field("source", &self.source)
            .field("has_renamer", &self.renamer.is_some())
            .field("promise", &self.promise)
            .finish()
    }
}

impl TdsSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_source(&mut self, source: ConnectionSource) -> Result<&mut Self, TdsFluentError> {
        if let Some(existing) = &self.source {
            if std::mem::discriminant(existing) != std::mem::discriminant(&source) {
                return Err(TdsFluentError::ConfigError(format!(
                    "Cannot set the {} while the {} is already configured",
                    source_kind(&source),
                    source_kind(existing)
                )));
            }
        }
        self.source = Some(source);
        Ok(self)
    }

    /// Use a connection pool as the session's source.
    ///
    /// # Errors
    /// `TdsFluentError::ConfigError` if a different source kind is already
    /// configured.
    pub fn set_connection_pool(
        &mut self,
        pool: Arc<dyn ConnectionPool>,
    ) -> Result<&mut Self, TdsFluentError> {
        self.set_source(ConnectionSource::Pool(pool))
    }

    /// Open one dedicated connection per request using `config`.
    ///
    /// # Errors
    /// `TdsFluentError::ConfigError` if a different source kind is already
    /// configured.
    pub fn set_connection_config(
        &mut self,
        config: MssqlConfig,
    ) -> Result<&mut Self, TdsFluentError> {
        self.set_source(ConnectionSource::Single(config))
    }

    /// Bypass the database, sourcing rows from `callback` (see
    /// [`MockDataFn`](crate::mock::MockDataFn) for the contract).
    ///
    /// # Errors
    /// `TdsFluentError::ConfigError` if a different source kind is already
    /// configured.
    pub fn set_mock_data_callback<F>(&mut self, callback: F) -> Result<&mut Self, TdsFluentError>
    where
        F: Fn(&str, &HashMap<String, SqlValue>, &mut MockOutputs) -> Result<JsonValue, TdsFluentError>
            + Send
            + Sync
            + 'static,
    {
        self.set_source(ConnectionSource::Mock(Arc::new(callback)))
    }

    /// Rename columns with no explicit mapping, e.g.
    /// [`camel_case`](crate::column::camel_case).
    pub fn set_default_column_renamer<F>(&mut self, rename: F) -> &mut Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.renamer = Some(Arc::new(rename));
        self
    }

    /// Choose the deferred implementation queries settle through; the
    /// library was validated when it was constructed.
    pub fn set_promise_library(&mut self, library: PromiseLibrary) -> &mut Self {
        self.promise = library;
        self
    }

    fn source(&self) -> Result<ConnectionSource, TdsFluentError> {
        self.source
            .clone()
            .ok_or_else(|| TdsFluentError::ConfigError(NO_SOURCE.to_string()))
    }

    /// Mint an execution unit for `text` carrying the current configuration
    /// snapshot.
    ///
    /// # Errors
    /// `TdsFluentError::ConfigError` when no connection source is set.
    pub fn sql(&self, text: impl Into<String>) -> Result<TdsQuery, TdsFluentError> {
        let source = self.source()?;
        TdsQuery::new(source, self.promise.clone(), self.renamer.clone()).sql(text)
    }

    /// Open a transaction and resolve with a bound handle; subsequent
    /// `sql()` calls on the handle reuse its connection.
    ///
    /// # Errors
    /// `TdsFluentError::ConfigError` when no connection source is set;
    /// connection/driver failures otherwise.
    pub async fn begin_transaction(&self) -> Result<Transaction, TdsFluentError> {
        let source = self.source()?;
        transaction::begin(source, self.promise.clone(), self.renamer.clone()).await
    }
}

fn source_kind(source: &ConnectionSource) -> &'static str {
    match source {
        ConnectionSource::Pool(_) => "connection pool",
        ConnectionSource::Single(_) => "connection config",
        ConnectionSource::Mock(_) => "mock data callback",
    }
}
