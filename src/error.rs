use thiserror::Error;

use bb8_tiberius::Error as Bb8TiberiusError;

/// Errors surfaced by the fluent query layer.
///
/// Configuration and usage errors are raised synchronously from the builder
/// or facade call that caused them; everything else settles the operation's
/// future.
#[derive(Debug, Error)]
pub enum TdsFluentError {
    #[error(transparent)]
    Mssql(#[from] tiberius::error::Error),

    #[error(transparent)]
    PoolError(#[from] bb8::RunError<Bb8TiberiusError>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Usage error: {0}")]
    UsageError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Value conversion error: {0}")]
    ConversionError(String),

    #[error("Mock data error: {0}")]
    MockError(String),

    #[error("Promise adapter error: {0}")]
    PromiseError(String),
}
