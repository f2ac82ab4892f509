//! Fluent, promise-settling access to SQL Server.
//!
//! A [`TdsSession`] holds exactly one connection source (a [`TdsPool`], a
//! per-request [`MssqlConfig`], or a mock data callback) and mints
//! single-use [`TdsQuery`] execution units. Queries chain column mappings,
//! parameter bindings, and a row transformer, then settle through the
//! session's [`PromiseLibrary`] with either transformed rows or a row
//! count.
//!
//! ```rust,no_run
//! use tds_fluent::prelude::*;
//!
//! # async fn demo() -> Result<(), TdsFluentError> {
//! let mut session = TdsSession::new();
//! session.set_connection_config(MssqlConfig::new("db", "app", "sa", "pw"))?;
//! session.set_default_column_renamer(camel_case);
//!
//! let outcome = session
//!     .sql("SELECT user_id, display_name FROM users WHERE user_id = @P1")?
//!     .parameter("user_id", SqlType::Int, 42)
//!     .column_as("display_name", "profile.name")
//!     .execute()
//!     .await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod column;
pub mod driver;
mod error;
pub mod mock;
pub mod mssql;
pub mod promise;
mod query;
mod session;
mod source;
mod transaction;
pub mod transform;
pub mod types;

pub use column::{MappingTable, TdsColumn, camel_case};
pub use driver::{ConnectionPool, DriverConnection, Statement, StatementEvents};
pub use error::TdsFluentError;
pub use mock::{MockConnection, MockData, MockDataFn, MockOutputs};
pub use mssql::{MssqlConfig, MssqlConfigBuilder, TdsPool, create_client};
pub use promise::{PromiseBackend, PromiseLibrary};
pub use query::{QueryOutcome, TdsQuery};
pub use session::TdsSession;
pub use source::ConnectionSource;
pub use transaction::Transaction;
pub use transform::RowTransformer;
pub use types::{Cell, DriverRow, ParamOptions, SqlType, SqlValue};

/// Convenient imports for common functionality.
pub mod prelude {
    pub use crate::column::{TdsColumn, camel_case};
    pub use crate::error::TdsFluentError;
    pub use crate::mock::{MockData, MockOutputs};
    pub use crate::mssql::{MssqlConfig, TdsPool};
    pub use crate::promise::PromiseLibrary;
    pub use crate::query::{QueryOutcome, TdsQuery};
    pub use crate::session::TdsSession;
    pub use crate::transaction::Transaction;
    pub use crate::types::{ParamOptions, SqlType, SqlValue};
}
