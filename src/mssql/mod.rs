// SQL Server binding - everything that touches tiberius directly.
//
// Split mirrors the concerns:
// - config: connection settings and pool setup
// - client: raw single-connection creation
// - params: SqlValue -> tiberius parameter binding
// - query: result-stream draining and row extraction
// - executor: DriverConnection implementation over a tiberius client

pub mod client;
pub mod config;
pub mod executor;
pub mod params;
pub mod query;

pub use client::create_client;
pub use config::{MssqlClient, MssqlConfig, MssqlConfigBuilder, TdsPool};
pub use executor::TiberiusConnection;
