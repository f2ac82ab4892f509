use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::{ConnectionManager, rt};
use serde::{Deserialize, Serialize};
use tiberius::{AuthMethod, Config as TiberiusConfig};

use crate::driver::{ConnectionPool, DriverConnection};
use crate::error::TdsFluentError;
use crate::mssql::executor::TiberiusConnection;

/// Type alias for the SQL Server client used throughout the binding.
pub type MssqlClient = rt::Client;

/// Connection settings for one SQL Server instance.
///
/// Serde derives let deployments keep this in a config file next to the
/// rest of their settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MssqlConfig {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub port: Option<u16>,
    pub instance_name: Option<String>,
}

impl MssqlConfig {
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            port: None,
            instance_name: None,
        }
    }

    #[must_use]
    pub fn builder(
        server: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> MssqlConfigBuilder {
        MssqlConfigBuilder {
            config: Self::new(server, database, user, password),
        }
    }

    pub(crate) fn to_tiberius(&self) -> TiberiusConfig {
        let mut config = TiberiusConfig::new();
        config.host(&self.server);
        config.database(&self.database);
        config.port(self.port.unwrap_or(1433));
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        if let Some(instance) = &self.instance_name {
            config.instance_name(instance);
        }
        config.trust_cert();
        config
    }
}

/// Fluent builder for `MssqlConfig`.
#[derive(Debug, Clone)]
pub struct MssqlConfigBuilder {
    config: MssqlConfig,
}

impl MssqlConfigBuilder {
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    #[must_use]
    pub fn instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.config.instance_name = Some(instance_name.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> MssqlConfig {
        self.config
    }
}

/// A bb8-backed SQL Server connection pool usable as a session source.
#[derive(Clone)]
pub struct TdsPool {
    inner: Pool<ConnectionManager>,
}

impl TdsPool {
    /// Build a pool for `config` with the given upper bound on connections.
    ///
    /// # Errors
    /// Returns `TdsFluentError::ConnectionError` if manager or pool creation
    /// fails.
    pub async fn connect(config: &MssqlConfig, max_size: u32) -> Result<Self, TdsFluentError> {
        let manager = ConnectionManager::build(config.to_tiberius()).map_err(|e| {
            TdsFluentError::ConnectionError(format!(
                "Failed to configure SQL Server manager: {e}"
            ))
        })?;

        let inner = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .await
            .map_err(|e| {
                TdsFluentError::ConnectionError(format!("Failed to create SQL Server pool: {e}"))
            })?;

        Ok(Self { inner })
    }

    /// Wrap an existing bb8 pool.
    #[must_use]
    pub fn from_bb8(inner: Pool<ConnectionManager>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ConnectionPool for TdsPool {
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, TdsFluentError> {
        let conn = self
            .inner
            .get_owned()
            .await
            .map_err(TdsFluentError::PoolError)?;
        Ok(Box::new(TiberiusConnection::pooled(conn)))
    }
}
