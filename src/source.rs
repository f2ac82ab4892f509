use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::driver::{ConnectionPool, DriverConnection};
use crate::error::TdsFluentError;
use crate::mock::{MockConnection, MockDataFn};
use crate::mssql::{MssqlConfig, TiberiusConnection, create_client};

/// The three mutually exclusive ways a session reaches a database.
///
/// A tagged union rather than shape probing: dispatch is a match, and an
/// invalid mode cannot be represented.
#[derive(Clone)]
pub enum ConnectionSource {
    /// Lend connections from a pool; they return on disposal.
    Pool(Arc<dyn ConnectionPool>),
    /// Open one dedicated connection per request; closed on disposal.
    Single(MssqlConfig),
    /// Bypass the database, sourcing rows from a callback; disposal is a
    /// no-op.
    Mock(Arc<MockDataFn>),
}

impl fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionSource::Pool(_) => "ConnectionSource::Pool",
            ConnectionSource::Single(_) => "ConnectionSource::Single",
            ConnectionSource::Mock(_) => "ConnectionSource::Mock",
        })
    }
}

impl ConnectionSource {
    /// Resolve this source into a live connection.
    ///
    /// A pool-acquire failure surfaces as-is: bb8 reclaims anything it
    /// handed out, so there is no secondary release step whose own failure
    /// could mask the original error.
    ///
    /// # Errors
    /// Acquire/connect failures from the pool or the TDS handshake.
    pub async fn connect(&self) -> Result<LiveConnection, TdsFluentError> {
        match self {
            ConnectionSource::Pool(pool) => {
                let conn = pool.acquire().await?;
                debug!("acquired pooled connection");
                Ok(LiveConnection {
                    conn,
                    disposal: Disposal::Release,
                })
            }
            ConnectionSource::Single(config) => {
                let client = create_client(config).await?;
                debug!(server = %config.server, "opened single connection");
                Ok(LiveConnection {
                    conn: Box::new(TiberiusConnection::single(client)),
                    disposal: Disposal::Close,
                })
            }
            ConnectionSource::Mock(callback) => Ok(LiveConnection {
                conn: Box::new(MockConnection::new(Arc::clone(callback))),
                disposal: Disposal::Noop,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Disposal {
    Release,
    Close,
    Noop,
}

/// A resolved connection plus the policy for letting it go.
pub struct LiveConnection {
    conn: Box<dyn DriverConnection>,
    disposal: Disposal,
}

impl LiveConnection {
    pub(crate) fn driver(&mut self) -> &mut dyn DriverConnection {
        self.conn.as_mut()
    }

    /// Apply the disposal policy: pooled connections go back to their pool,
    /// single connections close, mocks do nothing.
    ///
    /// # Errors
    /// Close failures from the underlying driver.
    pub(crate) async fn dispose(mut self) -> Result<(), TdsFluentError> {
        match self.disposal {
            Disposal::Noop => Ok(()),
            Disposal::Release | Disposal::Close => self.conn.close().await,
        }
    }
}
