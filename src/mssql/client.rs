use std::net::ToSocketAddrs;

use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;

use super::config::{MssqlClient, MssqlConfig};
use crate::error::TdsFluentError;

/// Open one ad-hoc SQL Server connection for `config` (the "single"
/// connection source).
///
/// # Errors
/// Returns `TdsFluentError::ConnectionError` if address resolution, the TCP
/// connect, or the TDS handshake fails.
pub async fn create_client(config: &MssqlConfig) -> Result<MssqlClient, TdsFluentError> {
    let port = config.port.unwrap_or(1433);

    let addr_iter = (config.server.as_str(), port).to_socket_addrs().map_err(|e| {
        TdsFluentError::ConnectionError(format!("Failed to resolve server address: {e}"))
    })?;

    let server_addr = addr_iter.into_iter().next().ok_or_else(|| {
        TdsFluentError::ConnectionError(format!("No valid address found for {}", config.server))
    })?;

    let tcp = TcpStream::connect(server_addr)
        .await
        .map_err(|e| TdsFluentError::ConnectionError(format!("TCP connection error: {e}")))?;

    // Make the stream compatible with tiberius.
    let tcp = tcp.compat_write();

    Client::connect(config.to_tiberius(), tcp).await.map_err(|e| {
        TdsFluentError::ConnectionError(format!("SQL Server connection error: {e}"))
    })
}
