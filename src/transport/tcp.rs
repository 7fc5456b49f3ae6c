//! TCP helpers for opening and adopting connections.

use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, instrument};

use crate::error::{ProtocolError, Result};
use crate::transport::connection::{Connection, ConnectionEvents, ConnectionOptions};
use crate::utils::timeout::with_timeout_error;

/// Connect to `addr`, giving up after `timeout`.
///
/// # Errors
/// `Timeout` when the deadline passes, `Io` when the socket cannot connect.
#[instrument(skip(options))]
pub async fn connect(
    addr: &str,
    timeout: Duration,
    options: ConnectionOptions,
) -> Result<(Connection, ConnectionEvents)> {
    let stream = with_timeout_error(
        async { TcpStream::connect(addr).await.map_err(ProtocolError::from) },
        timeout,
    )
    .await?;

    adopt(stream, options)
}

/// Wrap an accepted or connected socket.
pub fn adopt(stream: TcpStream, options: ConnectionOptions) -> Result<(Connection, ConnectionEvents)> {
    stream.set_nodelay(true)?;
    let remote = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| String::from("unknown"));

    debug!(remote = %remote, "Adopting TCP stream");
    Ok(Connection::spawn(stream, remote, options))
}

/// Bind a listener on `addr`.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}
