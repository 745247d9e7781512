//! TCP listener and connector.
//!
//! # Example
//!
//! ```ignore
//! use tagwire::transport::{connect, Listener};
//!
//! let listener = Listener::bind("127.0.0.1", 9001, 128).await?;
//! let (stream, peer) = listener.accept().await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};

use crate::error::{EndpointError, Result};

/// Listening socket owned by the server role.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Resolve `host`, bind `port` and listen with the given backlog.
    ///
    /// Port 0 picks an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn bind(host: &str, port: u16, backlog: u32) -> Result<Self> {
        let addr = resolve(host, port).await?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        // Windows treats SO_REUSEADDR as permission to steal a bound port
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;

        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;
        let local_addr = listener.local_addr()?;

        tracing::debug!(%local_addr, backlog, "listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Connect to `host:port`, trying each resolved address in turn.
///
/// # Errors
///
/// `Timeout("connect")` when `timeout` expires first, otherwise the last
/// address's connect error.
pub async fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let attempt = connect_any(host, port);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| EndpointError::Timeout("connect"))??,
        None => attempt.await?,
    };

    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn connect_any(host: &str, port: u16) -> Result<TcpStream> {
    let mut last_err = None;

    for addr in lookup_host((host, port)).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => EndpointError::Io(e),
        None => unresolved(host, port),
    })
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| unresolved(host, port))
}

fn unresolved(host: &str, port: u16) -> EndpointError {
    EndpointError::Config(format!("{}:{} did not resolve to an address", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = Listener::bind("127.0.0.1", 0, 16).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_connect_and_accept() {
        let listener = Listener::bind("127.0.0.1", 0, 16).await.unwrap();
        let port = listener.local_addr().port();

        let (client, accepted) = tokio::join!(
            connect("127.0.0.1", port, Some(Duration::from_secs(5))),
            listener.accept()
        );

        let client = client.unwrap();
        let (_stream, peer) = accepted.unwrap();
        assert_eq!(client.local_addr().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // grab a free port, then close it
        let port = Listener::bind("127.0.0.1", 0, 1).await.unwrap().local_addr().port();

        let result = connect("127.0.0.1", port, None).await;
        assert!(matches!(result, Err(EndpointError::Io(_))));
    }
}
