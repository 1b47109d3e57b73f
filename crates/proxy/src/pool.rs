//! Creation of client and upstream connections.
//!
//! The pool is shared by every transaction: it wraps freshly accepted
//! sockets into [`Connection`] handles and opens outbound connections by
//! resolving a host name on the I/O runtime and trying each resolved
//! endpoint in order. Despite the name, no idle upstream connections are
//! kept yet — [`ConnectionPool::find_open`] is the hook where reuse would
//! slot in.

use std::io;
use std::sync::Arc;

use tokio::net::{self, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, trace};

use crate::connection::Connection;
use crate::protocol::ProxyError;

/// Shared factory for client and upstream [`Connection`]s.
///
/// All operations are safe to call concurrently from any number of
/// transactions; the pool holds only immutable state.
pub struct ConnectionPool {
    tls: TlsConnector,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool").finish_non_exhaustive()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self { tls: TlsConnector::from(Arc::new(config)) }
    }

    /// Wraps a freshly accepted client socket into a [`Connection`].
    pub fn wrap_accepted(&self, socket: TcpStream) -> Connection {
        let _ = socket.set_nodelay(true);
        Connection::Tcp(socket)
    }

    /// Resolves `host` and opens a TCP connection to the first resolved
    /// endpoint that accepts.
    ///
    /// Resolution failure (or an empty result) maps to
    /// [`ProxyError::RemoteDnsLookup`]; connect failures map to
    /// [`ProxyError::Network`] carrying the last underlying cause.
    pub async fn try_open(&self, host: &str, port: u16) -> Result<Connection, ProxyError> {
        trace!(host, port, "resolving upstream");
        let addrs = net::lookup_host((host, port))
            .await
            .map_err(|e| ProxyError::dns_lookup(Some(e)))?;

        let mut last_error: Option<io::Error> = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(host, port, %addr, "upstream connected");
                    let _ = stream.set_nodelay(true);
                    return Ok(Connection::Tcp(stream));
                }
                Err(e) => {
                    debug!(host, port, %addr, cause = %e, "upstream endpoint refused");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(ProxyError::network(e)),
            // lookup returned no endpoints at all
            None => Err(ProxyError::dns_lookup(None)),
        }
    }

    /// Opens an outbound connection and completes a TLS client handshake
    /// on it. Not used by `CONNECT` tunnels (those stay opaque); this is
    /// the typed endpoint for transports that need TLS themselves.
    pub async fn try_open_tls(&self, host: &str, port: u16) -> Result<Connection, ProxyError> {
        let tcp = match self.try_open(host, port).await? {
            Connection::Tcp(stream) => stream,
            Connection::Tls(_) => unreachable!("try_open only produces plain streams"),
        };

        let server_name = ServerName::try_from(host.to_owned()).map_err(|_| {
            ProxyError::network(io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))
        })?;

        let stream = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(ProxyError::network)?;

        Ok(Connection::Tls(Box::new(stream)))
    }

    /// Looks for an idle pooled connection to `host:port`.
    ///
    /// Always `None`: upstream connections are not kept alive between
    /// transactions yet.
    pub fn find_open(&self, host: &str, port: u16) -> Option<Connection> {
        let _ = (host, port);
        None
    }
}
