//! TCP accept loop and listener lifecycle.
//!
//! The server binds an IPv4 listening socket with `SO_REUSEADDR`, accepts
//! client sockets onto the I/O runtime, wraps each one through the shared
//! [`ConnectionPool`] and forwards it as an event on a channel consumed by
//! the proxy facade. Accept errors are logged and the loop keeps going; a
//! shutdown signal (`SIGINT`, `SIGTERM` or `SIGQUIT` where available)
//! closes the acceptor while in-flight transactions run to completion.

use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::thread;

use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::pool::ConnectionPool;

const ACCEPT_BACKLOG: u32 = 1024;

/// The number of runtime worker threads to use when the configuration
/// says "auto": one less than the hardware concurrency so one core stays
/// free under load, but never fewer than four, and four when the
/// concurrency cannot be determined.
pub fn default_worker_threads() -> usize {
    let hardware = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    std::cmp::max(4, hardware.saturating_sub(1))
}

/// Owns the listening socket and runs the accept loop.
#[derive(Debug)]
pub struct Server {
    listener: tokio::net::TcpListener,
    pool: Arc<ConnectionPool>,
}

impl Server {
    /// Binds an IPv4 listener on `port` with `SO_REUSEADDR` set.
    /// Port 0 asks the OS for an ephemeral port; see
    /// [`local_addr`](Self::local_addr).
    pub fn bind(port: u16, pool: Arc<ConnectionPool>) -> io::Result<Self> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
        let listener = socket.listen(ACCEPT_BACKLOG)?;

        Ok(Self { listener, pool })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until a shutdown signal arrives or the
    /// receiving side of `connections` goes away. Each accepted socket is
    /// wrapped by the pool and forwarded.
    pub async fn run(self, connections: mpsc::UnboundedSender<Connection>) {
        let mut shutdown = pin!(shutdown_signal());

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, closing acceptor");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, remote_addr)) => {
                            debug!(%remote_addr, "accepted client connection");
                            let connection = self.pool.wrap_accepted(socket);
                            if connections.send(connection).is_err() {
                                info!("connection consumer gone, closing acceptor");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(cause = %e, "failed to accept");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) {
        (Ok(mut interrupt), Ok(mut terminate), Ok(mut quit)) => {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
                _ = quit.recv() => {}
            }
        }
        _ => {
            warn!("failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
