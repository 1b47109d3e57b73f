//! The proxy facade: server + pool + transactions + events, wired up.
//!
//! [`Proxy::bind`] claims the listening port; [`Proxy::run`] accepts
//! clients and spawns one [`Transaction`] task per connection, assigning
//! monotonically increasing transaction ids. Collaborators observe
//! everything through [`Proxy::subscribe`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::config::ProxyConfig;
use crate::events::{EventBus, ProxyEvent};
use crate::pool::ConnectionPool;
use crate::server::Server;
use crate::transaction::Transaction;

/// An intercepting HTTP proxy bound to its listening port.
#[derive(Debug)]
pub struct Proxy {
    server: Server,
    pool: Arc<ConnectionPool>,
    events: EventBus,
    next_id: AtomicI64,
}

impl Proxy {
    /// Binds the listener described by `config`. The socket is claimed
    /// here; traffic flows once [`run`](Self::run) is awaited.
    pub fn bind(config: &ProxyConfig) -> io::Result<Self> {
        let pool = Arc::new(ConnectionPool::new());
        let server = Server::bind(config.listen_port, Arc::clone(&pool))?;

        Ok(Self { server, pool, events: EventBus::new(), next_id: AtomicI64::new(1) })
    }

    /// The bound listening address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Registers an observer of transaction lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Accepts clients until the server shuts down, spawning one
    /// transaction task per accepted connection. In-flight transactions
    /// keep running after the acceptor closes.
    pub async fn run(self) {
        let addr = self.server.local_addr().ok();
        info!(addr = ?addr, agent = crate::transaction::PROXY_AGENT, "proxy listening");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let accept_loop = tokio::spawn(self.server.run(tx));

        while let Some(connection) = rx.recv().await {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let transaction =
                Transaction::new(id, Arc::clone(&self.pool), self.events.clone(), connection);
            tokio::spawn(transaction.begin());
        }

        let _ = accept_loop.await;
        info!("proxy stopped accepting connections");
    }
}
