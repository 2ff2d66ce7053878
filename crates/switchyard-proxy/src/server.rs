//! TCP listener that accepts clients and hands each to a session driver.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{RwLock, watch};

use crate::ProxyError;
use crate::driver::drive_session;
use crate::settings::ProxySettings;

/// Pause after a failed accept, so descriptor exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Unique identifier for a client connection within one proxy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when the connection map is at capacity.
#[derive(Debug)]
pub struct ConnectionLimitReached;

/// Thread-safe map of live client connections and their peer addresses.
pub struct ConnectionMap {
    inner: RwLock<HashMap<ConnectionId, SocketAddr>>,
    max_connections: usize,
}

impl ConnectionMap {
    /// Create a new map with the given capacity limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Insert a connection. Returns `Err` if the map is at capacity.
    pub async fn insert(
        &self,
        id: ConnectionId,
        peer: SocketAddr,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(id, peer);
        Ok(())
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, id: &ConnectionId) -> Option<SocketAddr> {
        self.inner.write().await.remove(id)
    }

    /// Return the number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Return whether the map is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// The proxy's accept loop.
pub struct ProxyServer {
    settings: Arc<ProxySettings>,
    /// Live connection map (public for test inspection).
    pub connections: Arc<ConnectionMap>,
    id_gen: Arc<IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Create a server with the given settings.
    pub fn new(settings: ProxySettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            connections: Arc::new(ConnectionMap::new(settings.max_connections)),
            id_gen: Arc::new(IdGenerator::new()),
            settings: Arc::new(settings),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(self.settings.bind_addr).await?;
        tracing::info!("Proxy listening on {}", listener.local_addr()?);
        self.run_with_listener(listener).await;
        Ok(())
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    ///
    /// Failures on individual sockets are logged; only shutdown ends the loop.
    pub async fn run_with_listener(&self, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            back_off_after_accept_error(&e).await;
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!("Dropping {peer_addr}: could not set TCP_NODELAY: {e}");
                        continue;
                    }

                    let id = self.id_gen.next_id();
                    if self.connections.insert(id, peer_addr).await.is_err() {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        continue;
                    }

                    tracing::info!("Accepted connection {id:?} from {peer_addr}");

                    let connections = Arc::clone(&self.connections);
                    let settings = Arc::clone(&self.settings);
                    let task_shutdown = self.shutdown_rx.clone();

                    tokio::spawn(async move {
                        drive_session(id, stream, settings, task_shutdown).await;
                        connections.remove(&id).await;
                        tracing::info!("Connection {id:?} closed");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Proxy shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Signal the server and every session to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn back_off_after_accept_error(e: &std::io::Error) {
    tracing::warn!("Accept failed: {e}");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}
