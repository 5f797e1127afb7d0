//! Live connections, keyed by id.
//!
//! Entries are inserted on accept and removed only by the reaper once the
//! connection reports closed. Ids come from a monotonic counter and are
//! never reused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};

use super::{Connection, ConnectionState};
use crate::error::{RpcError, Result};

/// Registry of server connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry. The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next connection id.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn insert(&self, conn: Arc<Connection>) {
        self.connections.lock().insert(conn.id(), conn);
    }

    /// Look up a connection.
    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    /// State of a connection, if it is still registered.
    pub fn state(&self, id: u64) -> Option<ConnectionState> {
        self.get(id).map(|conn| conn.state())
    }

    /// Send `body` on connection `id`, tagged with the request id that
    /// connection dispatched last.
    pub async fn respond(&self, id: u64, body: Bytes) -> Result<()> {
        let conn = self.get(id).ok_or(RpcError::ConnectionClosed)?;
        let request_id = conn.last_request_id();
        conn.send_reply(request_id, body).await
    }

    /// Send `body` on connection `id`, tagged with `request_id`.
    pub async fn respond_to(&self, id: u64, request_id: u64, body: Bytes) -> Result<()> {
        let conn = self.get(id).ok_or(RpcError::ConnectionClosed)?;
        conn.send_reply(request_id, body).await
    }

    /// Drop every closed connection. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|_, conn| !conn.is_closed());
        before - connections.len()
    }

    /// Close every registered connection. Entries stay until reaped.
    pub(crate) fn close_all(&self, reason: &str) {
        let connections: Vec<Arc<Connection>> = self.connections.lock().values().cloned().collect();
        for conn in connections {
            conn.close(reason);
        }
    }

    /// Number of registered connections, closed or not.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically reap closed connections until `shutdown` turns true.
pub(crate) async fn run_reaper(
    registry: Arc<ConnectionRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = registry.reap();
                if removed > 0 {
                    tracing::debug!(
                        "Reaped {} closed connection(s), {} remaining",
                        removed,
                        registry.len()
                    );
                }
            }
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }
}
