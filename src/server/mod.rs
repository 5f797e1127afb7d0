//! RPC server: accept loop, connection registry, reaper.
//!
//! # Example
//!
//! ```no_run
//! use wirecall::{CallContext, ExecMode, RpcServer, ServerConfig};
//!
//! async fn add(_ctx: CallContext, a: i64, b: i64) -> anyhow::Result<i64> {
//!     Ok(a + b)
//! }
//!
//! #[tokio::main]
//! async fn main() -> wirecall::Result<()> {
//!     let server = RpcServer::new();
//!     server.register("add", add, ExecMode::Sync);
//!
//!     let addr = server.start(&ServerConfig::default().port(9000)).await?;
//!     println!("listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await
//! }
//! ```

mod connection;
mod pool;
mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use connection::{Connection, ConnectionState};
pub use pool::IoPool;
pub use registry::ConnectionRegistry;

use crate::codec::FromArgs;
use crate::config::ServerConfig;
use crate::error::{RpcError, Result};
use crate::handler::{ExecMode, Handler, MethodHandler, Router};
use crate::writer::writer_channel;

/// Everything that exists only while the server is started.
struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    reaper_task: JoinHandle<()>,
    pool: Arc<IoPool>,
}

/// A name-routed RPC server.
///
/// Services can be registered and removed at any time, before or after
/// `start`.
pub struct RpcServer {
    router: Arc<Router>,
    registry: Arc<ConnectionRegistry>,
    running: Mutex<Option<Running>>,
}

impl RpcServer {
    /// Create a stopped server with no services.
    pub fn new() -> Self {
        Self {
            router: Arc::new(Router::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            running: Mutex::new(None),
        }
    }

    /// The server's service table.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Register a handler under `name`.
    pub fn register<H, Args>(&self, name: &str, handler: H, mode: ExecMode)
    where
        H: Handler<Args>,
        Args: FromArgs + 'static,
    {
        self.router.register(name, handler, mode);
    }

    /// Register a handler bound to `receiver` under `name`.
    pub fn register_method<S, H, Args>(&self, name: &str, receiver: Arc<S>, handler: H, mode: ExecMode)
    where
        S: Send + Sync + 'static,
        H: MethodHandler<S, Args>,
        Args: FromArgs + 'static,
    {
        self.router.register_method(name, receiver, handler, mode);
    }

    /// Remove a service. Returns whether it was registered.
    pub fn remove(&self, name: &str) -> bool {
        self.router.remove(name)
    }

    /// Bind, start the I/O pool, the accept loop and the reaper.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when the port is 0.
    pub async fn start(&self, config: &ServerConfig) -> Result<SocketAddr> {
        config.validate()?;
        if self.running.lock().is_some() {
            return Err(RpcError::AlreadyRunning);
        }

        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let pool = Arc::new(IoPool::new(config.pool_size)?);
        let (shutdown, _) = watch::channel(false);

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(RpcError::AlreadyRunning);
        }

        let accept_task = tokio::spawn(accept_loop(
            listener,
            AcceptState {
                router: self.router.clone(),
                registry: self.registry.clone(),
                pool: pool.clone(),
                idle_timeout: config.idle_timeout(),
                channel_capacity: config.channel_capacity,
            },
            shutdown.subscribe(),
        ));
        let reaper_task = tokio::spawn(registry::run_reaper(
            self.registry.clone(),
            config.reap_interval(),
            shutdown.subscribe(),
        ));

        *running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
            reaper_task,
            pool,
        });

        tracing::info!(
            "Listening on {} ({} I/O thread(s), idle timeout {:?})",
            local_addr,
            config.pool_size,
            config.idle_timeout()
        );
        Ok(local_addr)
    }

    /// Stop accepting, close every connection and stop the I/O pool.
    pub async fn stop(&self) -> Result<()> {
        let running = self.running.lock().take().ok_or(RpcError::NotRunning)?;

        running.shutdown.send_replace(true);
        if let Err(e) = running.accept_task.await {
            tracing::warn!("Accept task ended abnormally: {}", e);
        }
        if let Err(e) = running.reaper_task.await {
            tracing::warn!("Reaper task ended abnormally: {}", e);
        }

        self.registry.close_all("server stopped");
        self.registry.reap();

        // Joining the pool threads blocks; keep it off the async workers.
        let pool = running.pool;
        tokio::task::spawn_blocking(move || drop(pool))
            .await
            .map_err(|e| RpcError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        tracing::info!("Server on {} stopped", running.local_addr);
        Ok(())
    }

    /// Whether `start` has succeeded and `stop` has not been called.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Send an encoded envelope on `conn_id`, tagged with the request id
    /// that connection dispatched last.
    ///
    /// This is the deferred-reply path for Async services.
    pub async fn respond(&self, conn_id: u64, body: Bytes) -> Result<()> {
        self.registry.respond(conn_id, body).await
    }

    /// Number of registered connections, including closed ones the
    /// reaper has not yet removed.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// State of a registered connection.
    pub fn connection_state(&self, conn_id: u64) -> Option<ConnectionState> {
        self.registry.state(conn_id)
    }

    /// Remove closed connections now rather than waiting for the reaper.
    pub fn reap(&self) -> usize {
        self.registry.reap()
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.send_replace(true);
            running.accept_task.abort();
            running.reaper_task.abort();
            self.registry.close_all("server dropped");
        }
    }
}

/// What the accept loop hands to each new connection.
struct AcceptState {
    router: Arc<Router>,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<IoPool>,
    idle_timeout: Option<Duration>,
    channel_capacity: usize,
}

async fn accept_loop(listener: TcpListener, state: AcceptState, mut shutdown: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        match accepted {
            Ok((stream, peer)) => state.adopt(stream, peer),
            Err(e) => tracing::warn!("Accept failed: {}", e),
        }
    }
}

impl AcceptState {
    /// Register an accepted socket and start it on a pool runtime.
    fn adopt(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.registry.next_id();
        let (writer, queue) = writer_channel(self.channel_capacity);
        let conn = Connection::new(id, peer, writer);
        self.registry.insert(conn.clone());
        tracing::info!("Accepted connection {} from {}", id, peer);

        // Re-registered inside the target runtime so its I/O is driven there.
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                conn.close(&format!("detach failed: {}", e));
                return;
            }
        };

        let router = self.router.clone();
        let registry = self.registry.clone();
        let idle_timeout = self.idle_timeout;

        self.pool.acquire().spawn(async move {
            let stream = match TcpStream::from_std(stream) {
                Ok(stream) => stream,
                Err(e) => {
                    conn.close(&format!("attach failed: {}", e));
                    return;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Connection {} nodelay: {}", conn.id(), e);
            }
            conn.run(stream, queue, router, registry, idle_timeout).await;
        });
    }
}
