//! RPC client.
//!
//! [`RpcClient`] sends `(name, args...)` requests over one TCP connection
//! and matches replies to calls by request id. Many calls may be in
//! flight at once; frames go out in the order the calls were made.
//!
//! # Example
//!
//! ```no_run
//! use wirecall::{ClientConfig, RpcClient};
//!
//! #[tokio::main]
//! async fn main() -> wirecall::Result<()> {
//!     let client = RpcClient::connect(ClientConfig::default().port(9000)).await?;
//!
//!     let reply = client.call("add", (2i64, 3i64)).await?;
//!     assert!(reply.success());
//!     assert_eq!(reply.value::<i64>()?, 5);
//!
//!     // Fire two calls, then collect both replies.
//!     let first = client.send("add", (1i64, 1i64)).await?;
//!     let second = client.send("add", (2i64, 2i64)).await?;
//!     assert_eq!(second.wait().await?.value::<i64>()?, 4);
//!     assert_eq!(first.wait().await?.value::<i64>()?, 2);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

mod connection;
mod reply;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

pub use reply::{PendingCall, Reply};

use crate::codec::{encode_request, ToArgs};
use crate::config::ClientConfig;
use crate::error::{RpcError, Result};
use crate::protocol::validate_length;
use connection::ClientConnection;

/// A connection to an RPC server.
///
/// All methods take `&self`; share the client behind an `Arc` to call
/// from several tasks.
pub struct RpcClient {
    config: ClientConfig,
    conn: Mutex<Option<Arc<ClientConnection>>>,
    /// Next request id. Starts at 1; 0 only ever appears on heartbeats.
    next_request_id: AtomicU64,
    wait_timeout_secs: AtomicU64,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Connect to the configured server.
    ///
    /// Each attempt is bounded by `connect_timeout_secs`; failed attempts
    /// are retried after `retry_delay_ms` until `reconnect_attempts` is
    /// used up (forever when unset).
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad configuration, `ConnectFailed` when every
    /// attempt failed.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let client = Self {
            wait_timeout_secs: AtomicU64::new(config.wait_timeout_secs),
            config,
            conn: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            heartbeat_task: Mutex::new(None),
        };
        client.reconnect().await?;
        Ok(client)
    }

    /// Re-run the connect procedure and replace the current connection.
    ///
    /// Calls still pending on the old connection fail with
    /// `ConnectionClosed`. Request ids keep increasing.
    pub async fn reconnect(&self) -> Result<()> {
        let stream = establish(&self.config).await?;
        let conn = ClientConnection::start(stream, self.config.channel_capacity);

        if let Some(old) = self.conn.lock().replace(conn.clone()) {
            old.close("replaced by reconnect");
        }

        let heartbeat = self
            .config
            .heartbeat_interval()
            .map(|period| tokio::spawn(heartbeat_loop(conn, period)));
        if let Some(old) = std::mem::replace(&mut *self.heartbeat_task.lock(), heartbeat) {
            old.abort();
        }

        tracing::info!("Connected to {}", self.config.address());
        Ok(())
    }

    /// Send a call and return a handle to wait for its reply.
    ///
    /// The request is queued for writing before this returns; the reply
    /// is collected with [`PendingCall::wait`].
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` when not connected, `Protocol` when the encoded
    /// request does not fit in a frame.
    pub async fn send<A: ToArgs>(&self, name: &str, args: A) -> Result<PendingCall> {
        let payload = Bytes::from(encode_request(name, &args)?);
        validate_length(payload.len())?;

        let conn = self.current()?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let rx = conn.register(request_id)?;

        if let Err(e) = conn.send(request_id, payload).await {
            conn.forget(request_id);
            return Err(e);
        }

        Ok(PendingCall {
            request_id,
            rx,
            timeout: self.wait_timeout(),
            conn,
        })
    }

    /// Send a call and wait for its reply.
    ///
    /// A FAIL reply is still `Ok`: inspect it with [`Reply::success`] or
    /// turn it into an error with [`Reply::value`] / [`Reply::check`].
    pub async fn call<A: ToArgs>(&self, name: &str, args: A) -> Result<Reply> {
        self.send(name, args).await?.wait().await
    }

    /// Send a call, wait, and decode the value. FAIL becomes
    /// [`RpcError::Remote`].
    pub async fn call_value<T, A>(&self, name: &str, args: A) -> Result<T>
    where
        T: DeserializeOwned,
        A: ToArgs,
    {
        self.call(name, args).await?.value()
    }

    /// Send one heartbeat frame.
    pub async fn heartbeat(&self) -> Result<()> {
        self.current()?.heartbeat().await
    }

    /// Set how long calls wait for replies, in seconds (0 = forever).
    ///
    /// Applies to calls sent after this returns.
    pub fn set_wait_timeout(&self, secs: u64) {
        self.wait_timeout_secs.store(secs, Ordering::Relaxed);
    }

    /// Current reply wait, `None` for no limit.
    pub fn wait_timeout(&self) -> Option<Duration> {
        match self.wait_timeout_secs.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Whether there is a live connection.
    pub fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .map_or(false, |conn| !conn.is_closed())
    }

    /// Calls sent on the current connection and not yet answered.
    pub fn pending_count(&self) -> usize {
        self.conn
            .lock()
            .as_ref()
            .map_or(0, |conn| conn.pending_count())
    }

    /// The configuration this client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Close the connection. Pending calls fail with `ConnectionClosed`.
    ///
    /// The client can be revived with [`reconnect`](Self::reconnect).
    pub fn close(&self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
        if let Some(conn) = self.conn.lock().take() {
            conn.close("closed by client");
        }
    }

    fn current(&self) -> Result<Arc<ClientConnection>> {
        match self.conn.lock().as_ref() {
            Some(conn) if !conn.is_closed() => Ok(conn.clone()),
            _ => Err(RpcError::ConnectionClosed),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect with a per-attempt deadline, retrying within the budget.
async fn establish(config: &ClientConfig) -> Result<TcpStream> {
    let addr = config.address();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let outcome = tokio::time::timeout(
            config.connect_timeout(),
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("Could not set nodelay on {}: {}", addr, e);
                }
                return Ok(stream);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", config.connect_timeout()),
        };

        tracing::warn!("Connect attempt {} to {} failed: {}", attempts, addr, failure);

        if config.reconnect_attempts.map_or(false, |max| attempts >= max) {
            return Err(RpcError::ConnectFailed { addr, attempts });
        }

        tokio::time::sleep(config.retry_delay()).await;
    }
}

async fn heartbeat_loop(conn: Arc<ClientConnection>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        if conn.heartbeat().await.is_err() {
            break;
        }
    }
}
