//! Call context for handlers.
//!
//! Every handler receives a [`CallContext`] as its first argument. It
//! identifies the originating connection and request, and offers the
//! deferred-reply path used by Async services:
//! - `respond` - encode a value as an OK envelope and send it
//! - `respond_raw` - send an already encoded envelope
//! - `fail` - send a FAIL envelope with a message
//!
//! Replies are tagged with the request id captured when the request was
//! dispatched, so a late reply still reaches the right caller even if the
//! connection has dispatched other requests since.
//!
//! # Example
//!
//! ```ignore
//! async fn slow_square(ctx: CallContext, n: i64) -> anyhow::Result<()> {
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!         let _ = ctx.respond(&(n * n)).await;
//!     });
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;
use crate::protocol::envelope;
use crate::server::ConnectionRegistry;

/// Context passed to every handler.
///
/// `CallContext` is `Clone` and `Send`; Async handlers move it into
/// whatever task eventually produces the reply.
#[derive(Clone)]
pub struct CallContext {
    /// Originating connection.
    conn_id: u64,
    /// Request id of the call being served.
    request_id: u64,
    /// Remote address, when known.
    peer: Option<SocketAddr>,
    /// Service name the request was routed to.
    service: Arc<str>,
    /// Deferred-reply path. `None` for detached contexts.
    replies: Option<Arc<ConnectionRegistry>>,
}

impl CallContext {
    /// Create a context that is not attached to any connection.
    ///
    /// Replies sent through it are discarded. Useful for calling handlers
    /// directly in tests.
    pub fn detached(conn_id: u64, request_id: u64) -> Self {
        Self {
            conn_id,
            request_id,
            peer: None,
            service: Arc::from(""),
            replies: None,
        }
    }

    pub(crate) fn for_connection(
        conn_id: u64,
        request_id: u64,
        peer: SocketAddr,
        replies: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            conn_id,
            request_id,
            peer: Some(peer),
            service: Arc::from(""),
            replies: Some(replies),
        }
    }

    pub(crate) fn with_service(mut self, name: &str) -> Self {
        self.service = Arc::from(name);
        self
    }

    /// Id of the connection the request arrived on.
    #[inline]
    pub fn connection_id(&self) -> u64 {
        self.conn_id
    }

    /// Request id the reply will carry.
    #[inline]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Remote address of the caller.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Name of the service being called.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether replies from this context go anywhere.
    pub fn is_attached(&self) -> bool {
        self.replies.is_some()
    }

    /// Send `value` as an OK envelope.
    ///
    /// A reply too large for a frame is replaced by a FAIL envelope, the
    /// same way immediate replies are.
    pub async fn respond<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let body = envelope::encode_ok(value)?;
        self.respond_raw(envelope::guard_size(body, &self.service))
            .await
    }

    /// Send an encoded envelope as-is.
    pub async fn respond_raw(&self, body: Bytes) -> Result<()> {
        match &self.replies {
            Some(replies) => replies.respond_to(self.conn_id, self.request_id, body).await,
            None => Ok(()),
        }
    }

    /// Send a FAIL envelope with `message`.
    pub async fn fail(&self, message: &str) -> Result<()> {
        self.respond_raw(envelope::guard_size(envelope::encode_fail(message), &self.service))
            .await
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("conn_id", &self.conn_id)
            .field("request_id", &self.request_id)
            .field("peer", &self.peer)
            .field("service", &self.service)
            .field("attached", &self.is_attached())
            .finish()
    }
}
