//! Server-side connection state machine.
//!
//! ```text
//!            ┌───────────── heartbeat ─────────────┐
//!            ▼                                     │
//! start ─► ReadingHead ─► ReadingBody ─► Dispatching ─► Writing ─┐
//!            ▲                              │ (Async)            │
//!            └──────────────────────────────┴────────────────────┘
//!
//! any state ─► Closed   (I/O error, idle timeout, bad header, shutdown)
//! ```
//!
//! Reads are strictly sequential: the next header is not read until the
//! previous request has been dispatched and, in Sync mode, its reply has
//! been flushed. Replies from the deferred path go through the same
//! writer queue, so they never interleave with an immediate reply.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;

use super::ConnectionRegistry;
use crate::error::{RpcError, Result};
use crate::handler::{CallContext, Dispatch, Router};
use crate::protocol::{envelope, validate_length, Header, HEADER_SIZE, INITIAL_BODY_CAPACITY};
use crate::writer::{spawn_writer, OutboundFrame, WriterHandle, WriterQueue};

/// Lifecycle state of a server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Waiting for the next 12-byte header.
    ReadingHead = 0,
    /// Header accepted, reading the body.
    ReadingBody = 1,
    /// Body handed to the router.
    Dispatching = 2,
    /// Immediate reply queued, waiting for the flush.
    Writing = 3,
    /// Transport gone. Terminal.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::ReadingHead,
            1 => ConnectionState::ReadingBody,
            2 => ConnectionState::Dispatching,
            3 => ConnectionState::Writing,
            _ => ConnectionState::Closed,
        }
    }
}

/// One accepted socket.
///
/// Shared between the connection's own task, the registry and any
/// in-flight deferred replies.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    state: AtomicU8,
    closed: AtomicBool,
    last_request_id: AtomicU64,
    writer: WriterHandle,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn new(id: u64, peer: SocketAddr, writer: WriterHandle) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            id,
            peer,
            state: AtomicU8::new(ConnectionState::ReadingHead as u8),
            closed: AtomicBool::new(false),
            last_request_id: AtomicU64::new(0),
            writer,
            shutdown,
        })
    }

    /// Connection id, unique for the lifetime of the server.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection has closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Request id of the most recently dispatched request (0 before any).
    pub fn last_request_id(&self) -> u64 {
        self.last_request_id.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ConnectionState) {
        if !self.is_closed() {
            self.state.store(state as u8, Ordering::Release);
        }
    }

    /// Close the connection. Only the first call has any effect.
    ///
    /// Wakes the read loop and stops the writer, which shuts the socket's
    /// write side down.
    pub(crate) fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.shutdown.send_replace(true);
        tracing::debug!("Connection {} ({}) closed: {}", self.id, self.peer, reason);
    }

    /// Queue a reply tagged with `request_id`.
    pub(crate) async fn send_reply(&self, request_id: u64, body: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        validate_length(body.len())?;
        self.writer.send(OutboundFrame::new(request_id, body)).await
    }

    /// Accept-side entry point: run the connection until it closes.
    ///
    /// Must be called inside the runtime the connection is pinned to.
    pub(crate) async fn run(
        self: Arc<Self>,
        stream: TcpStream,
        queue: WriterQueue,
        router: Arc<Router>,
        registry: Arc<ConnectionRegistry>,
        idle_timeout: Option<Duration>,
    ) {
        let (mut reader, write_half) = stream.into_split();
        let writer_task = spawn_writer(queue, write_half, self.shutdown.subscribe());

        let reason = match self
            .read_loop(&mut reader, &router, &registry, idle_timeout)
            .await
        {
            Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                "peer closed".to_string()
            }
            Err(e) => e.to_string(),
            Ok(()) => "shutdown".to_string(),
        };

        self.close(&reason);
        if let Ok(Err(e)) = writer_task.await {
            tracing::debug!("Connection {} writer stopped: {}", self.id, e);
        }
    }

    async fn read_loop(
        &self,
        reader: &mut OwnedReadHalf,
        router: &Router,
        registry: &Arc<ConnectionRegistry>,
        idle_timeout: Option<Duration>,
    ) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut head = [0u8; HEADER_SIZE];
        let mut body = BytesMut::with_capacity(INITIAL_BODY_CAPACITY);

        loop {
            self.set_state(ConnectionState::ReadingHead);
            let deadline = idle_timeout.map(|idle| Instant::now() + idle);

            let read = reader.read_exact(&mut head);
            if self.await_input(read, deadline, idle_timeout, &mut shutdown).await?.is_none() {
                return Ok(());
            }

            let header = Header::decode(&head)
                .ok_or_else(|| RpcError::Protocol("short header".into()))?;

            if header.is_heartbeat() {
                tracing::trace!("Connection {} heartbeat", self.id);
                continue;
            }

            if let Err(e) = header.validate() {
                tracing::warn!("Connection {} sent bad header: {}", self.id, e);
                return Err(e);
            }

            self.set_state(ConnectionState::ReadingBody);
            body.clear();
            body.resize(header.body_length as usize, 0);

            let read = reader.read_exact(&mut body[..]);
            if self.await_input(read, deadline, idle_timeout, &mut shutdown).await?.is_none() {
                return Ok(());
            }

            self.set_state(ConnectionState::Dispatching);
            self.last_request_id
                .store(header.request_id, Ordering::Release);

            let ctx = CallContext::for_connection(
                self.id,
                header.request_id,
                self.peer,
                registry.clone(),
            );

            match router.dispatch(&body, ctx).await {
                Dispatch::Reply(reply) => {
                    let reply = self.checked_reply(reply);
                    self.set_state(ConnectionState::Writing);

                    // The flush counts as activity; a peer that stops reading
                    // still hits the idle timeout.
                    let deadline = idle_timeout.map(|idle| Instant::now() + idle);
                    let write = self
                        .writer
                        .write(OutboundFrame::new(header.request_id, reply));
                    if self.await_input(write, deadline, idle_timeout, &mut shutdown).await?.is_none() {
                        return Ok(());
                    }
                }
                Dispatch::Deferred => {}
            }
        }
    }

    /// An immediate reply that fits in a frame.
    fn checked_reply(&self, reply: Bytes) -> Bytes {
        match validate_length(reply.len()) {
            Ok(()) => reply,
            Err(e) => {
                tracing::warn!("Connection {} dropped reply: {}", self.id, e);
                envelope::encode_fail("response too large")
            }
        }
    }

    /// Await one read or flush, bounded by the idle deadline and the
    /// shutdown signal.
    ///
    /// Returns `Ok(None)` when the connection was shut down locally.
    async fn await_input<F, T, E>(
        &self,
        read: F,
        deadline: Option<Instant>,
        idle_timeout: Option<Duration>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<T>>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<RpcError>,
    {
        let idle = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = read => Ok(Some(result.map_err(Into::into)?)),
            _ = idle => Err(RpcError::IdleTimeout(idle_timeout.unwrap_or_default())),
            _ = shutdown.wait_for(|stop| *stop) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::writer_channel;

    fn connection(id: u64) -> Arc<Connection> {
        let (writer, _queue) = writer_channel(4);
        Connection::new(id, "127.0.0.1:5000".parse().unwrap(), writer)
    }

    #[test]
    fn test_new_connection_state() {
        let conn = connection(1);
        assert_eq!(conn.id(), 1);
        assert_eq!(conn.state(), ConnectionState::ReadingHead);
        assert!(!conn.is_closed());
        assert_eq!(conn.last_request_id(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let conn = connection(1);
        conn.close("first");
        conn.close("second");

        assert!(conn.is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_state_sticks_at_closed() {
        let conn = connection(1);
        conn.close("done");
        conn.set_state(ConnectionState::ReadingBody);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_send_reply_after_close_fails() {
        let conn = connection(1);
        conn.close("done");

        let result = conn.send_reply(1, Bytes::from_static(&[0x91, 0x00])).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_send_reply_rejects_oversized_body() {
        let conn = connection(1);
        let body = Bytes::from(vec![0u8; crate::protocol::MAX_BODY_SIZE as usize]);

        let result = conn.send_reply(1, body).await;
        assert!(matches!(result, Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_checked_reply_replaces_oversized_body() {
        let conn = connection(1);
        let body = Bytes::from(vec![0u8; crate::protocol::MAX_BODY_SIZE as usize]);

        let reply = conn.checked_reply(body);
        assert_eq!(
            envelope::decode::<()>(&reply).unwrap(),
            envelope::Envelope::Fail("response too large".into())
        );

        let small = Bytes::from_static(&[0x91, 0x00]);
        assert_eq!(conn.checked_reply(small.clone()), small);
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(ConnectionState::from_u8(2), ConnectionState::Dispatching);
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Closed);
    }
}
