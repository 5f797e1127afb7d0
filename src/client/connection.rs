//! One client socket: writer task, reader task and pending-call table.
//!
//! The table lives with the socket it was sent on. When the socket dies
//! every call still waiting on it fails with `ConnectionClosed`, and a
//! reconnect starts from an empty table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{RpcError, Result};
use crate::protocol::FrameBuffer;
use crate::writer::{spawn_writer, writer_channel, OutboundFrame, WriterHandle};

/// Size of each socket read.
const READ_BUFFER_SIZE: usize = 64 * 1024;

type ReplySlot = oneshot::Sender<Result<Bytes>>;

pub(crate) struct ClientConnection {
    writer: WriterHandle,
    pending: Mutex<HashMap<u64, ReplySlot>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ClientConnection {
    /// Take ownership of a connected socket and start its tasks.
    pub(crate) fn start(stream: TcpStream, channel_capacity: usize) -> Arc<Self> {
        let (reader, write_half) = stream.into_split();
        let (writer, queue) = writer_channel(channel_capacity);
        let (shutdown, _) = watch::channel(false);

        let conn = Arc::new(Self {
            writer,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown,
        });

        let writer_task = spawn_writer(queue, write_half, conn.shutdown.subscribe());
        tokio::spawn(read_loop(conn.clone(), reader));
        tokio::spawn(watch_writer(conn.clone(), writer_task));

        conn
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reserve the result slot for `request_id`.
    ///
    /// Must happen before the request is written, so a fast reply always
    /// finds its slot.
    pub(crate) fn register(&self, request_id: u64) -> Result<oneshot::Receiver<Result<Bytes>>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        // Checked under the table lock so `close` cannot drain between
        // the check and the insert.
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        pending.insert(request_id, tx);
        Ok(rx)
    }

    /// Deliver a reply body to its waiter.
    fn complete(&self, request_id: u64, body: Bytes) {
        let slot = self.pending.lock().remove(&request_id);
        match slot {
            // The waiter may have timed out and gone; nothing to do then.
            Some(slot) => {
                let _ = slot.send(Ok(body));
            }
            None => tracing::debug!("Discarding reply for unknown request {}", request_id),
        }
    }

    /// Drop the slot of a call nobody is waiting for any more.
    pub(crate) fn forget(&self, request_id: u64) {
        self.pending.lock().remove(&request_id);
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) async fn send(&self, request_id: u64, body: Bytes) -> Result<()> {
        self.writer.send(OutboundFrame::new(request_id, body)).await
    }

    pub(crate) async fn heartbeat(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        self.writer.send(OutboundFrame::heartbeat()).await
    }

    /// Close the socket and fail every pending call. Only the first call
    /// has any effect.
    pub(crate) fn close(&self, reason: &str) {
        let drained: Vec<ReplySlot> = {
            let mut pending = self.pending.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            pending.drain().map(|(_, slot)| slot).collect()
        };

        self.shutdown.send_replace(true);

        if !drained.is_empty() {
            tracing::debug!("Failing {} pending call(s): {}", drained.len(), reason);
        }
        for slot in drained {
            let _ = slot.send(Err(RpcError::ConnectionClosed));
        }
        tracing::debug!("Client connection closed: {}", reason);
    }
}

async fn read_loop(conn: Arc<ClientConnection>, mut reader: OwnedReadHalf) {
    let mut shutdown = conn.shutdown.subscribe();
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let reason = loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            _ = shutdown.wait_for(|stop| *stop) => break "closed locally".to_string(),
        };

        let n = match read {
            Ok(0) => break "server closed the connection".to_string(),
            Ok(n) => n,
            Err(e) => break format!("read failed: {}", e),
        };

        let complete = match frames.push(&buf[..n]) {
            Ok(complete) => complete,
            Err(e) => {
                tracing::warn!("Protocol error from server: {}", e);
                break e.to_string();
            }
        };

        for frame in complete {
            if frame.is_heartbeat() {
                continue;
            }
            conn.complete(frame.request_id(), frame.body);
        }
    };

    conn.close(&reason);
}

async fn watch_writer(conn: Arc<ClientConnection>, writer_task: JoinHandle<Result<()>>) {
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => conn.close(&format!("write failed: {}", e)),
        Err(e) => conn.close(&format!("writer task ended: {}", e)),
    }
}
