//! Dedicated writer task for one socket.
//!
//! Every frame bound for a socket goes through an mpsc channel to a
//! single task that owns the write half. Enqueue order is transmission
//! order and only one write is ever outstanding.
//!
//! # Architecture
//!
//! ```text
//! Connection ───┐
//! CallContext ──┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► socket
//! RpcClient ────┘
//! ```
//!
//! Frames that are already queued when the task wakes are written as one
//! batch with vectored I/O.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{RpcError, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded 12-byte header.
    header: [u8; HEADER_SIZE],
    /// Body bytes (empty for heartbeats).
    body: Bytes,
    /// Signalled once the frame has been flushed.
    flushed: Option<oneshot::Sender<()>>,
}

impl OutboundFrame {
    /// Create a frame carrying `body` under `request_id`.
    #[inline]
    pub fn new(request_id: u64, body: Bytes) -> Self {
        Self {
            header: Header::new(body.len() as u32, request_id).encode(),
            body,
            flushed: None,
        }
    }

    /// Create a heartbeat frame.
    #[inline]
    pub fn heartbeat() -> Self {
        Self {
            header: Header::heartbeat().encode(),
            body: Bytes::new(),
            flushed: None,
        }
    }

    /// Total size of this frame (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks and runtimes.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame. Returns once it is enqueued, not written.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Queue a frame and wait until it has been written and flushed.
    pub async fn write(&self, mut frame: OutboundFrame) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        frame.flushed = Some(tx);
        self.send(frame).await?;
        rx.await.map_err(|_| RpcError::ConnectionClosed)
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of a writer channel, consumed by [`spawn_writer`].
#[derive(Debug)]
pub struct WriterQueue {
    rx: mpsc::Receiver<OutboundFrame>,
}

/// Create a writer channel.
///
/// The handle can be handed out before the socket exists; frames wait in
/// the queue until [`spawn_writer`] attaches it to a socket.
pub fn writer_channel(capacity: usize) -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (WriterHandle { tx }, WriterQueue { rx })
}

/// Spawn the writer task on the current runtime.
///
/// The task ends when every handle is dropped, when `shutdown` turns
/// true, or on the first write error. In every case it shuts the write
/// half down before returning.
///
/// Shutdown takes effect at once, even in the middle of a batch. Frames
/// still queued or partly written are dropped and their `write` callers
/// get [`RpcError::ConnectionClosed`].
pub fn spawn_writer<W>(
    queue: WriterQueue,
    writer: W,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(writer_loop(queue.rx, writer, shutdown))
}

/// Main writer loop - receives frames and writes them in batches.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let first = tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break Ok(()),
            },
            _ = shutdown.wait_for(|stop| *stop) => break Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        // A peer that stops reading must not hold the task past shutdown.
        let written = tokio::select! {
            result = write_batch(&mut writer, &batch) => result,
            _ = shutdown.wait_for(|stop| *stop) => break Ok(()),
        };
        if let Err(e) = written {
            break Err(e);
        }

        for frame in &mut batch {
            if let Some(flushed) = frame.flushed.take() {
                let _ = flushed.send(());
            }
        }
    };

    let _ = writer.shutdown().await;
    result
}

/// Write a batch of frames with vectored I/O, then flush.
///
/// Each frame contributes its header and, if non-empty, its body. Partial
/// writes resume from the first unwritten byte.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total {
        let slices = slices_from(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "socket accepted no bytes",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything in `batch` after the first `offset` bytes.
fn slices_from(batch: &[OutboundFrame], offset: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut position = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.body[..]] {
            let end = position + part.len();
            if !part.is_empty() && offset < end {
                let skip = offset.saturating_sub(position);
                slices.push(IoSlice::new(&part[skip..]));
            }
            position = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(request_id: u64, body: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(request_id, Bytes::from_static(body))
    }

    #[test]
    fn test_outbound_frame_header() {
        let f = frame(42, b"hello");
        assert_eq!(f.size(), HEADER_SIZE + 5);
        assert_eq!(Header::decode(&f.header), Some(Header::new(5, 42)));
    }

    #[test]
    fn test_heartbeat_frame() {
        let f = OutboundFrame::heartbeat();
        assert_eq!(f.size(), HEADER_SIZE);
        assert!(Header::decode(&f.header).unwrap().is_heartbeat());
    }

    #[test]
    fn test_slices_without_offset() {
        let batch = vec![frame(1, b"hello"), OutboundFrame::heartbeat()];
        let slices = slices_from(&batch, 0);

        // header + body, then the heartbeat header alone
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_slices_inside_header() {
        let batch = vec![frame(1, b"hello")];
        let slices = slices_from(&batch, 5);

        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_slices_inside_second_frame() {
        let batch = vec![frame(1, b"ab"), frame(2, b"cdef")];
        let offset = HEADER_SIZE + 2 + HEADER_SIZE + 1;
        let slices = slices_from(&batch, offset);

        assert_eq!(slices.len(), 1);
        assert_eq!(&slices[0][..], b"def");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut out = Cursor::new(Vec::new());
        let batch: Vec<_> = (1..=5).map(|i| frame(i, b"abc")).collect();

        write_batch(&mut out, &batch).await.unwrap();

        let written = out.into_inner();
        assert_eq!(written.len(), 5 * (HEADER_SIZE + 3));

        let frames = FrameBuffer::new().push(&written).unwrap();
        let ids: Vec<u64> = frames.iter().map(|f| f.request_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_enqueue_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (handle, queue) = writer_channel(16);
        let _task = spawn_writer(queue, client, stop_rx);

        for i in 1..=10u64 {
            handle.send(OutboundFrame::new(i, Bytes::from(i.to_le_bytes().to_vec()))).await.unwrap();
        }
        handle.write(frame(11, b"last")).await.unwrap();

        let mut buf = vec![0u8; 64 * 1024];
        let mut decoder = FrameBuffer::new();
        let mut frames = Vec::new();
        while frames.len() < 11 {
            let n = server.read(&mut buf).await.unwrap();
            frames.extend(decoder.push(&buf[..n]).unwrap());
        }

        let ids: Vec<u64> = frames.iter().map(|f| f.request_id()).collect();
        assert_eq!(ids, (1..=11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_write_waits_for_flush() {
        let (client, mut server) = duplex(4096);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (handle, queue) = writer_channel(4);
        let _task = spawn_writer(queue, client, stop_rx);

        handle.write(frame(7, b"ok")).await.unwrap();

        // Already flushed, so this read cannot block.
        let mut buf = [0u8; HEADER_SIZE + 2];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[HEADER_SIZE..], b"ok");
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_writer() {
        let (client, mut server) = duplex(4096);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (handle, queue) = writer_channel(4);
        let task = spawn_writer(queue, client, stop_rx);

        stop_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());

        // Write half was shut down: the peer sees EOF.
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
        assert!(handle.send(frame(1, b"late")).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_write() {
        // Peer never reads, so the batch cannot complete.
        let (client, _server) = duplex(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (handle, queue) = writer_channel(4);
        let task = spawn_writer(queue, client, stop_rx);

        let body = Bytes::from(vec![0x5A; 64 * 1024]);
        let pending = tokio::spawn(async move { handle.write(OutboundFrame::new(1, body)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        stop_tx.send(true).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(stopped.unwrap().unwrap().is_ok());

        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_writer_ends_when_handles_dropped() {
        let (client, _server) = duplex(4096);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (handle, queue) = writer_channel(4);
        let task = spawn_writer(queue, client, stop_rx);

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_write_fails_when_peer_gone() {
        let (client, server) = duplex(64);
        drop(server);

        let (_stop_tx, stop_rx) = watch::channel(false);
        let (handle, queue) = writer_channel(4);
        let task = spawn_writer(queue, client, stop_rx);

        assert!(handle.write(frame(1, b"nobody listens")).await.is_err());
        assert!(task.await.unwrap().is_err());
        assert!(handle.is_closed());
    }
}
