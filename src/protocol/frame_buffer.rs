//! Incremental frame decoder for the client side.
//!
//! The client reader pulls whatever the socket has and feeds it here; the
//! decoder hands back every frame that became complete. Bytes of a frame
//! that is still arriving stay buffered until the next push.
//!
//! Heartbeats come out as frames with an empty body; the caller decides
//! what to do with them.
//!
//! # Example
//!
//! ```
//! use wirecall::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&build_frame(7, b"reply")).unwrap();
//!
//! assert_eq!(frames[0].request_id(), 7);
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{Header, HEADER_SIZE, MAX_BODY_SIZE};
use super::Frame;
use crate::error::{RpcError, Result};

/// Initial size of the accumulation buffer, one socket read's worth.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Fewer than [`HEADER_SIZE`] bytes of the next frame seen.
    Head,
    /// Header consumed; waiting for `header.body_length` bytes.
    Body(Header),
}

/// Splits a byte stream into frames.
pub struct FrameBuffer {
    pending: BytesMut,
    stage: Stage,
    /// Exclusive upper bound on body length.
    limit: u32,
}

impl FrameBuffer {
    /// Decoder enforcing [`MAX_BODY_SIZE`].
    pub fn new() -> Self {
        Self::with_max_body(MAX_BODY_SIZE)
    }

    /// Decoder with a custom exclusive body limit.
    pub fn with_max_body(limit: u32) -> Self {
        Self {
            pending: BytesMut::with_capacity(INITIAL_CAPACITY),
            stage: Stage::Head,
            limit,
        }
    }

    /// Append `data` and return every frame it completed, in stream order.
    ///
    /// # Errors
    ///
    /// A protocol error when a header announces a body at or above the
    /// limit. The stream cannot be resynchronised after that; drop the
    /// decoder together with the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.pending.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.stage {
                Stage::Head => {
                    let Some(header) = Header::decode(&self.pending) else {
                        break;
                    };
                    if header.body_length >= self.limit {
                        return Err(RpcError::Protocol(format!(
                            "Reply of {} bytes exceeds maximum {}",
                            header.body_length, self.limit
                        )));
                    }
                    self.pending.advance(HEADER_SIZE);

                    if header.is_heartbeat() {
                        frames.push(Frame::new(header, Bytes::new()));
                    } else {
                        self.stage = Stage::Body(header);
                    }
                }
                Stage::Body(header) => {
                    let needed = header.body_length as usize;
                    if self.pending.len() < needed {
                        break;
                    }
                    let body = self.pending.split_to(needed).freeze();
                    frames.push(Frame::new(header, body));
                    self.stage = Stage::Head;
                }
            }
        }

        Ok(frames)
    }

    /// Bytes held for a frame that is not yet complete.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no partial frame is held.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.stage == Stage::Head
    }

    /// Forget any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.stage = Stage::Head;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
