//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and body.
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use wirecall::protocol::{Frame, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::new(5, 42), Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.request_id(), 42);
//! assert_eq!(frame.body(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    /// Check if this is a heartbeat.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.header.is_heartbeat()
    }
}

/// Build a complete frame as a single byte vector.
///
/// The header's length field is taken from `body.len()`.
///
/// # Example
///
/// ```
/// use wirecall::protocol::build_frame;
///
/// let bytes = build_frame(42, b"hello");
/// assert_eq!(bytes.len(), 12 + 5);
/// ```
pub fn build_frame(request_id: u64, body: &[u8]) -> Vec<u8> {
    let header = Header::new(body.len() as u32, request_id);
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(Header::new(5, 42), Bytes::from_static(b"hello"));

        assert_eq!(frame.request_id(), 42);
        assert_eq!(frame.body(), b"hello");
        assert!(!frame.is_heartbeat());
    }

    #[test]
    fn test_heartbeat_frame() {
        let frame = Frame::new(Header::heartbeat(), Bytes::new());
        assert!(frame.is_heartbeat());
        assert!(frame.body().is_empty());
    }

    #[test]
    fn test_build_frame() {
        let bytes = build_frame(42, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);

        let parsed = Header::decode(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(parsed, Header::new(5, 42));
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_build_frame_empty_body_is_heartbeat() {
        let bytes = build_frame(0, b"");
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert!(Header::decode(&bytes).unwrap().is_heartbeat());
    }

    #[test]
    fn test_build_frame_through_buffer() {
        use super::super::FrameBuffer;

        let bytes = build_frame(456, b"0123456789");

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id(), 456);
        assert_eq!(frames[0].body(), b"0123456789");
    }
}
