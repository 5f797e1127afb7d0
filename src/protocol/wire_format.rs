//! Wire format encoding and decoding.
//!
//! Implements the 12-byte header format:
//! ```text
//! ┌──────────┬──────────────────┬─────────────────┐
//! │ Length   │ Request ID       │ Body            │
//! │ 4 bytes  │ 8 bytes          │ Length bytes    │
//! │ uint32 LE│ uint64 LE        │                 │
//! └──────────┴──────────────────┴─────────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. A zero length is a heartbeat.

use crate::error::{RpcError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Exclusive upper bound on the body length (10 MiB).
pub const MAX_BODY_SIZE: u32 = 10 * 1024 * 1024;

/// Initial capacity of per-connection body buffers.
pub const INITIAL_BODY_CAPACITY: usize = 2 * 1024;

/// Byte offset of the length field.
const LENGTH_OFFSET: usize = 0;

/// Byte offset of the request id field.
const REQUEST_ID_OFFSET: usize = 4;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Body length in bytes (0 = heartbeat).
    pub body_length: u32,
    /// Request identifier, echoed back on the reply.
    pub request_id: u64,
}

impl Header {
    /// Create a new header.
    pub fn new(body_length: u32, request_id: u64) -> Self {
        Self {
            body_length,
            request_id,
        }
    }

    /// Header of a heartbeat frame.
    pub fn heartbeat() -> Self {
        Self::new(0, 0)
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use wirecall::protocol::Header;
    ///
    /// let bytes = Header::new(100, 42).encode();
    /// assert_eq!(bytes.len(), 12);
    /// assert_eq!(bytes[0], 100);
    /// assert_eq!(bytes[4], 42);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[LENGTH_OFFSET..REQUEST_ID_OFFSET].copy_from_slice(&self.body_length.to_le_bytes());
        buf[REQUEST_ID_OFFSET..HEADER_SIZE].copy_from_slice(&self.request_id.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use wirecall::protocol::Header;
    ///
    /// let bytes = [5, 0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.body_length, 5);
    /// assert_eq!(header.request_id, 9);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let length: [u8; 4] = buf.get(LENGTH_OFFSET..REQUEST_ID_OFFSET)?.try_into().ok()?;
        let request_id: [u8; 8] = buf.get(REQUEST_ID_OFFSET..HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            body_length: u32::from_le_bytes(length),
            request_id: u64::from_le_bytes(request_id),
        })
    }

    /// Validate the announced body length.
    ///
    /// Heartbeats (length 0) are valid; anything at or above
    /// [`MAX_BODY_SIZE`] is a protocol violation.
    pub fn validate(&self) -> Result<()> {
        validate_length(self.body_length as usize)
    }

    /// Check if this is a heartbeat (no body, never dispatched).
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.body_length == 0
    }
}

/// Check that a body of `len` bytes fits in a frame.
pub fn validate_length(len: usize) -> Result<()> {
    if len >= MAX_BODY_SIZE as usize {
        return Err(RpcError::Protocol(format!(
            "Body size {} exceeds maximum {}",
            len, MAX_BODY_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(100, 42);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = Header::new(0x0403_0201, 0x0C0B_0A09_0807_0605);
        let bytes = header.encode();

        // Length: bytes 0..4
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);

        // Request ID: the 8 bytes right after the length field
        assert_eq!(
            &bytes[4..12],
            &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C]
        );
    }

    #[test]
    fn test_header_size_is_exactly_12() {
        assert_eq!(HEADER_SIZE, 12);
        assert_eq!(Header::new(1, 1).encode().len(), 12);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 11];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut buf = Header::new(3, 77).encode().to_vec();
        buf.extend_from_slice(b"abc");
        assert_eq!(Header::decode(&buf), Some(Header::new(3, 77)));
    }

    #[test]
    fn test_heartbeat_is_valid() {
        let header = Header::heartbeat();
        assert!(header.is_heartbeat());
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_validate_body_bounds() {
        assert!(Header::new(MAX_BODY_SIZE - 1, 1).validate().is_ok());

        let result = Header::new(MAX_BODY_SIZE, 1).validate();
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));

        assert!(Header::new(u32::MAX, 1).validate().is_err());
    }

    #[test]
    fn test_max_request_id() {
        let header = Header::new(1, u64::MAX);
        assert_eq!(Header::decode(&header.encode()).unwrap().request_id, u64::MAX);
    }
}
