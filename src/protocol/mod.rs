//! Protocol module - wire format, framing, and reply envelopes.
//!
//! This module implements the binary protocol shared by server and client:
//! - 12-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors
//! - `(status, value|message)` reply envelopes

pub mod envelope;
mod frame;
mod frame_buffer;
mod wire_format;

pub use envelope::{Envelope, ResultCode};
pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    validate_length, Header, HEADER_SIZE, INITIAL_BODY_CAPACITY, MAX_BODY_SIZE,
};
