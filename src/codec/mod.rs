//! Codec module - MsgPack bodies and typed call arguments.
//!
//! - [`MsgPackCodec`] - value encoding using `rmp-serde`
//! - [`ToArgs`] / [`FromArgs`] - tuples of arguments, flattened into the
//!   request array after the service name
//!
//! # Example
//!
//! ```
//! use wirecall::codec::{decode_args, decode_service_name, encode_request};
//!
//! let payload = encode_request("add", &(2i32, 3i32)).unwrap();
//! assert_eq!(decode_service_name(&payload).unwrap(), "add");
//!
//! let (a, b): (i32, i32) = decode_args(&payload).unwrap();
//! assert_eq!(a + b, 5);
//! ```

mod args;
mod msgpack;

pub use args::{decode_args, decode_service_name, encode_request, FromArgs, RequestBody, ToArgs};
pub use msgpack::MsgPackCodec;
