//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` and travel as maps
//! keyed by field name.
//!
//! # Example
//!
//! ```
//! use wirecall::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! let encoded = MsgPackCodec::encode(&Point { x: 1, y: 2 }).unwrap();
//! let decoded: Point = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, Point { x: 1, y: 2 });
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for request and reply bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (structs as maps).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
