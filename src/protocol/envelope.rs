//! Reply envelopes.
//!
//! Every reply body is a MsgPack array whose first element is a
//! [`ResultCode`]:
//!
//! ```text
//! [0]            OK, no value (handler returned unit)
//! [0, value]     OK with a value
//! [1, message]   FAIL with a human-readable message
//! ```
//!
//! # Example
//!
//! ```
//! use wirecall::protocol::envelope::{self, Envelope};
//!
//! let bytes = envelope::encode_ok(&5i32).unwrap();
//! let decoded: Envelope<i32> = envelope::decode(&bytes).unwrap();
//! assert_eq!(decoded, Envelope::Ok(5));
//!
//! let bytes = envelope::encode_fail("unknown function: missing");
//! assert!(!envelope::is_ok(&bytes));
//! ```

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::value::UnitDeserializer;
use serde::de::{self, DeserializeOwned, IgnoredAny, IntoDeserializer, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use super::wire_format::validate_length;
use crate::codec::MsgPackCodec;
use crate::error::{RpcError, Result};

/// MsgPack nil marker.
const NIL: u8 = 0xc0;

/// MsgPack fixarray markers for one and two elements.
const FIXARRAY_1: u8 = 0x91;
const FIXARRAY_2: u8 = 0x92;

/// Longest service name, in bytes, quoted verbatim in a FAIL message.
pub const MAX_QUOTED_NAME: usize = 256;

/// Status carried in the first element of a reply envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ResultCode {
    /// The call succeeded.
    Ok = 0,
    /// The call failed; the second element is a message.
    Fail = 1,
}

impl ResultCode {
    /// Wire value of this code.
    #[inline]
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Parse a wire value.
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(ResultCode::Ok),
            1 => Some(ResultCode::Fail),
            _ => None,
        }
    }
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    /// Success with a value (unit when the reply carried none).
    Ok(T),
    /// Failure with the server's message.
    Fail(String),
}

impl<T> Envelope<T> {
    /// The envelope's status.
    pub fn code(&self) -> ResultCode {
        match self {
            Envelope::Ok(_) => ResultCode::Ok,
            Envelope::Fail(_) => ResultCode::Fail,
        }
    }

    /// Convert into a `Result`, mapping FAIL to [`RpcError::Remote`].
    pub fn into_result(self) -> Result<T> {
        match self {
            Envelope::Ok(value) => Ok(value),
            Envelope::Fail(message) => Err(RpcError::Remote(message)),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Envelope<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_seq(EnvelopeVisitor(PhantomData))
    }
}

struct EnvelopeVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for EnvelopeVisitor<T> {
    type Value = Envelope<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a reply envelope [status, value?]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let code: i16 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;

        let envelope = match ResultCode::from_i16(code) {
            Some(ResultCode::Ok) => match seq.next_element::<T>()? {
                Some(value) => Envelope::Ok(value),
                None => {
                    let unit: UnitDeserializer<A::Error> = ().into_deserializer();
                    Envelope::Ok(T::deserialize(unit)?)
                }
            },
            Some(ResultCode::Fail) => {
                Envelope::Fail(seq.next_element::<String>()?.unwrap_or_default())
            }
            None => return Err(de::Error::custom(format!("unknown result code {code}"))),
        };

        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(envelope)
    }
}

/// Encode a successful reply.
///
/// A value that encodes to nil (unit, `None`) produces the one-element
/// `[OK]` form; the decoder maps it back to nil.
pub fn encode_ok<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let encoded = MsgPackCodec::encode(value)?;
    if encoded == [NIL] {
        return Ok(Bytes::from_static(&[FIXARRAY_1, ResultCode::Ok as u8]));
    }

    let mut out = Vec::with_capacity(2 + encoded.len());
    out.push(FIXARRAY_2);
    out.push(ResultCode::Ok as u8);
    out.extend_from_slice(&encoded);
    Ok(Bytes::from(out))
}

/// Encode a failure reply.
pub fn encode_fail(message: &str) -> Bytes {
    match MsgPackCodec::encode(&(ResultCode::Fail.as_i16(), message)) {
        Ok(encoded) => Bytes::from(encoded),
        Err(_) => Bytes::from_static(&[FIXARRAY_1, ResultCode::Fail as u8]),
    }
}

/// A service name as it may appear in a FAIL message.
///
/// Names longer than [`MAX_QUOTED_NAME`] bytes are cut on a char boundary
/// and marked with `...`, so the message stays small whatever the caller
/// sent.
pub fn quoted_name(name: &str) -> Cow<'_, str> {
    if name.len() <= MAX_QUOTED_NAME {
        return Cow::Borrowed(name);
    }
    let mut end = MAX_QUOTED_NAME;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}...", &name[..end]))
}

/// Replace a reply that would not fit in a frame with a bounded FAIL.
pub fn guard_size(reply: Bytes, service: &str) -> Bytes {
    if validate_length(reply.len()).is_err() {
        let service = quoted_name(service);
        tracing::warn!(
            "Reply of {} bytes for {} exceeds frame limit",
            reply.len(),
            service
        );
        return encode_fail(&format!("response too large: {}", service));
    }
    reply
}

/// Decode a reply body.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<Envelope<T>> {
    MsgPackCodec::decode(bytes)
}

/// Status of a reply body, ignoring its value.
pub fn code(bytes: &[u8]) -> Result<ResultCode> {
    Ok(decode::<IgnoredAny>(bytes)?.code())
}

/// Check whether a reply body is a well-formed OK envelope.
pub fn is_ok(bytes: &[u8]) -> bool {
    matches!(code(bytes), Ok(ResultCode::Ok))
}
