//! Request payloads.
//!
//! A request body is one flat MsgPack array: the service name followed by
//! the arguments, `[name, arg0, arg1, ...]`. The server reads the name
//! first to pick a handler, then the handler decodes its own arguments
//! from the same bytes.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, DeserializeOwned, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::MsgPackCodec;
use crate::error::Result;

/// A tuple of call arguments that can be written after the service name.
pub trait ToArgs {
    /// Number of arguments.
    const ARITY: usize;

    /// Write each argument as one element of an enclosing tuple.
    fn serialize_elements<S: SerializeTuple>(&self, seq: &mut S) -> std::result::Result<(), S::Error>;
}

/// A tuple of call arguments that can be read after the service name.
pub trait FromArgs: Sized {
    /// Number of arguments.
    const ARITY: usize;

    /// Read exactly `ARITY` elements from the sequence.
    fn from_seq<'de, S: SeqAccess<'de>>(seq: &mut S) -> std::result::Result<Self, S::Error>;
}

fn missing_argument<E: de::Error>(expected: usize, got: usize) -> E {
    E::custom(format!("expected {} argument(s), got {}", expected, got))
}

macro_rules! impl_args {
    ($arity:expr; $($ty:ident $idx:tt),*) => {
        impl<$($ty: Serialize),*> ToArgs for ($($ty,)*) {
            const ARITY: usize = $arity;

            #[allow(unused_variables)]
            fn serialize_elements<S: SerializeTuple>(
                &self,
                seq: &mut S,
            ) -> std::result::Result<(), S::Error> {
                $( seq.serialize_element(&self.$idx)?; )*
                Ok(())
            }
        }

        impl<$($ty: DeserializeOwned),*> FromArgs for ($($ty,)*) {
            const ARITY: usize = $arity;

            #[allow(unused_variables)]
            fn from_seq<'de, S: SeqAccess<'de>>(seq: &mut S) -> std::result::Result<Self, S::Error> {
                Ok(($(
                    seq.next_element::<$ty>()?
                        .ok_or_else(|| missing_argument(Self::ARITY, $idx))?,
                )*))
            }
        }
    };
}

impl_args!(0;);
impl_args!(1; T0 0);
impl_args!(2; T0 0, T1 1);
impl_args!(3; T0 0, T1 1, T2 2);
impl_args!(4; T0 0, T1 1, T2 2, T3 3);
impl_args!(5; T0 0, T1 1, T2 2, T3 3, T4 4);
impl_args!(6; T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);
impl_args!(7; T0 0, T1 1, T2 2, T3 3, T4 4, T5 5, T6 6);
impl_args!(8; T0 0, T1 1, T2 2, T3 3, T4 4, T5 5, T6 6, T7 7);

/// Borrowed view of an outgoing request, serialized as `[name, args...]`.
pub struct RequestBody<'a, A> {
    /// Service name.
    pub name: &'a str,
    /// Argument tuple.
    pub args: &'a A,
}

impl<A: ToArgs> Serialize for RequestBody<'_, A> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_tuple(1 + A::ARITY)?;
        seq.serialize_element(self.name)?;
        self.args.serialize_elements(&mut seq)?;
        seq.end()
    }
}

/// Encode a request body.
pub fn encode_request<A: ToArgs>(name: &str, args: &A) -> Result<Vec<u8>> {
    MsgPackCodec::encode(&RequestBody { name, args })
}

/// The leading service name of a request, remaining elements skipped.
struct ServiceName(String);

impl<'de> Deserialize<'de> for ServiceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NameVisitor;

        impl<'de> Visitor<'de> for NameVisitor {
            type Value = ServiceName;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a request array starting with a service name")
            }

            fn visit_seq<S: SeqAccess<'de>>(self, mut seq: S) -> std::result::Result<ServiceName, S::Error> {
                let name: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(ServiceName(name))
            }
        }

        deserializer.deserialize_seq(NameVisitor)
    }
}

/// Arguments of a request, service name skipped, arity checked.
struct CallArgs<A>(A);

impl<'de, A: FromArgs> Deserialize<'de> for CallArgs<A> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ArgsVisitor<A>(PhantomData<A>);

        impl<'de, A: FromArgs> Visitor<'de> for ArgsVisitor<A> {
            type Value = CallArgs<A>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a request array with {} argument(s)", A::ARITY)
            }

            fn visit_seq<S: SeqAccess<'de>>(self, mut seq: S) -> std::result::Result<CallArgs<A>, S::Error> {
                if seq.next_element::<IgnoredAny>()?.is_none() {
                    return Err(de::Error::invalid_length(0, &self));
                }

                let args = A::from_seq(&mut seq)?;

                if seq.next_element::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom(format!(
                        "expected {} argument(s), got more",
                        A::ARITY
                    )));
                }

                Ok(CallArgs(args))
            }
        }

        deserializer.deserialize_seq(ArgsVisitor(PhantomData))
    }
}

/// Read the service name from a request body.
pub fn decode_service_name(payload: &[u8]) -> Result<String> {
    let ServiceName(name) = MsgPackCodec::decode(payload)?;
    Ok(name)
}

/// Read the arguments from a request body.
pub fn decode_args<A: FromArgs>(payload: &[u8]) -> Result<A> {
    let CallArgs(args) = MsgPackCodec::decode(payload)?;
    Ok(args)
}
