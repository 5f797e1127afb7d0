//! Typed handlers and their type-erased form.
//!
//! Any `Fn(CallContext, A0, A1, ...) -> impl Future<Output = anyhow::Result<R>>`
//! with up to eight MsgPack-decodable arguments is a [`Handler`]. Bound
//! methods take the receiver first: `Fn(Arc<S>, CallContext, A0, ...)`
//! is a [`MethodHandler`].
//!
//! At registration time the handler is wrapped in an invoker that knows
//! the concrete argument tuple, then stored as `Arc<dyn Invoke>`.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::CallContext;
use crate::codec::{decode_args, FromArgs};
use crate::error::Result;
use crate::protocol::envelope;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A running handler: resolves to an encoded OK envelope, or the error
/// that becomes a FAIL envelope.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Bytes>>;

/// Type-erased decode-and-invoke capability stored in the router.
pub trait Invoke: Send + Sync + 'static {
    /// Decode `payload` (the full request array) into this handler's
    /// arguments and start the call.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the arguments do not match the handler's
    /// signature. Nothing has run in that case.
    fn invoke(&self, ctx: CallContext, payload: &[u8]) -> Result<HandlerFuture>;
}

/// A free function or closure usable as a service.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Call the handler with decoded arguments.
    fn call(&self, ctx: CallContext, args: Args) -> HandlerFuture;
}

/// A function taking a shared receiver as its first parameter.
pub trait MethodHandler<S, Args>: Send + Sync + 'static {
    /// Call the handler on `receiver` with decoded arguments.
    fn call(&self, receiver: Arc<S>, ctx: CallContext, args: Args) -> HandlerFuture;
}

async fn encode_outcome<R, Fut>(fut: Fut) -> anyhow::Result<Bytes>
where
    R: Serialize,
    Fut: Future<Output = anyhow::Result<R>>,
{
    let value = fut.await?;
    Ok(envelope::encode_ok(&value)?)
}

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        impl<F, Fut, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn(CallContext, $($ty,)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
            R: Serialize + Send + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            #[allow(non_snake_case)]
            fn call(&self, ctx: CallContext, args: ($($ty,)*)) -> HandlerFuture {
                let ($($ty,)*) = args;
                Box::pin(encode_outcome((self)(ctx, $($ty,)*)))
            }
        }

        impl<F, Fut, R, S, $($ty,)*> MethodHandler<S, ($($ty,)*)> for F
        where
            F: Fn(Arc<S>, CallContext, $($ty,)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
            R: Serialize + Send + 'static,
            S: Send + Sync + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            #[allow(non_snake_case)]
            fn call(&self, receiver: Arc<S>, ctx: CallContext, args: ($($ty,)*)) -> HandlerFuture {
                let ($($ty,)*) = args;
                Box::pin(encode_outcome((self)(receiver, ctx, $($ty,)*)))
            }
        }
    };
}

impl_handler!();
impl_handler!(T0);
impl_handler!(T0, T1);
impl_handler!(T0, T1, T2);
impl_handler!(T0, T1, T2, T3);
impl_handler!(T0, T1, T2, T3, T4);
impl_handler!(T0, T1, T2, T3, T4, T5);
impl_handler!(T0, T1, T2, T3, T4, T5, T6);
impl_handler!(T0, T1, T2, T3, T4, T5, T6, T7);

/// Invoker for a free handler with a known argument tuple.
pub(crate) struct TypedInvoker<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> TypedInvoker<H, Args> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _args: PhantomData,
        }
    }
}

impl<H, Args> Invoke for TypedInvoker<H, Args>
where
    H: Handler<Args>,
    Args: FromArgs + 'static,
{
    fn invoke(&self, ctx: CallContext, payload: &[u8]) -> Result<HandlerFuture> {
        let args = decode_args::<Args>(payload)?;
        Ok(self.handler.call(ctx, args))
    }
}

/// Invoker for a handler bound to a shared receiver.
pub(crate) struct MethodInvoker<S, H, Args> {
    receiver: Arc<S>,
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<S, H, Args> MethodInvoker<S, H, Args> {
    pub(crate) fn new(receiver: Arc<S>, handler: H) -> Self {
        Self {
            receiver,
            handler,
            _args: PhantomData,
        }
    }
}

impl<S, H, Args> Invoke for MethodInvoker<S, H, Args>
where
    S: Send + Sync + 'static,
    H: MethodHandler<S, Args>,
    Args: FromArgs + 'static,
{
    fn invoke(&self, ctx: CallContext, payload: &[u8]) -> Result<HandlerFuture> {
        let args = decode_args::<Args>(payload)?;
        Ok(self.handler.call(self.receiver.clone(), ctx, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_request;
    use crate::protocol::Envelope;

    async fn add(_ctx: CallContext, a: i32, b: i32) -> anyhow::Result<i32> {
        Ok(a + b)
    }

    async fn touch(_ctx: CallContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn refuse(_ctx: CallContext, reason: String) -> anyhow::Result<u8> {
        anyhow::bail!("refused: {}", reason)
    }

    struct Counter {
        base: i64,
    }

    async fn offset(counter: Arc<Counter>, _ctx: CallContext, n: i64) -> anyhow::Result<i64> {
        Ok(counter.base + n)
    }

    fn ctx() -> CallContext {
        CallContext::detached(1, 1)
    }

    #[tokio::test]
    async fn test_typed_invoker_runs_handler() {
        let invoker = TypedInvoker::<_, (i32, i32)>::new(add);
        let payload = encode_request("add", &(2i32, 3i32)).unwrap();

        let reply = invoker.invoke(ctx(), &payload).unwrap().await.unwrap();
        assert_eq!(envelope::decode::<i32>(&reply).unwrap(), Envelope::Ok(5));
    }

    #[tokio::test]
    async fn test_unit_return_encodes_short_envelope() {
        let invoker = TypedInvoker::<_, ()>::new(touch);
        let payload = encode_request("touch", &()).unwrap();

        let reply = invoker.invoke(ctx(), &payload).unwrap().await.unwrap();
        assert_eq!(&reply[..], &[0x91, 0x00]);
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let invoker = TypedInvoker::<_, (String,)>::new(refuse);
        let payload = encode_request("refuse", &("busy",)).unwrap();

        let err = invoker.invoke(ctx(), &payload).unwrap().await.unwrap_err();
        assert_eq!(err.to_string(), "refused: busy");
    }

    #[test]
    fn test_argument_mismatch_fails_before_running() {
        let invoker = TypedInvoker::<_, (i32, i32)>::new(add);
        let payload = encode_request("add", &("2", "3")).unwrap();

        assert!(invoker.invoke(ctx(), &payload).is_err());
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let invoker = TypedInvoker::<_, (String,)>::new(|_ctx: CallContext, name: String| async move {
            anyhow::Ok(format!("hello {}", name))
        });
        let payload = encode_request("greet", &("bob",)).unwrap();

        let reply = invoker.invoke(ctx(), &payload).unwrap().await.unwrap();
        assert_eq!(
            envelope::decode::<String>(&reply).unwrap(),
            Envelope::Ok("hello bob".to_string())
        );
    }

    #[tokio::test]
    async fn test_method_invoker_uses_receiver() {
        let invoker = MethodInvoker::<_, _, (i64,)>::new(Arc::new(Counter { base: 100 }), offset);
        let payload = encode_request("offset", &(5i64,)).unwrap();

        let reply = invoker.invoke(ctx(), &payload).unwrap().await.unwrap();
        assert_eq!(envelope::decode::<i64>(&reply).unwrap(), Envelope::Ok(105));
    }
}
