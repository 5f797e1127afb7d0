//! Service table and request dispatch.
//!
//! The router maps service names to type-erased invokers. Each server
//! owns its own router, so two servers in one process never share a
//! service table.
//!
//! # Example
//!
//! ```
//! use wirecall::handler::{CallContext, ExecMode, Router};
//!
//! async fn add(_ctx: CallContext, a: i32, b: i32) -> anyhow::Result<i32> {
//!     Ok(a + b)
//! }
//!
//! let router = Router::new();
//! router.register("add", add, ExecMode::Sync);
//!
//! assert!(router.contains("add"));
//! assert_eq!(router.mode("add"), Some(ExecMode::Sync));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::task::JoinError;

use super::typed::{MethodInvoker, TypedInvoker};
use super::{CallContext, Handler, Invoke, MethodHandler};
use crate::codec::{decode_service_name, FromArgs};
use crate::protocol::envelope;

/// How a service's reply is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// The handler's return value is the reply, sent as soon as it
    /// completes. The connection reads nothing else in the meantime.
    #[default]
    Sync,
    /// The connection sends nothing; the handler replies later through
    /// [`CallContext::respond`] or the server's `respond`.
    Async,
}

/// Outcome of dispatching one request.
#[derive(Debug)]
pub enum Dispatch {
    /// Send this envelope now.
    Reply(Bytes),
    /// Nothing to send now; the reply comes through the deferred path.
    Deferred,
}

/// Entry for a registered service.
struct ServiceEntry {
    invoker: Arc<dyn Invoke>,
    mode: ExecMode,
}

/// Registry mapping service names to handlers.
pub struct Router {
    services: RwLock<HashMap<String, ServiceEntry>>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under `name`, replacing any previous entry.
    pub fn register<H, Args>(&self, name: &str, handler: H, mode: ExecMode)
    where
        H: Handler<Args>,
        Args: FromArgs + 'static,
    {
        self.register_invoker(name, Arc::new(TypedInvoker::<H, Args>::new(handler)), mode);
    }

    /// Register a handler bound to `receiver`, replacing any previous entry.
    pub fn register_method<S, H, Args>(&self, name: &str, receiver: Arc<S>, handler: H, mode: ExecMode)
    where
        S: Send + Sync + 'static,
        H: MethodHandler<S, Args>,
        Args: FromArgs + 'static,
    {
        self.register_invoker(
            name,
            Arc::new(MethodInvoker::<S, H, Args>::new(receiver, handler)),
            mode,
        );
    }

    /// Register a pre-built invoker.
    pub fn register_invoker(&self, name: &str, invoker: Arc<dyn Invoke>, mode: ExecMode) {
        let previous = self
            .services
            .write()
            .insert(name.to_string(), ServiceEntry { invoker, mode });

        if previous.is_some() {
            tracing::debug!("Replaced service {}", name);
        }
    }

    /// Remove a service. Returns whether it was registered.
    pub fn remove(&self, name: &str) -> bool {
        self.services.write().remove(name).is_some()
    }

    /// Check if a service is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// Execution mode of a service.
    pub fn mode(&self, name: &str) -> Option<ExecMode> {
        self.services.read().get(name).map(|e| e.mode)
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Dispatch a request body.
    ///
    /// Never fails: unknown services, undecodable requests, handler errors
    /// and panics all become FAIL envelopes. Lookup and decode failures are
    /// always replied to immediately, whatever the service's mode.
    pub async fn dispatch(&self, payload: &[u8], ctx: CallContext) -> Dispatch {
        let name = match decode_service_name(payload) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!("Undecodable request {}: {}", ctx.request_id(), e);
                let reply = envelope::encode_fail(&format!("invalid request: {}", e));
                return Dispatch::Reply(envelope::guard_size(reply, "request"));
            }
        };

        let entry = self
            .services
            .read()
            .get(&name)
            .map(|e| (e.invoker.clone(), e.mode));

        let (invoker, mode) = match entry {
            Some(entry) => entry,
            None => {
                tracing::debug!("Unknown service {}", envelope::quoted_name(&name));
                let reply = envelope::encode_fail(&format!(
                    "unknown function: {}",
                    envelope::quoted_name(&name)
                ));
                return Dispatch::Reply(envelope::guard_size(reply, &name));
            }
        };

        let ctx = ctx.with_service(&name);

        let call = match invoker.invoke(ctx.clone(), payload) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!("Bad arguments for {}: {}", envelope::quoted_name(&name), e);
                let reply = envelope::encode_fail(&format!(
                    "invalid arguments for {}: {}",
                    envelope::quoted_name(&name),
                    e
                ));
                return Dispatch::Reply(envelope::guard_size(reply, &name));
            }
        };

        // Spawned so a panicking handler surfaces as a JoinError.
        let task = tokio::spawn(call);

        match mode {
            ExecMode::Sync => {
                let reply = match task.await {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => {
                        tracing::warn!("Service {} failed: {:#}", name, e);
                        envelope::encode_fail(&format!("{:#}", e))
                    }
                    Err(e) => {
                        let message = join_error_message(e);
                        tracing::warn!("Service {} {}", name, message);
                        envelope::encode_fail(&message)
                    }
                };
                Dispatch::Reply(envelope::guard_size(reply, &name))
            }
            ExecMode::Async => {
                tokio::spawn(async move {
                    let message = match task.await {
                        Ok(Ok(_)) => return,
                        Ok(Err(e)) => format!("{:#}", e),
                        Err(e) => join_error_message(e),
                    };
                    tracing::warn!("Service {} failed: {}", ctx.service(), message);
                    if let Err(e) = ctx.fail(&message).await {
                        tracing::debug!("Could not deliver failure for {}: {}", ctx.service(), e);
                    }
                });
                Dispatch::Deferred
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler cancelled".to_string();
    }

    let payload: Box<dyn Any + Send> = err.into_panic();
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("handler panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_request;
    use crate::protocol::Envelope;

    async fn add(_ctx: CallContext, a: i32, b: i32) -> anyhow::Result<i32> {
        Ok(a + b)
    }

    async fn mul(_ctx: CallContext, a: i32, b: i32) -> anyhow::Result<i32> {
        Ok(a * b)
    }

    async fn explode(_ctx: CallContext) -> anyhow::Result<()> {
        panic!("kaboom")
    }

    async fn broken(_ctx: CallContext) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("disk full").context("write failed"))
    }

    async fn later(_ctx: CallContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn huge(_ctx: CallContext) -> anyhow::Result<serde_bytes::ByteBuf> {
        Ok(serde_bytes::ByteBuf::from(vec![0u8; crate::protocol::MAX_BODY_SIZE as usize]))
    }

    fn ctx() -> CallContext {
        CallContext::detached(1, 7)
    }

    fn expect_reply(dispatch: Dispatch) -> Bytes {
        match dispatch {
            Dispatch::Reply(bytes) => bytes,
            Dispatch::Deferred => panic!("expected an immediate reply"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_sync() {
        let router = Router::new();
        router.register("add", add, ExecMode::Sync);

        let payload = encode_request("add", &(2i32, 3i32)).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);

        assert_eq!(envelope::decode::<i32>(&reply).unwrap(), Envelope::Ok(5));
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let router = Router::new();

        let payload = encode_request("missing", &()).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);

        assert_eq!(
            envelope::decode::<()>(&reply).unwrap(),
            Envelope::Fail("unknown function: missing".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_service_with_huge_name_fits_in_frame() {
        let router = Router::new();
        let name = "x".repeat(crate::protocol::MAX_BODY_SIZE as usize - 16);

        let payload = encode_request(&name, &()).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);

        assert!(reply.len() < 1024);
        match envelope::decode::<()>(&reply).unwrap() {
            Envelope::Fail(message) => {
                assert!(message.starts_with("unknown function: xxx"));
                assert!(message.ends_with("..."));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let router = Router::new();
        let reply = expect_reply(router.dispatch(b"\xc0", ctx()).await);

        match envelope::decode::<()>(&reply).unwrap() {
            Envelope::Fail(message) => assert!(message.starts_with("invalid request")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_argument_mismatch() {
        let router = Router::new();
        router.register("add", add, ExecMode::Sync);

        let payload = encode_request("add", &(1i32,)).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);

        match envelope::decode::<i32>(&reply).unwrap() {
            Envelope::Fail(message) => assert!(message.starts_with("invalid arguments for add")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_message_includes_context() {
        let router = Router::new();
        router.register("broken", broken, ExecMode::Sync);

        let payload = encode_request("broken", &()).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);

        assert_eq!(
            envelope::decode::<()>(&reply).unwrap(),
            Envelope::Fail("write failed: disk full".into())
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_fail() {
        let router = Router::new();
        router.register("explode", explode, ExecMode::Sync);

        let payload = encode_request("explode", &()).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);

        assert_eq!(
            envelope::decode::<()>(&reply).unwrap(),
            Envelope::Fail("handler panicked: kaboom".into())
        );
    }

    #[tokio::test]
    async fn test_oversized_reply_is_replaced() {
        let router = Router::new();
        router.register("huge", huge, ExecMode::Sync);

        let payload = encode_request("huge", &()).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);

        assert_eq!(
            envelope::decode::<()>(&reply).unwrap(),
            Envelope::Fail("response too large: huge".into())
        );
    }

    #[tokio::test]
    async fn test_async_mode_defers() {
        let router = Router::new();
        router.register("later", later, ExecMode::Async);

        let payload = encode_request("later", &()).unwrap();
        assert!(matches!(
            router.dispatch(&payload, ctx()).await,
            Dispatch::Deferred
        ));
    }

    #[tokio::test]
    async fn test_async_mode_lookup_failures_reply_now() {
        let router = Router::new();
        router.register("later", later, ExecMode::Async);

        let payload = encode_request("later", &(1i32,)).unwrap();
        assert!(matches!(
            router.dispatch(&payload, ctx()).await,
            Dispatch::Reply(_)
        ));
    }

    #[tokio::test]
    async fn test_reregister_overwrites() {
        let router = Router::new();
        router.register("op", add, ExecMode::Sync);
        router.register("op", mul, ExecMode::Async);

        assert_eq!(router.len(), 1);
        assert_eq!(router.mode("op"), Some(ExecMode::Async));

        router.register("op", mul, ExecMode::Sync);
        let payload = encode_request("op", &(4i32, 5i32)).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);
        assert_eq!(envelope::decode::<i32>(&reply).unwrap(), Envelope::Ok(20));
    }

    #[test]
    fn test_remove() {
        let router = Router::new();
        router.register("add", add, ExecMode::Sync);

        assert!(router.remove("add"));
        assert!(!router.remove("add"));
        assert!(!router.contains("add"));
        assert!(router.is_empty());
    }

    #[test]
    fn test_service_names_sorted() {
        let router = Router::new();
        router.register("mul", mul, ExecMode::Sync);
        router.register("add", add, ExecMode::Sync);

        assert_eq!(router.service_names(), vec!["add", "mul"]);
    }

    #[tokio::test]
    async fn test_method_registration() {
        struct Scale(i32);

        async fn scale(s: Arc<Scale>, _ctx: CallContext, n: i32) -> anyhow::Result<i32> {
            Ok(s.0 * n)
        }

        let router = Router::new();
        router.register_method("scale", Arc::new(Scale(10)), scale, ExecMode::Sync);

        let payload = encode_request("scale", &(7i32,)).unwrap();
        let reply = expect_reply(router.dispatch(&payload, ctx()).await);
        assert_eq!(envelope::decode::<i32>(&reply).unwrap(), Envelope::Ok(70));
    }
}
