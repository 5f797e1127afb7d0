//! Handler module - service registration and dispatch.
//!
//! Provides:
//! - [`Router`] - maps service names to type-erased handlers
//! - [`CallContext`] - identifies the call and carries the deferred-reply path
//! - [`Handler`] / [`MethodHandler`] - typed handler signatures
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wirecall::handler::{CallContext, ExecMode, Router};
//!
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! async fn greet(g: Arc<Greeter>, _ctx: CallContext, name: String) -> anyhow::Result<String> {
//!     Ok(format!("{}, {}", g.greeting, name))
//! }
//!
//! async fn ping(_ctx: CallContext) -> anyhow::Result<()> {
//!     Ok(())
//! }
//!
//! let router = Router::new();
//! router.register("ping", ping, ExecMode::Sync);
//! router.register_method(
//!     "greet",
//!     Arc::new(Greeter { greeting: "hello".into() }),
//!     greet,
//!     ExecMode::Sync,
//! );
//!
//! assert_eq!(router.service_names(), vec!["greet", "ping"]);
//! ```

mod context;
mod router;
mod typed;

pub use context::CallContext;
pub use router::{Dispatch, ExecMode, Router};
pub use typed::{BoxFuture, Handler, HandlerFuture, Invoke, MethodHandler};
