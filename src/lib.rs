//! # wirecall
//!
//! Binary-framed RPC over TCP.
//!
//! A server registers named services; a client calls them with
//! positional arguments and matches replies to calls by request id.
//!
//! ## Wire format
//!
//! - **Frame**: 12-byte header (`u32` LE body length, `u64` LE request id)
//!   followed by the body. A zero-length frame is a heartbeat.
//! - **Request body**: MsgPack array `[name, arg1, arg2, ...]`.
//! - **Reply body**: MsgPack envelope `[0, value]` on success,
//!   `[1, message]` on failure.
//!
//! ## Example
//!
//! ```no_run
//! use wirecall::{CallContext, ClientConfig, ExecMode, RpcClient, RpcServer, ServerConfig};
//!
//! async fn add(_ctx: CallContext, a: i64, b: i64) -> anyhow::Result<i64> {
//!     Ok(a + b)
//! }
//!
//! #[tokio::main]
//! async fn main() -> wirecall::Result<()> {
//!     let server = RpcServer::new();
//!     server.register("add", add, ExecMode::Sync);
//!     let addr = server.start(&ServerConfig::default().host("127.0.0.1").port(0)).await?;
//!
//!     let client = RpcClient::connect(ClientConfig::default().port(addr.port())).await?;
//!     let sum: i64 = client.call_value("add", (2i64, 3i64)).await?;
//!     assert_eq!(sum, 5);
//!
//!     client.close();
//!     server.stop().await
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod writer;

pub use client::{PendingCall, Reply, RpcClient};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Result, RpcError};
pub use handler::{CallContext, ExecMode, Router};
pub use protocol::{Envelope, ResultCode};
pub use server::{ConnectionState, RpcServer};
