//! Calculator server - a small service table behind `RpcServer`.
//!
//! This demo shows:
//! - Registering plain async functions as Sync services
//! - A method handler bound to shared state
//! - An Async service that replies later through its `CallContext`
//!
//! # Running
//!
//! ```text
//! RUST_LOG=wirecall=debug cargo run --example calc_server -- 9000
//! cargo run --example calc_client -- 9000
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wirecall::{CallContext, ExecMode, RpcServer, ServerConfig};

async fn add(_ctx: CallContext, a: i64, b: i64) -> anyhow::Result<i64> {
    Ok(a + b)
}

async fn divide(_ctx: CallContext, a: f64, b: f64) -> anyhow::Result<f64> {
    if b == 0.0 {
        anyhow::bail!("division by zero");
    }
    Ok(a / b)
}

/// Counts calls across every connection.
#[derive(Default)]
struct Counter {
    hits: AtomicU64,
}

async fn hit(counter: Arc<Counter>, _ctx: CallContext) -> anyhow::Result<u64> {
    Ok(counter.hits.fetch_add(1, Ordering::Relaxed) + 1)
}

async fn slow_square(ctx: CallContext, n: i64, delay_ms: u64) -> anyhow::Result<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if let Err(e) = ctx.respond(&(n * n)).await {
            tracing::warn!("Late reply for connection {} lost: {}", ctx.connection_id(), e);
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::args()
        .nth(1)
        .map(|p| p.parse::<u16>())
        .transpose()?
        .unwrap_or(ServerConfig::DEFAULT_PORT);

    let server = RpcServer::new();
    server.register("add", add, ExecMode::Sync);
    server.register("divide", divide, ExecMode::Sync);
    server.register_method("hit", Arc::new(Counter::default()), hit, ExecMode::Sync);
    server.register("slow_square", slow_square, ExecMode::Async);

    let addr = server.start(&ServerConfig::default().port(port)).await?;
    tracing::info!("Calculator ready on {}", addr);

    tokio::signal::ctrl_c().await?;
    server.stop().await?;
    Ok(())
}
