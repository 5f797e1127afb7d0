//! Calculator client - calls the services of `calc_server`.
//!
//! Start the server first:
//!
//! ```text
//! cargo run --example calc_server -- 9000
//! cargo run --example calc_client -- 9000
//! ```

use tracing_subscriber::EnvFilter;
use wirecall::{ClientConfig, RpcClient, RpcError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::args()
        .nth(1)
        .map(|p| p.parse::<u16>())
        .transpose()?
        .unwrap_or(ClientConfig::default().port);

    let config = ClientConfig::default()
        .port(port)
        .reconnect_attempts(Some(5))
        .wait_timeout_secs(5)
        .heartbeat_interval_secs(5);
    let client = RpcClient::connect(config).await?;

    let sum: i64 = client.call_value("add", (2i64, 3i64)).await?;
    println!("add(2, 3) = {}", sum);

    match client.call_value::<f64, _>("divide", (1.0f64, 0.0f64)).await {
        Ok(value) => println!("divide(1, 0) = {}", value),
        Err(RpcError::Remote(message)) => println!("divide(1, 0) failed: {}", message),
        Err(e) => return Err(e.into()),
    }

    // Sent first, answered last.
    let slow = client.send("slow_square", (12i64, 300u64)).await?;
    let hits = client.send("hit", ()).await?;
    println!("hit() = {}", hits.wait().await?.value::<u64>()?);
    println!("slow_square(12) = {}", slow.wait().await?.value::<i64>()?);

    let reply = client.call("missing", ()).await?;
    println!("missing() -> {:?}", reply.error_message());

    client.close();
    Ok(())
}
