//! Math service over TCP.
//!
//! Run with `cargo run --example math_tcp`. Starts a server on an ephemeral
//! loopback port, then calls it from a client built with `TransportBuilder`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use msgpack_rpc::{Result, RpcClient, RpcConfig, RpcServer, TransportBuilder, TransportConfig};

/// Request to add two numbers. Sent as the positional params `[a, b]`.
#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = RpcServer::new();

    server.register_typed("add", |req: AddRequest| async move { Ok::<_, String>(req.a + req.b) });

    server.register_typed("div", |(a, b): (i32, i32)| async move {
        if b == 0 {
            return Err("division by zero");
        }
        Ok(a / b)
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let _accept = server.serve_tcp(listener, TransportConfig::new("math-server"));

    let transport = TransportBuilder::new()
        .uri(format!("tcp://{addr}"))
        .transport_id("math-client")
        .connect_timeout(Duration::from_secs(3))
        .build()
        .await?;

    let config = RpcConfig::default().with_request_timeout(Duration::from_secs(5));
    let client = RpcClient::new(transport, config).await?;

    let sum: i32 = client.call("add", AddRequest { a: 20, b: 3 }).await?;
    println!("20 + 3 = {sum}");

    let quotient: i32 = client.call("div", (84, 2)).await?;
    println!("84 / 2 = {quotient}");

    match client.call::<_, i32>("div", (1, 0)).await {
        Ok(value) => println!("1 / 0 = {value}?"),
        Err(err) => println!("1 / 0 failed: {err}"),
    }

    client.close().await?;
    Ok(())
}
