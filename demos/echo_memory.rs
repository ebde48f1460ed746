//! Client and server in one process over an in-memory connection.
//!
//! Run with `cargo run --example echo_memory`.

use msgpack_rpc::{memory_pair, Result, RpcClient, RpcConfig, RpcError, RpcServer, TransportConfig, Value};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (client_end, server_end) = memory_pair(TransportConfig::new("echo"));

    let server = RpcServer::new();
    server.register("echo", |params: Vec<Value>| async move {
        Ok::<_, String>(params.into_iter().next().unwrap_or(Value::Nil))
    });
    let _handle = server.serve(server_end).await?;

    let client = RpcClient::new(client_end, RpcConfig::default()).await?;

    let reply = client.request_async("echo", vec![Value::from("ok")]).await?;
    println!("echo -> id={} result={}", reply.id, reply.result);

    match client.request_async("boom", vec![]).await {
        Err(RpcError::Remote { id, message }) => println!("boom -> id={id} error={message}"),
        other => println!("boom -> unexpected {other:?}"),
    }

    client.notify("echo", vec![Value::from("fire and forget")]).await?;
    println!("pending after notify: {}", client.pending_count());

    client.close().await?;
    Ok(())
}
