mod common;

use std::time::Duration;

use tokio::net::TcpListener;

use msgpack_rpc::{
    //
    connect_tcp,
    Result,
    RpcClient,
    RpcConfig,
    RpcError,
    TransportBuilder,
    TransportConfig,
    Value,
    NOT_IMPLEMENTED,
};

use common::{init_logging, test_server};

async fn listen() -> Result<(TcpListener, String)> {
    // ---
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    Ok((listener, addr))
}

#[tokio::test]
async fn test_round_trip_over_tcp() -> Result<()> {
    // ---
    init_logging();
    let (listener, addr) = listen().await?;
    let (server, _parked) = test_server();
    let _accept = server.serve_tcp(listener, TransportConfig::new("tcp-server"));

    let transport = connect_tcp(addr, TransportConfig::new("tcp-client"));
    let client = RpcClient::new(transport, RpcConfig::default()).await?;

    let reply = client.request_async("echo", vec![Value::from("ok")]).await?;
    assert_eq!(reply.result, Value::from("ok"));

    match client.request_async("boom", vec![]).await {
        Err(RpcError::Remote { message, .. }) => assert_eq!(message, NOT_IMPLEMENTED),
        other => panic!("expected Not Implemented, got {other:?}"),
    }

    let sum: i64 = client.call("add", (40, 2)).await?;
    assert_eq!(sum, 42);

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_builder_connects_multiple_clients() -> Result<()> {
    // ---
    init_logging();
    let (listener, addr) = listen().await?;
    let (server, _parked) = test_server();
    let _accept = server.serve_tcp(listener, TransportConfig::new("tcp-server"));

    let mut clients = Vec::new();
    for name in ["first", "second"] {
        let transport = TransportBuilder::new()
            .uri(format!("tcp://{addr}"))
            .transport_id(name)
            .connect_timeout(Duration::from_secs(2))
            .build()
            .await?;
        clients.push(RpcClient::new(transport, RpcConfig::default()).await?);
    }

    let (a, b) = tokio::join!(
        clients[0].call::<_, String>("sleep", (50u64, "a")),
        clients[1].call::<_, String>("sleep", (10u64, "b")),
    );
    assert_eq!(a?, "a");
    assert_eq!(b?, "b");
    Ok(())
}

#[tokio::test]
async fn test_connect_failure_surfaces_on_request() -> Result<()> {
    // ---
    init_logging();
    let addr = {
        let (listener, addr) = listen().await?;
        drop(listener);
        addr
    };

    let transport = connect_tcp(addr, TransportConfig::new("refused"));
    let client = RpcClient::new(transport, RpcConfig::default()).await?;

    let result = client.request_async("echo", vec![]).await;
    assert!(
        matches!(
            result,
            Err(RpcError::Transport(_)) | Err(RpcError::ConnectionClosed)
        ),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_server_drop_fails_pending() -> Result<()> {
    // ---
    init_logging();
    let (listener, addr) = listen().await?;

    // a bare peer that accepts and closes once it has seen some bytes
    let peer = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let (mut stream, _) = listener.accept().await?;
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf).await?;
        Ok::<_, std::io::Error>(())
    });

    let client = RpcClient::new(
        connect_tcp(addr, TransportConfig::new("dropped")),
        RpcConfig::default(),
    )
    .await?;

    let result = client.request_async("echo", vec![]).await;
    assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    peer.await.unwrap()?;
    Ok(())
}
