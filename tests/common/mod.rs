#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use msgpack_rpc::{
    //
    memory_pair,
    Responder,
    Result,
    RpcClient,
    RpcConfig,
    RpcServer,
    TransportConfig,
    Value,
};

/// Server with the methods the integration tests rely on.
///
/// - `echo(x)` returns `x`
/// - `add(a, b)` returns `a + b`
/// - `sleep(ms, tag)` returns `tag` after `ms` milliseconds
/// - `hang()` is accepted and never answered
pub fn test_server() -> (RpcServer, Arc<Mutex<Vec<Responder>>>) {
    // ---
    let server = RpcServer::new();

    server.register("echo", |params: Vec<Value>| async move {
        Ok::<_, String>(params.into_iter().next().unwrap_or(Value::Nil))
    });

    server.register_typed("add", |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) });

    server.register_typed("sleep", |(ms, tag): (u64, String)| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, String>(tag)
    });

    let parked = Arc::new(Mutex::new(Vec::new()));
    let stash = parked.clone();
    server.register_handler("hang", move |_params: Vec<Value>, responder: Option<Responder>| {
        if let Some(responder) = responder {
            stash.lock().unwrap().push(responder);
        }
    });

    (server, parked)
}

/// Client and server connected over an in-memory pair.
pub async fn connected(config: RpcConfig) -> Result<(RpcClient, RpcServer, Arc<Mutex<Vec<Responder>>>)> {
    // ---
    let (client_end, server_end) = memory_pair(TransportConfig::new("it"));

    let (server, parked) = test_server();
    server.serve(server_end).await?;

    let client = RpcClient::new(client_end, config).await?;
    Ok((client, server, parked))
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
