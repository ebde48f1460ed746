//! Server dispatch engine: routes inbound requests and notifications to
//! registered method handlers.
//!
//! Each served connection gets its own dispatch task, which handles inbound
//! messages strictly one at a time, and its own response writer task, which
//! writes responses in the order handlers complete. Handlers never write to
//! the transport directly; they answer through a [`Responder`].

mod handler;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    // ---
    accept_tcp,
    log_debug,
    log_error,
    log_info,
    log_trace,
    log_warn,
    sync::lock_ignore_poison,
    Message,
    Result,
    RpcError,
    TransportConfig,
    TransportEvent,
    TransportPtr,
    Value,
};

use handler::{AsyncHandler, TypedHandler};

pub use handler::{MethodHandler, Responder};

/// Error text sent for a request naming an unregistered method.
pub const NOT_IMPLEMENTED: &str = "Not Implemented";

/// Registry of RPC method handlers.
///
/// Key: method name, Value: type-erased handler.
type HandlerRegistry = Arc<Mutex<HashMap<String, Arc<dyn MethodHandler>>>>;

/// RPC server: a method registration table plus per-connection dispatch.
///
/// Cheap to clone; clones share the registration table, so methods added
/// after `serve` are visible to connections already being served.
///
/// # Example
///
/// ```no_run
/// use msgpack_rpc::{RpcServer, TransportConfig, Value};
/// use tokio::net::TcpListener;
///
/// # async fn example() -> msgpack_rpc::Result<()> {
/// let server = RpcServer::new();
///
/// server.register("echo", |params: Vec<Value>| async move {
///     Ok::<_, String>(params.into_iter().next().unwrap_or(Value::Nil))
/// });
///
/// server.register_typed("add", |(a, b): (i64, i64)| async move {
///     Ok::<_, String>(a + b)
/// });
///
/// let listener = TcpListener::bind("127.0.0.1:18800").await?;
/// server.serve_tcp(listener, TransportConfig::new("math")).await.ok();
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct RpcServer {
    handlers: HandlerRegistry,
}

impl RpcServer {
    // ---

    /// Create a server with an empty registration table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw handler for `method`, replacing any previous one.
    pub fn register_handler(&self, method: impl Into<String>, handler: impl MethodHandler) {
        // ---
        let method = method.into();
        log_debug!("register handler for {method}");

        let mut handlers = lock_ignore_poison(&self.handlers);
        handlers.insert(method, Arc::new(handler));
    }

    /// Register an async handler over raw params.
    ///
    /// The future runs on its own task. `Ok(value)` is sent as the result,
    /// `Err(e)` as the error text with a nil result. For notifications the
    /// outcome is discarded.
    pub fn register<F, Fut, E>(&self, method: impl Into<String>, func: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        // ---
        self.register_handler(
            method,
            AsyncHandler {
                func,
                _phantom: PhantomData,
            },
        );
    }

    /// Register an async handler with typed params and result.
    ///
    /// The params array is deserialized into `P` (a tuple or tuple struct
    /// matches positionally); the result is serialized from `R`. A params
    /// mismatch is answered with an error response without calling `func`.
    pub fn register_typed<P, R, F, Fut, E>(&self, method: impl Into<String>, func: F)
    where
        P: DeserializeOwned + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        // ---
        self.register_handler(
            method,
            TypedHandler {
                func,
                _phantom: PhantomData,
            },
        );
    }

    /// Remove the handler for `method`. Returns `true` if one was registered.
    pub fn unregister(&self, method: &str) -> bool {
        lock_ignore_poison(&self.handlers).remove(method).is_some()
    }

    /// Whether a handler is registered for `method`.
    pub fn has_method(&self, method: &str) -> bool {
        lock_ignore_poison(&self.handlers).contains_key(method)
    }

    /// Serve one connection.
    ///
    /// Subscribes to `transport` and spawns the dispatch task; the returned
    /// handle completes when the connection closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription fails.
    pub async fn serve(&self, transport: TransportPtr) -> Result<JoinHandle<()>> {
        // ---
        let mut handle = transport.subscribe().await?;
        let transport_id = transport.transport_id().to_string();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::response_writer(transport, out_rx));

        let handlers = self.handlers.clone();

        Ok(tokio::spawn(async move {
            log_debug!("{transport_id}: server task started");

            while let Some(event) = handle.inbox.recv().await {
                match event {
                    TransportEvent::Message(msg) => {
                        Self::dispatch(&transport_id, &handlers, &out_tx, msg);
                    }
                    TransportEvent::Connected => {
                        log_debug!("{transport_id}: connected");
                    }
                    TransportEvent::Timeout => {
                        log_debug!("{transport_id}: connection idle");
                    }
                    TransportEvent::Error(err) => {
                        log_warn!("{transport_id}: connection error: {err}");
                    }
                    TransportEvent::Closed => break,
                }
            }

            log_debug!("{transport_id}: server task stopped");
        }))
    }

    /// Accept connections from `listener` and serve each one.
    ///
    /// Every accepted stream gets `config` with its peer address appended to
    /// the transport id. The task runs until accepting fails.
    pub fn serve_tcp(&self, listener: TcpListener, config: TransportConfig) -> JoinHandle<Result<()>> {
        // ---
        tokio::spawn(Self::accept_loop(self.clone(), listener, config))
    }

    async fn accept_loop(server: RpcServer, listener: TcpListener, config: TransportConfig) -> Result<()> {
        // ---
        if let Ok(addr) = listener.local_addr() {
            log_info!("{}: listening on {addr}", config.transport_id);
        }

        loop {
            let (stream, peer) = listener.accept().await.map_err(|err| {
                log_error!("{}: accept failed: {err}", config.transport_id);
                RpcError::Io(err)
            })?;

            let id = format!("{}/{peer}", config.transport_id);
            log_debug!("{id}: accepted");

            let transport = accept_tcp(stream, config.clone().with_transport_id(id.clone()));
            if let Err(err) = server.serve(transport).await {
                log_warn!("{id}: not served: {err}");
            }
        }
    }

    /// Write responses produced by handlers, in completion order.
    async fn response_writer(transport: TransportPtr, mut out: mpsc::UnboundedReceiver<Message>) {
        // ---
        while let Some(msg) = out.recv().await {
            match transport.send(msg).await {
                Ok(()) => {}
                Err(RpcError::ConnectionClosed) => break,
                Err(err) => {
                    log_warn!("{}: response not written: {err}", transport.transport_id());
                }
            }
        }
    }

    fn dispatch(
        transport_id: &str,
        handlers: &HandlerRegistry,
        out: &mpsc::UnboundedSender<Message>,
        msg: Message,
    ) {
        // ---
        match msg {
            Message::Request { id, method, params } => {
                let handler = lock_ignore_poison(handlers).get(&method).cloned();

                match handler {
                    Some(handler) => {
                        log_trace!("{transport_id}: request {id} for {method}");
                        let responder = Responder::new(id, out.clone());
                        Self::invoke(transport_id, &method, handler, params, Some(responder));
                    }
                    None => {
                        log_debug!("{transport_id}: no handler for method: {method}");
                        let _ = out.send(Message::failure(id, NOT_IMPLEMENTED));
                    }
                }
            }
            Message::Notification { method, params } => {
                let handler = lock_ignore_poison(handlers).get(&method).cloned();

                match handler {
                    Some(handler) => {
                        log_trace!("{transport_id}: notification for {method}");
                        Self::invoke(transport_id, &method, handler, params, None);
                    }
                    None => {
                        log_debug!("{transport_id}: dropping notification for unknown method: {method}");
                    }
                }
            }
            Message::Response { id, .. } => {
                log_trace!("{transport_id}: server ignores response {id}");
            }
        }
    }

    fn invoke(
        transport_id: &str,
        method: &str,
        handler: Arc<dyn MethodHandler>,
        params: Vec<Value>,
        responder: Option<Responder>,
    ) {
        // ---
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(params, responder)));

        if outcome.is_err() {
            log_error!("{transport_id}: handler for {method} panicked");
        }
    }
}
