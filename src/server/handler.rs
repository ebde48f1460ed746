use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    // ---
    log_debug,
    log_warn,
    Message,
    Result,
    RpcError,
    Value,
};

/// A method implementation registered on an [`RpcServer`](crate::RpcServer).
///
/// `handle` is called on the connection's dispatch task, one inbound message
/// at a time, so it should return quickly and move long work onto a spawned
/// task together with the responder.
///
/// `responder` is `Some` for requests and `None` for notifications. The
/// handler may answer synchronously, later from another task, or not at all.
///
/// Closures with the matching signature implement this trait:
///
/// ```no_run
/// # use msgpack_rpc::{RpcServer, Responder, Value};
/// let server = RpcServer::new();
/// server.register_handler("echo", |params: Vec<Value>, responder: Option<Responder>| {
///     if let Some(responder) = responder {
///         let _ = responder.ok(params.into_iter().next().unwrap_or(Value::Nil));
///     }
/// });
/// ```
pub trait MethodHandler: Send + Sync + 'static {
    /// Handle one request or notification.
    fn handle(&self, params: Vec<Value>, responder: Option<Responder>);
}

impl<F> MethodHandler for F
where
    F: Fn(Vec<Value>, Option<Responder>) + Send + Sync + 'static,
{
    fn handle(&self, params: Vec<Value>, responder: Option<Responder>) {
        self(params, responder)
    }
}

/// One-shot completion channel for a single request.
///
/// Answering consumes the responder, so a request is answered at most once.
/// A responder dropped without answering sends nothing and the caller keeps
/// waiting (or times out on its side).
pub struct Responder {
    // ---
    id: u32,
    out: mpsc::UnboundedSender<Message>,
    answered: bool,
}

impl Responder {
    // ---

    pub(super) fn new(id: u32, out: mpsc::UnboundedSender<Message>) -> Self {
        // ---
        Self {
            id,
            out,
            answered: false,
        }
    }

    /// Id of the request being answered.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Send a response with an explicit error slot.
    ///
    /// `error: None` means success. The error is sent as its display text.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectionClosed`] if the connection is gone.
    pub fn respond<E>(mut self, error: Option<E>, result: Value) -> Result<()>
    where
        E: fmt::Display,
    {
        // ---
        self.answered = true;
        self.out
            .send(Message::build_response(self.id, error, result))
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Answer successfully with `result`.
    pub fn ok(self, result: Value) -> Result<()> {
        self.respond(None::<&str>, result)
    }

    /// Answer with an error; the result slot is nil.
    pub fn err(self, error: impl fmt::Display) -> Result<()> {
        self.respond(Some(error), Value::Nil)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.answered {
            log_warn!("request {} dropped without a response", self.id);
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").field("id", &self.id).finish()
    }
}

/// Send the outcome of an async handler, or log it for a notification.
fn complete<E>(responder: Option<Responder>, outcome: std::result::Result<Value, E>)
where
    E: fmt::Display,
{
    // ---
    let sent = match (responder, outcome) {
        (Some(responder), Ok(value)) => responder.ok(value),
        (Some(responder), Err(err)) => responder.err(err),
        (None, Ok(_)) => Ok(()),
        (None, Err(err)) => {
            log_debug!("notification handler failed: {err}");
            Ok(())
        }
    };

    if let Err(err) = sent {
        log_debug!("response not sent: {err}");
    }
}

// Async handler over raw params
pub(super) struct AsyncHandler<F, Fut, E>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, E>> + Send,
    E: fmt::Display,
{
    pub(super) func: F,
    pub(super) _phantom: PhantomData<fn() -> (Fut, E)>,
}

impl<F, Fut, E> MethodHandler for AsyncHandler<F, Fut, E>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn handle(&self, params: Vec<Value>, responder: Option<Responder>) {
        // ---
        let fut = (self.func)(params);

        tokio::spawn(async move {
            let outcome = fut.await;
            complete(responder, outcome);
        });
    }
}

// Async handler with serde conversion of params and result
pub(super) struct TypedHandler<F, Fut, P, R, E>
where
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<R, E>> + Send,
    P: DeserializeOwned,
    R: Serialize,
    E: fmt::Display,
{
    pub(super) func: F,
    pub(super) _phantom: PhantomData<fn(P) -> (Fut, R, E)>,
}

impl<F, Fut, P, R, E> MethodHandler for TypedHandler<F, Fut, P, R, E>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    P: DeserializeOwned + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn handle(&self, params: Vec<Value>, responder: Option<Responder>) {
        // ---
        let params: P = match rmpv::ext::from_value(Value::Array(params)) {
            Ok(p) => p,
            Err(err) => {
                let err = RpcError::Serialization(format!("invalid params: {err}"));
                complete(responder, Err::<Value, _>(err));
                return;
            }
        };

        let fut = (self.func)(params);

        tokio::spawn(async move {
            let outcome = match fut.await {
                Ok(result) => rmpv::ext::to_value(result)
                    .map_err(|err| RpcError::Serialization(err.to_string()).to_string()),
                Err(err) => Err(err.to_string()),
            };
            complete(responder, outcome);
        });
    }
}
