//! Client engine: issues requests and notifications and correlates responses.
//!
//! One [`RpcClient`] multiplexes any number of in-flight calls over a single
//! persistent connection. Every request gets a fresh id from the client's
//! [`IdGenerator`]; its waiter is registered in the pending table *before*
//! the request is written, so a fast response can never race the
//! registration.

mod pending;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_trace,
    log_warn,
    sync::lock_ignore_poison,
    IdGenerator,
    Message,
    Result,
    RpcConfig,
    RpcError,
    SubscriptionHandle,
    TransportEvent,
    TransportPtr,
    Value,
};

use pending::{PendingRequests, ReplyCallback};

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Id of the request this answers.
    pub id: u32,
    /// Result value returned by the remote method.
    pub result: Value,
}

/// Pending table plus the connection state it depends on.
struct State {
    // ---
    pending: PendingRequests,
    closed: bool,
}

type SharedState = Arc<Mutex<State>>;

/// RPC client over a single transport.
///
/// Cheap to clone; clones share the connection, the id generator and the
/// pending table.
///
/// # Example
///
/// ```no_run
/// use msgpack_rpc::{memory_pair, RpcClient, RpcConfig, TransportConfig, Value};
///
/// # async fn example() -> msgpack_rpc::Result<()> {
/// let (client_end, _server_end) = memory_pair(TransportConfig::new("local"));
/// let client = RpcClient::new(client_end, RpcConfig::default()).await?;
///
/// let reply = client.request_async("echo", vec![Value::from("ok")]).await?;
/// assert_eq!(reply.result, Value::from("ok"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: TransportPtr,
    ids: Arc<IdGenerator>,
    config: RpcConfig,
    state: SharedState,
    rx_task: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.rx_task.abort();
    }
}

/// Fail every pending call with `ConnectionClosed`.
fn fail_all(state: &Mutex<State>, mark_closed: bool) {
    // ---
    let waiters = {
        let mut state = lock_ignore_poison(state);
        if mark_closed {
            state.closed = true;
        }
        state.pending.drain()
    };

    if !waiters.is_empty() {
        log_debug!("failing {} pending request(s)", waiters.len());
    }
    for waiter in waiters {
        waiter.fire(Err(RpcError::ConnectionClosed));
    }
}

/// Removes a future-form entry if the caller stops waiting early.
struct EntryGuard<'a> {
    state: &'a Mutex<State>,
    id: u32,
    token: u64,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        lock_ignore_poison(self.state)
            .pending
            .remove(self.id, self.token);
    }
}

impl RpcClient {
    /// Create a client owning a fresh [`IdGenerator`].
    ///
    /// Subscribes to `transport` and spawns the receive loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription fails.
    pub async fn new(transport: TransportPtr, config: RpcConfig) -> Result<Self> {
        // ---
        Self::with_id_generator(transport, Arc::new(IdGenerator::new()), config).await
    }

    /// Create a client drawing request ids from a shared generator.
    ///
    /// Sharing a generator across clients keeps ids unique across all of them.
    pub async fn with_id_generator(
        transport: TransportPtr,
        ids: Arc<IdGenerator>,
        config: RpcConfig,
    ) -> Result<Self> {
        // ---
        let handle = transport.subscribe().await?;

        let state: SharedState = Arc::new(Mutex::new(State {
            pending: PendingRequests::new(),
            closed: false,
        }));

        let rx_task = Self::start_client_task(
            transport.transport_id().to_string(),
            handle,
            state.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                ids,
                config,
                state,
                rx_task,
            }),
        })
    }

    // Start background task to receive responses
    fn start_client_task(
        transport_id: String,
        mut handle: SubscriptionHandle,
        state: SharedState,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            log_debug!("{transport_id}: client task started");

            while let Some(event) = handle.inbox.recv().await {
                match event {
                    TransportEvent::Message(Message::Response { id, error, result }) => {
                        let waiter = lock_ignore_poison(&state).pending.take(id);

                        let Some(waiter) = waiter else {
                            log_debug!("{transport_id}: no pending request for id {id}");
                            continue;
                        };

                        let outcome = match error {
                            Some(message) => Err(RpcError::Remote { id, message }),
                            None => Ok(Reply { id, result }),
                        };
                        waiter.fire(outcome);
                    }
                    TransportEvent::Message(other) => {
                        log_trace!("{transport_id}: client ignores {}", other.kind());
                    }
                    TransportEvent::Connected => {
                        log_debug!("{transport_id}: connected");
                    }
                    TransportEvent::Timeout => {
                        log_debug!("{transport_id}: connection idle");
                    }
                    TransportEvent::Error(err) => {
                        log_warn!("{transport_id}: connection error: {err}");
                        fail_all(&state, false);
                    }
                    TransportEvent::Closed => break,
                }
            }

            fail_all(&state, true);
            log_debug!("{transport_id}: client task stopped");
        })
    }

    /// Send a request and wait for its response.
    ///
    /// Uses the configured `request_timeout`, if any.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Remote`] if the response carries an error
    /// - [`RpcError::Timeout`] if a configured timeout expires first
    /// - [`RpcError::ConnectionClosed`] if the connection goes away
    /// - the write error if the request could not be sent
    pub async fn request_async(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Reply> {
        // ---
        self.request_inner(method.into(), params, self.inner.config.request_timeout)
            .await
    }

    /// Send a request with a timeout for this call only.
    pub async fn request_async_with_timeout(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<Reply> {
        // ---
        self.request_inner(method.into(), params, Some(timeout)).await
    }

    async fn request_inner(
        &self,
        method: String,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        // ---
        let (msg, id) = Message::build_request(&self.inner.ids, method, params);

        let (token, rx): (u64, oneshot::Receiver<Result<Reply>>) = {
            let mut state = lock_ignore_poison(&self.inner.state);
            if state.closed {
                return Err(RpcError::ConnectionClosed);
            }
            state.pending.register(id)
        };
        let _guard = EntryGuard {
            state: &self.inner.state,
            id,
            token,
        };

        self.inner.transport.send(msg).await?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log_debug!("request {id} timed out after {limit:?}");
                    return Err(RpcError::Timeout);
                }
            },
            None => rx.await,
        };

        outcome.map_err(|_| RpcError::ConnectionClosed)?
    }

    /// Send a request and complete it through `callback`.
    ///
    /// Returns the request id once the request has been written. The callback
    /// runs exactly once, on the client's receive task, with the response or
    /// with the error that ended the call. If the write fails the error is
    /// returned here and the callback is dropped without running.
    pub async fn request_with_callback<F>(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        callback: F,
    ) -> Result<u32>
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        // ---
        let (msg, id) = Message::build_request(&self.inner.ids, method, params);

        let token = {
            let mut state = lock_ignore_poison(&self.inner.state);
            if state.closed {
                return Err(RpcError::ConnectionClosed);
            }
            state
                .pending
                .register_callback(id, Box::new(callback) as ReplyCallback)
        };

        if let Err(err) = self.inner.transport.send(msg).await {
            lock_ignore_poison(&self.inner.state)
                .pending
                .remove(id, token);
            return Err(err);
        }

        if let Some(limit) = self.inner.config.request_timeout {
            let weak = Arc::downgrade(&self.inner.state);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let waiter = lock_ignore_poison(&state).pending.take_expired(id, token);
                if let Some(waiter) = waiter {
                    log_debug!("request {id} timed out after {limit:?}");
                    waiter.fire(Err(RpcError::Timeout));
                }
            });

            // the call may already be finished; then the timer has no work
            let orphan = lock_ignore_poison(&self.inner.state).pending.attach_timer(
                id,
                token,
                timer.abort_handle(),
            );
            if let Some(orphan) = orphan {
                orphan.abort();
            }
        }

        Ok(id)
    }

    /// Typed request: serialize `params`, deserialize the result.
    ///
    /// `params` must serialize to a sequence (a tuple, a `Vec`, a tuple
    /// struct) or to unit for no parameters.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Serialization`] if either conversion fails, plus
    /// everything [`request_async`](Self::request_async) can return.
    pub async fn call<P, R>(&self, method: impl Into<String>, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        // ---
        let params = match rmpv::ext::to_value(params) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Nil) => Vec::new(),
            Ok(other) => {
                return Err(RpcError::Serialization(format!(
                    "params must serialize to an array, got {other}"
                )))
            }
            Err(err) => return Err(RpcError::Serialization(err.to_string())),
        };

        let reply = self.request_async(method, params).await?;
        rmpv::ext::from_value(reply.result).map_err(|err| RpcError::Serialization(err.to_string()))
    }

    /// Send a notification. Resolves once it has been written.
    pub async fn notify(&self, method: impl Into<String>, params: Vec<Value>) -> Result<()> {
        // ---
        self.inner
            .transport
            .send(Message::build_notification(method, params))
            .await
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.inner.state).pending.len()
    }

    /// Close the connection and fail every pending request.
    pub async fn close(&self) -> Result<()> {
        // ---
        fail_all(&self.inner.state, true);
        self.inner.transport.close().await
    }
}
