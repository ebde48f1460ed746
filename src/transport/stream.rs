//! Byte-stream transport built on a connection actor.
//!
//! ## Concurrency model
//!
//! - A background **actor task** owns the write half of the stream. Callers
//!   talk to it through a command channel (send, subscribe, close), so writes
//!   go out in command order.
//! - Once connected, the actor spawns a **reader task** that owns the read
//!   half and the list of subscribers. Inbound frames are decoded, parsed
//!   into [`Message`]s and fanned out to every subscriber in arrival order.
//! - Neither half waits on the other, so a long write never stops inbound
//!   frames from being drained.
//!
//! ## Connection behavior
//!
//! Establishment is **deferred**: the transport is usable as soon as it is
//! created. Sends issued while the stream is still connecting are queued in
//! order and flushed once it is up, or failed if the connect errors or times
//! out.
//!
//! The reader is only polled while at least one subscriber exists, so frames
//! that arrive before the first `subscribe()` stay buffered in the socket
//! instead of being dropped.
//!
//! ## Failure behavior
//!
//! A frame that cannot be decoded or parsed is a protocol violation. The
//! connection is torn down and subscribers observe `Error` then `Closed`.
//! With `strict_protocol` set the reader task panics instead: subscriber
//! inboxes end without a `Closed` event and the actor stops.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_trace,
    log_warn,
    Message,
    MsgPackCodec,
    Result,
    RpcError,
    SubscriptionHandle,
    Transport,
    TransportConfig,
    TransportEvent,
    TransportPtr,
};

/// Future resolving to an established stream.
pub(crate) type ConnectFuture<S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send>>;

type Reader<S> = FramedRead<ReadHalf<S>, MsgPackCodec>;
type Writer<S> = FramedWrite<WriteHalf<S>, MsgPackCodec>;
type QueuedSend = (Message, oneshot::Sender<Result<()>>);
type Subscribers = Vec<mpsc::Sender<TransportEvent>>;

// Idle timer placeholder period when no idle timeout is configured; the
// branch is disabled in that case so the value never fires.
const IDLE_DISABLED: Duration = Duration::from_secs(86_400);

//
// Actor commands
//

enum Cmd {
    //
    Send {
        msg: Message,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        inbox: mpsc::Sender<TransportEvent>,
        resp: oneshot::Sender<()>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    /// Leave the command loop; the reader reports `error` before `Closed`.
    Stop { error: Option<String> },
    /// Leave after a close request, answered once the reader has stopped.
    Closed {
        resp: oneshot::Sender<Result<()>>,
        result: Result<()>,
    },
}

/// Instructions from the actor to its reader task.
enum ReaderCtl {
    //
    Subscribe {
        inbox: mpsc::Sender<TransportEvent>,
        resp: oneshot::Sender<()>,
    },
    Shutdown { error: Option<String> },
}

/// Transport over any `AsyncRead + AsyncWrite` stream.
struct StreamTransport {
    // ---
    transport_id: String,
    inbox_capacity: usize,
    cmd_tx: mpsc::Sender<Cmd>,
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    /// Queue `msg` on the actor and wait until it has been written.
    async fn send(&self, msg: Message) -> Result<()> {
        // ---
        let (resp, rx) = oneshot::channel();

        self.cmd_tx
            .send(Cmd::Send { msg, resp })
            .await
            .map_err(|_| RpcError::ConnectionClosed)?;

        rx.await.map_err(|_| RpcError::ConnectionClosed)?
    }

    async fn subscribe(&self) -> Result<SubscriptionHandle> {
        // ---
        let (inbox_tx, inbox) = mpsc::channel(self.inbox_capacity);
        let (resp, rx) = oneshot::channel();

        self.cmd_tx
            .send(Cmd::Subscribe {
                inbox: inbox_tx,
                resp,
            })
            .await
            .map_err(|_| RpcError::ConnectionClosed)?;

        rx.await.map_err(|_| RpcError::ConnectionClosed)?;
        Ok(SubscriptionHandle { inbox })
    }

    /// Close the connection. Closing an already closed transport is a no-op.
    async fn close(&self) -> Result<()> {
        // ---
        let (resp, rx) = oneshot::channel();

        if self.cmd_tx.send(Cmd::Close { resp }).await.is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}

struct ConnectionActor {
    // ---
    transport_id: String, // for logging only
    config: TransportConfig,
    cmd_rx: mpsc::Receiver<Cmd>,
    // handed to the reader task once connected
    subscribers: Subscribers,
}

impl ConnectionActor {
    // ---

    async fn run<S>(mut self, connect: ConnectFuture<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        // ---
        let Some((stream, queued)) = self.establish(connect).await else {
            log_debug!("{}: actor stopped before connecting", self.transport_id);
            return;
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let mut writer: Writer<S> =
            FramedWrite::new(write_half, MsgPackCodec::new(self.config.codec.clone()));

        // the reader must be running before the first write: a peer that
        // answers while our write is still in progress needs to be drained
        let (ctl, ctl_rx) = mpsc::unbounded_channel();
        let reader = FrameReader {
            transport_id: self.transport_id.clone(),
            strict_protocol: self.config.strict_protocol,
            idle_timeout: self.config.idle_timeout,
            frames: FramedRead::new(read_half, MsgPackCodec::new(self.config.codec.clone())),
            subscribers: std::mem::take(&mut self.subscribers),
            ctl_rx,
        };
        let mut reading = tokio::spawn(reader.run());

        let mut step = ActorStep::Continue;
        for (msg, resp) in queued {
            step = self.send_frame(&mut writer, msg, resp).await;
            if !matches!(step, ActorStep::Continue) {
                break;
            }
        }

        while matches!(step, ActorStep::Continue) {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    step = match cmd {
                        Some(cmd) => self.handle_cmd(cmd, &mut writer, &ctl).await,
                        None => {
                            // every transport handle is gone
                            let _ = writer.close().await;
                            ActorStep::Stop { error: None }
                        }
                    };
                }

                joined = &mut reading => {
                    // the read side ended on its own (EOF, read error or
                    // protocol violation); subscribers were already told
                    if let Err(err) = joined {
                        log_error!("{}: reader task failed: {err}", self.transport_id);
                    }
                    let _ = writer.close().await;
                    log_debug!("{}: connection actor stopped", self.transport_id);
                    return;
                }
            }
        }

        let (error, reply) = match step {
            ActorStep::Stop { error } => (error, None),
            ActorStep::Closed { resp, result } => (None, Some((resp, result))),
            ActorStep::Continue => (None, None),
        };

        let _ = ctl.send(ReaderCtl::Shutdown { error });
        if let Err(err) = reading.await {
            log_error!("{}: reader task failed: {err}", self.transport_id);
        }
        if let Some((resp, result)) = reply {
            let _ = resp.send(result);
        }

        log_debug!("{}: connection actor stopped", self.transport_id);
    }

    /// Wait for the stream while queueing sends and accepting subscribers.
    async fn establish<S>(&mut self, connect: ConnectFuture<S>) -> Option<(S, Vec<QueuedSend>)>
    where
        S: Send + 'static,
    {
        // ---
        let deadline = self.config.connect_timeout;
        let connect = async move {
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, connect).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timed out",
                    )),
                },
                None => connect.await,
            }
        };
        tokio::pin!(connect);

        let mut queued: VecDeque<QueuedSend> = VecDeque::new();

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(stream) => {
                            log_info!("{}: connected", self.transport_id);
                            broadcast(&mut self.subscribers, TransportEvent::Connected).await;
                            Some((stream, queued.into()))
                        }
                        Err(err) => {
                            log_error!("{}: connect failed: {err}", self.transport_id);
                            for (_, resp) in queued {
                                let _ = resp.send(Err(RpcError::Transport(format!(
                                    "connect failed: {err}"
                                ))));
                            }
                            broadcast(&mut self.subscribers, TransportEvent::Error(err.to_string())).await;
                            broadcast(&mut self.subscribers, TransportEvent::Closed).await;
                            None
                        }
                    };
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Cmd::Send { msg, resp }) => {
                            log_trace!("{}: queued {msg:?} until connected", self.transport_id);
                            queued.push_back((msg, resp));
                        }
                        Some(Cmd::Subscribe { inbox, resp }) => {
                            self.subscribers.push(inbox);
                            let _ = resp.send(());
                        }
                        Some(Cmd::Close { resp }) => {
                            for (_, pending) in queued {
                                let _ = pending.send(Err(RpcError::ConnectionClosed));
                            }
                            broadcast(&mut self.subscribers, TransportEvent::Closed).await;
                            let _ = resp.send(Ok(()));
                            return None;
                        }
                        None => return None,
                    }
                }
            }
        }
    }

    /// Dispatches an actor command to the correct handler on the actor
    async fn handle_cmd<S>(
        &mut self,
        cmd: Cmd,
        writer: &mut Writer<S>,
        ctl: &mpsc::UnboundedSender<ReaderCtl>,
    ) -> ActorStep
    where
        S: AsyncWrite,
    {
        // ---
        match cmd {
            Cmd::Send { msg, resp } => self.send_frame(writer, msg, resp).await,
            Cmd::Subscribe { inbox, resp } => {
                // if the reader is gone `resp` is dropped and subscribe fails
                let _ = ctl.send(ReaderCtl::Subscribe { inbox, resp });
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                log_debug!("{}: closing", self.transport_id);
                let result = writer.close().await;
                ActorStep::Closed { resp, result }
            }
        }
    }

    /// Write one frame and answer the sender.
    async fn send_frame<S>(
        &self,
        writer: &mut Writer<S>,
        msg: Message,
        resp: oneshot::Sender<Result<()>>,
    ) -> ActorStep
    where
        S: AsyncWrite,
    {
        // ---
        let result = self.write(writer, msg).await;
        let fatal = matches!(result, Err(ref e) if e.is_connection_fatal());
        let _ = resp.send(result);

        if fatal {
            return ActorStep::Stop {
                error: Some("write failed".to_string()),
            };
        }
        ActorStep::Continue
    }

    /// Write one frame. A socket failure comes back as `RpcError::Transport`
    /// and leaves the stream unusable; an encode failure leaves it intact.
    async fn write<S>(&self, writer: &mut Writer<S>, msg: Message) -> Result<()>
    where
        S: AsyncWrite,
    {
        // ---
        log_trace!("{}: sending {msg:?}", self.transport_id);

        writer.send(msg).await.map_err(|err| match err {
            RpcError::Io(io) => {
                log_error!("{}: write failed: {io}", self.transport_id);
                RpcError::Transport(io.to_string())
            }
            other => {
                log_warn!("{}: frame not sent: {other}", self.transport_id);
                other
            }
        })
    }
}

/// Read side of a connection: decodes frames and fans them out.
struct FrameReader<S> {
    // ---
    transport_id: String,
    strict_protocol: bool,
    idle_timeout: Option<Duration>,
    frames: Reader<S>,
    subscribers: Subscribers,
    ctl_rx: mpsc::UnboundedReceiver<ReaderCtl>,
}

impl<S> FrameReader<S>
where
    S: AsyncRead,
{
    // ---

    async fn run(mut self) {
        // ---
        let idle = self.idle_timeout;
        let idle_timer = tokio::time::sleep(idle.unwrap_or(IDLE_DISABLED));
        tokio::pin!(idle_timer);

        loop {
            let reading = !self.subscribers.is_empty();

            tokio::select! {
                ctl = self.ctl_rx.recv() => {
                    match ctl {
                        Some(ReaderCtl::Subscribe { inbox, resp }) => {
                            // late subscribers still see Connected first; the
                            // inbox is fresh so there is room for it
                            if inbox.try_send(TransportEvent::Connected).is_ok() {
                                self.subscribers.push(inbox);
                            }
                            let _ = resp.send(());
                        }
                        Some(ReaderCtl::Shutdown { error }) => {
                            if let Some(reason) = error {
                                broadcast(&mut self.subscribers, TransportEvent::Error(reason)).await;
                            }
                            broadcast(&mut self.subscribers, TransportEvent::Closed).await;
                            break;
                        }
                        None => {
                            broadcast(&mut self.subscribers, TransportEvent::Closed).await;
                            break;
                        }
                    }
                }

                frame = self.frames.next(), if reading => {
                    if let Some(period) = idle {
                        idle_timer.as_mut().reset(Instant::now() + period);
                    }

                    match frame {
                        Some(Ok(value)) => match Message::parse(value) {
                            Ok(msg) => {
                                log_trace!("{}: received {msg:?}", self.transport_id);
                                broadcast(&mut self.subscribers, TransportEvent::Message(msg)).await;
                            }
                            Err(err) => {
                                self.protocol_violation(err).await;
                                break;
                            }
                        },
                        Some(Err(RpcError::Io(err))) => {
                            log_error!("{}: read failed: {err}", self.transport_id);
                            broadcast(&mut self.subscribers, TransportEvent::Error(err.to_string())).await;
                            broadcast(&mut self.subscribers, TransportEvent::Closed).await;
                            break;
                        }
                        Some(Err(err)) => {
                            self.protocol_violation(err).await;
                            break;
                        }
                        None => {
                            log_debug!("{}: peer closed the connection", self.transport_id);
                            broadcast(&mut self.subscribers, TransportEvent::Closed).await;
                            break;
                        }
                    }
                }

                () = &mut idle_timer, if idle.is_some() => {
                    log_debug!("{}: idle timeout", self.transport_id);
                    broadcast(&mut self.subscribers, TransportEvent::Timeout).await;
                    idle_timer
                        .as_mut()
                        .reset(Instant::now() + idle.unwrap_or(IDLE_DISABLED));
                }
            }
        }

        log_debug!("{}: reader stopped", self.transport_id);
    }

    async fn protocol_violation(&mut self, err: RpcError) {
        // ---
        if self.strict_protocol {
            panic!("{}: {err}", self.transport_id);
        }

        log_error!("{}: {err}; tearing down connection", self.transport_id);
        broadcast(&mut self.subscribers, TransportEvent::Error(err.to_string())).await;
        broadcast(&mut self.subscribers, TransportEvent::Closed).await;
    }
}

/// Deliver `event` to every live subscriber, dropping closed ones.
async fn broadcast(subscribers: &mut Subscribers, event: TransportEvent) {
    // ---
    let mut alive = Vec::with_capacity(subscribers.len());

    for inbox in subscribers.drain(..) {
        if inbox.send(event.clone()).await.is_ok() {
            alive.push(inbox);
        }
    }
    *subscribers = alive;
}

/// Spawn the connection actor for `connect` and return its transport handle.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn<S>(config: TransportConfig, connect: ConnectFuture<S>) -> TransportPtr
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    // ---
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
    let transport_id = config.transport_id.clone();
    let inbox_capacity = config.inbox_capacity;

    let actor = ConnectionActor {
        transport_id: transport_id.clone(),
        config,
        cmd_rx,
        subscribers: Vec::new(),
    };
    tokio::spawn(actor.run(connect));

    Arc::new(StreamTransport {
        transport_id,
        inbox_capacity,
        cmd_tx,
    })
}

/// Wrap an already established stream (a Unix socket, a TLS stream, a pipe)
/// in a transport.
///
/// Must be called from within a Tokio runtime.
pub fn transport_from_stream<S>(stream: S, config: TransportConfig) -> TransportPtr
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    spawn(config, Box::pin(async move { Ok::<S, io::Error>(stream) }))
}
