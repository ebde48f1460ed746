// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the connection interface used by the client and
//! server engines to exchange messages. It intentionally avoids any reference
//! to concrete sockets or framing.
//!
//! A transport is one bidirectional connection. It is responsible only for
//! encoding and writing messages, and for delivering decoded messages and
//! lifecycle events to its subscribers. Correlation, dispatch and timeouts are
//! handled by the engines.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{Message, Result};

/// Something observed on a connection, delivered to every subscriber in
/// arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The underlying stream is established and writable.
    Connected,

    /// One fully decoded inbound message.
    Message(Message),

    /// The connection is gone. No further events follow.
    Closed,

    /// The connection failed (connect error, socket error or protocol
    /// violation). Always followed by [`Closed`](TransportEvent::Closed).
    Error(String),

    /// No inbound traffic for the configured idle period. Informational.
    Timeout,
}

/// Handle returned from a successful subscription.
///
/// The subscription stays active until the handle is dropped or the
/// connection closes, at which point `inbox.recv()` yields `None`.
///
/// # Example
///
/// ```no_run
/// # use msgpack_rpc::{memory_pair, TransportConfig, TransportEvent};
/// # async fn example() -> msgpack_rpc::Result<()> {
/// let (left, _right) = memory_pair(TransportConfig::default());
/// let mut handle = left.subscribe().await?;
///
/// while let Some(event) = handle.inbox.recv().await {
///     if let TransportEvent::Message(msg) = event {
///         println!("received: {msg:?}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for events on this connection.
    pub inbox: mpsc::Receiver<TransportEvent>,
}

/// Transport abstraction.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, every message received after
///   that point is delivered to the handle, in arrival order.
/// - `send()` resolves only after the frame has been written, or with the
///   error that prevented it.
/// - Sends issued before the connection is established are queued, not
///   rejected.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier of this connection, for logging.
    fn transport_id(&self) -> &str;

    /// Encode `msg` and write it to the connection.
    async fn send(&self, msg: Message) -> Result<()>;

    /// Register for decoded messages and lifecycle events.
    async fn subscribe(&self) -> Result<SubscriptionHandle>;

    /// Close the connection and release its resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connection
/// - A client and a server may serve the same connection concurrently
pub type TransportPtr = Arc<dyn Transport>;
