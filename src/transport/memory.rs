//! In-memory transport implementation.
//!
//! This module provides a pure in-process connection pair. It is intended
//! primarily for testing, local execution, and as a reference for transport
//! semantics.
//!
//! ## Reference Semantics
//!
//! Both ends run the same connection actor and MessagePack codec as a socket
//! transport; only the byte pipe differs. Behavior validated over a memory
//! pair therefore carries over to TCP, except for connect latency and
//! network failure modes.
//!
//! ## Non-Goals
//!
//! This transport does not emulate packet loss, partial writes or latency.
//! It exists to provide a deterministic baseline against which the engines
//! can be validated.

use crate::{
    // ---
    log_debug,
    transport_from_stream,
    TransportConfig,
    TransportPtr,
};

/// Bytes buffered in each direction before a writer waits for the reader.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Create two connected in-memory transports.
///
/// Whatever one end sends, the other end's subscribers receive. The ends are
/// named `{transport_id}/a` and `{transport_id}/b` in logs.
///
/// Must be called from within a Tokio runtime.
///
/// # Example
///
/// ```no_run
/// # use msgpack_rpc::{memory_pair, RpcClient, RpcConfig, RpcServer, TransportConfig};
/// # async fn example() -> msgpack_rpc::Result<()> {
/// let (client_end, server_end) = memory_pair(TransportConfig::new("local"));
///
/// let server = RpcServer::new();
/// server.serve(server_end).await?;
///
/// let client = RpcClient::new(client_end, RpcConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub fn memory_pair(config: TransportConfig) -> (TransportPtr, TransportPtr) {
    // ---
    log_debug!("{}: create memory transport pair", config.transport_id);

    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);

    let a_config = config.clone().with_transport_id(format!("{}/a", config.transport_id));
    let b_config = config.clone().with_transport_id(format!("{}/b", config.transport_id));

    (
        transport_from_stream(a, a_config),
        transport_from_stream(b, b_config),
    )
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{Message, TransportEvent, Value};
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_subscribe_then_send_delivers() {
        // ---
        // Arrange
        // ---
        let (left, right) = memory_pair(TransportConfig::new("mstpd"));
        let mut sub = right.subscribe().await.expect("subscribe failed");

        let msg = Message::build_notification("hello", vec![Value::from("world")]);

        // ---
        // Act
        // ---
        left.send(msg.clone()).await.expect("send failed");

        // ---
        // Assert
        // ---
        let mut received = Vec::new();
        while received.len() < 2 {
            let event = timeout(Duration::from_millis(500), sub.inbox.recv())
                .await
                .expect("timed out waiting for message")
                .expect("subscription channel closed unexpectedly");
            received.push(event);
        }

        assert_eq!(
            received,
            vec![TransportEvent::Connected, TransportEvent::Message(msg)]
        );
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_message() {
        // ---
        let (left, right) = memory_pair(TransportConfig::new("fanout"));
        let mut first = right.subscribe().await.unwrap();
        let mut second = right.subscribe().await.unwrap();

        left.send(Message::success(1, Value::Nil)).await.unwrap();

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.inbox.recv().await, Some(TransportEvent::Connected));
            assert_eq!(
                sub.inbox.recv().await,
                Some(TransportEvent::Message(Message::success(1, Value::Nil)))
            );
        }
    }

    #[tokio::test]
    async fn test_close_is_observed_by_peer() {
        // ---
        let (left, right) = memory_pair(TransportConfig::new("closing"));
        let mut sub = right.subscribe().await.unwrap();
        assert_eq!(sub.inbox.recv().await, Some(TransportEvent::Connected));

        left.close().await.unwrap();
        assert_eq!(sub.inbox.recv().await, Some(TransportEvent::Closed));

        // closing twice is harmless
        left.close().await.unwrap();
    }
}
