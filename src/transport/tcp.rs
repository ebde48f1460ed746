//! TCP transport.
//!
//! Thin constructors over the stream actor: [`connect_tcp`] for the dialing
//! side and [`accept_tcp`] for streams handed out by a listener.

use std::io;

use tokio::net::TcpStream;

use crate::{
    // ---
    log_debug,
    log_warn,
    TransportConfig,
    TransportPtr,
};

use super::stream;

/// Dial `addr` (`"host:port"`) and return the transport immediately.
///
/// The connect runs in the background. Messages sent before it completes are
/// queued and written once the connection is up; if the connect fails or
/// exceeds `config.connect_timeout`, those sends fail with
/// [`RpcError::Transport`](crate::RpcError::Transport).
///
/// Must be called from within a Tokio runtime.
pub fn connect_tcp(addr: impl Into<String>, config: TransportConfig) -> TransportPtr {
    // ---
    let addr = addr.into();
    let transport_id = config.transport_id.clone();

    stream::spawn(
        config,
        Box::pin(async move {
            log_debug!("{transport_id}: connecting to {addr}");
            let stream = TcpStream::connect(addr.as_str()).await?;
            configure(&transport_id, &stream);
            Ok::<_, io::Error>(stream)
        }),
    )
}

/// Wrap a stream returned by `TcpListener::accept`.
///
/// Must be called from within a Tokio runtime.
pub fn accept_tcp(stream: TcpStream, config: TransportConfig) -> TransportPtr {
    // ---
    configure(&config.transport_id, &stream);
    stream::transport_from_stream(stream, config)
}

fn configure(transport_id: &str, stream: &TcpStream) {
    // small request frames should not wait for Nagle
    if let Err(err) = stream.set_nodelay(true) {
        log_warn!("{transport_id}: could not set TCP_NODELAY: {err}");
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{Message, RpcError, TransportEvent};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_loopback_round_trip() {
        // ---
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = connect_tcp(addr.to_string(), TransportConfig::new("dialer"));
        let send = tokio::spawn({
            let dialer = dialer.clone();
            async move { dialer.send(Message::build_notification("ping", vec![])).await }
        });

        let (stream, _) = listener.accept().await.unwrap();
        let accepted = accept_tcp(stream, TransportConfig::new("accepted"));
        let mut events = accepted.subscribe().await.unwrap();

        send.await.unwrap().unwrap();

        assert_eq!(events.inbox.recv().await, Some(TransportEvent::Connected));
        assert_eq!(
            events.inbox.recv().await,
            Some(TransportEvent::Message(Message::build_notification(
                "ping",
                vec![]
            )))
        );
    }

    #[tokio::test]
    async fn test_refused_connect_fails_send() {
        // ---
        // bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let config = TransportConfig::new("refused").with_connect_timeout(Some(Duration::from_secs(2)));
        let transport = connect_tcp(addr.to_string(), config);

        let result = transport
            .send(Message::build_notification("nobody", vec![]))
            .await;
        assert!(matches!(
            result,
            Err(RpcError::Transport(_)) | Err(RpcError::ConnectionClosed)
        ));
    }
}
