//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing a connecting transport from
//! a URI, with optional tuning applied on top of [`TransportConfig`] defaults.

use std::time::Duration;

use crate::{
    // ---
    connect_tcp,
    CodecOptions,
    Result,
    RpcError,
    TransportConfig,
    TransportPtr,
};

/// Builder for creating transport instances.
///
/// Only `uri` is required. Everything else falls back to the
/// [`TransportConfig`] defaults.
///
/// # Examples
///
/// ```no_run
/// use msgpack_rpc::TransportBuilder;
/// use std::time::Duration;
///
/// # async fn example() -> msgpack_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("tcp://127.0.0.1:18800")
///     .transport_id("math-client")
///     .connect_timeout(Duration::from_secs(3))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TransportBuilder {
    uri: Option<String>,
    transport_id: Option<String>,
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    codec: Option<CodecOptions>,
    strict_protocol: bool,
    inbox_capacity: Option<usize>,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self {
            uri: None,
            transport_id: None,
            connect_timeout: None,
            idle_timeout: None,
            codec: None,
            strict_protocol: false,
            inbox_capacity: None,
        }
    }

    /// Set the transport URI (required).
    ///
    /// Examples:
    /// - `"tcp://localhost:18800"`
    /// - `"tcp://[::1]:18800"`
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Name used to prefix log lines for this connection.
    ///
    /// Defaults to the address part of the URI.
    pub fn transport_id(mut self, id: impl Into<String>) -> Self {
        self.transport_id = Some(id.into());
        self
    }

    /// Limit how long establishing the connection may take.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Report `TransportEvent::Timeout` after this long without inbound traffic.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Override frame size and nesting limits.
    pub fn codec(mut self, codec: CodecOptions) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Panic on a protocol violation instead of closing the connection.
    pub fn strict_protocol(mut self, strict: bool) -> Self {
        self.strict_protocol = strict;
        self
    }

    /// Buffered events per subscriber.
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = Some(capacity);
        self
    }

    /// Build the transport (consumes self).
    ///
    /// The connection itself is established in the background; see
    /// [`connect_tcp`].
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `uri` is missing ([`RpcError::MissingConfig`])
    /// - `uri` is not a `tcp://host:port` URI ([`RpcError::InvalidUri`])
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let uri = self
            .uri
            .ok_or_else(|| RpcError::MissingConfig("uri".into()))?;
        let addr = parse_tcp_uri(&uri)?;

        let mut config = TransportConfig::new(self.transport_id.unwrap_or_else(|| addr.clone()))
            .with_strict_protocol(self.strict_protocol);

        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(Some(timeout));
        }
        if let Some(timeout) = self.idle_timeout {
            config = config.with_idle_timeout(timeout);
        }
        if let Some(codec) = self.codec {
            config = config.with_codec(codec);
        }
        if let Some(capacity) = self.inbox_capacity {
            config = config.with_inbox_capacity(capacity);
        }

        Ok(connect_tcp(addr, config))
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract `host:port` from `tcp://host:port`.
fn parse_tcp_uri(uri: &str) -> Result<String> {
    // ---
    let rest = uri
        .strip_prefix("tcp://")
        .ok_or_else(|| RpcError::InvalidUri(format!("{uri}: expected scheme tcp://")))?;

    let rest = rest.strip_suffix('/').unwrap_or(rest);

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| RpcError::InvalidUri(format!("{uri}: missing port")))?;

    if host.is_empty() || host == "[]" {
        return Err(RpcError::InvalidUri(format!("{uri}: missing host")));
    }
    if host.contains('/') {
        return Err(RpcError::InvalidUri(format!("{uri}: unexpected path")));
    }
    port.parse::<u16>()
        .map_err(|_| RpcError::InvalidUri(format!("{uri}: invalid port {port:?}")))?;

    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_parse_tcp_uri() {
        // ---
        assert_eq!(parse_tcp_uri("tcp://localhost:18800").unwrap(), "localhost:18800");
        assert_eq!(parse_tcp_uri("tcp://10.0.0.7:1/").unwrap(), "10.0.0.7:1");
        assert_eq!(parse_tcp_uri("tcp://[::1]:9000").unwrap(), "[::1]:9000");
    }

    #[test]
    fn test_parse_tcp_uri_rejects_malformed() {
        // ---
        for uri in [
            "localhost:18800",
            "mqtt://localhost:1883",
            "tcp://localhost",
            "tcp://:18800",
            "tcp://localhost:port",
            "tcp://localhost:70000",
            "tcp://host/path:80",
        ] {
            assert!(
                matches!(parse_tcp_uri(uri), Err(RpcError::InvalidUri(_))),
                "{uri} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_build_requires_uri() {
        // ---
        let result = TransportBuilder::new().transport_id("nowhere").build().await;
        assert!(matches!(result, Err(RpcError::MissingConfig(ref field)) if field == "uri"));
    }

    #[tokio::test]
    async fn test_build_names_transport_after_address() {
        // ---
        let transport = TransportBuilder::new()
            .uri("tcp://127.0.0.1:9")
            .build()
            .await
            .unwrap();
        assert_eq!(transport.transport_id(), "127.0.0.1:9");

        let named = TransportBuilder::new()
            .uri("tcp://127.0.0.1:9")
            .transport_id("named")
            .build()
            .await
            .unwrap();
        assert_eq!(named.transport_id(), "named");
    }
}
