//! Engine and transport configuration.
//!
//! [`RpcConfig`] tunes the client engine and carries no transport concepts.
//! [`TransportConfig`] tunes a single connection: establishment, framing and
//! how protocol violations are treated.

use std::time::Duration;

use crate::CodecOptions;

/// Client engine configuration.
#[derive(Debug, Clone, Default)]
pub struct RpcConfig {
    // ---
    /// Time to wait for a response before evicting the pending request.
    ///
    /// `None` (the default) waits forever: the protocol itself defines no
    /// timeout, so an unanswered request stays pending until the connection
    /// closes.
    pub request_timeout: Option<Duration>,
}

impl RpcConfig {
    /// Set a response timeout applied to every request.
    ///
    /// # Example
    ///
    /// ```
    /// use msgpack_rpc::RpcConfig;
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::default().with_request_timeout(Duration::from_secs(5));
    /// assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
    /// ```
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Identifier for this connection, used for logging only.
    pub transport_id: String,

    /// Bound on establishing the connection. `None` waits for the OS.
    ///
    /// Default: 10 seconds
    pub connect_timeout: Option<Duration>,

    /// Emit [`TransportEvent::Timeout`](crate::TransportEvent::Timeout) when
    /// nothing has been received for this long. Informational only.
    pub idle_timeout: Option<Duration>,

    /// Capacity of each subscriber's event inbox.
    pub inbox_capacity: usize,

    /// Capacity of the command queue feeding the connection actor. Sends
    /// issued before the connection is up wait here.
    pub command_capacity: usize,

    /// Treat protocol violations as assertion failures instead of tearing the
    /// connection down.
    pub strict_protocol: bool,

    /// MessagePack codec options.
    pub codec: CodecOptions,
}

impl TransportConfig {
    // ---

    /// Create a configuration with defaults for the given connection id.
    pub fn new(transport_id: impl Into<String>) -> Self {
        // ---
        Self {
            transport_id: transport_id.into(),
            connect_timeout: Some(Duration::from_secs(10)),
            idle_timeout: None,
            inbox_capacity: 64,
            command_capacity: 64,
            strict_protocol: false,
            codec: CodecOptions::default(),
        }
    }

    /// Copy of this configuration with a different connection id.
    pub fn with_transport_id(mut self, transport_id: impl Into<String>) -> Self {
        self.transport_id = transport_id.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    pub fn with_strict_protocol(mut self, strict: bool) -> Self {
        self.strict_protocol = strict;
        self
    }

    pub fn with_codec(mut self, codec: CodecOptions) -> Self {
        self.codec = codec;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new("msgpack-rpc")
    }
}
