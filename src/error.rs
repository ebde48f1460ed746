use thiserror::Error;

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// Writing to or connecting the underlying stream failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection was torn down while the call was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer answered with a non-nil `error` field.
    ///
    /// A request for an unregistered method lands here with
    /// `message == "Not Implemented"`.
    #[error("{message}")]
    Remote {
        /// Correlation id of the request that failed.
        id: u32,
        /// Error text exactly as carried on the wire.
        message: String,
    },

    /// Malformed frame, unknown type tag or wrong arity.
    ///
    /// Fatal for the connection it was observed on; never retried.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// MessagePack encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Converting typed params or results to or from `Value` failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A caller-side timeout evicted the pending request.
    #[error("request timed out")]
    Timeout,

    /// Raw socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required builder field was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// The transport URI could not be understood.
    #[error("invalid transport uri: {0}")]
    InvalidUri(String),
}

impl RpcError {
    // ---

    /// True for errors after which the connection must not be used again.
    pub fn is_connection_fatal(&self) -> bool {
        // ---
        matches!(
            self,
            RpcError::ConnectionClosed
                | RpcError::Transport(_)
                | RpcError::Protocol(_)
                | RpcError::Io(_)
        )
    }

    /// The remote error text, if the peer reported one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            RpcError::Remote { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_remote_displays_wire_text() {
        // ---
        let err = RpcError::Remote {
            id: 7,
            message: "Not Implemented".into(),
        };
        assert_eq!(err.to_string(), "Not Implemented");
        assert_eq!(err.remote_message(), Some("Not Implemented"));
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        // ---
        assert!(RpcError::ConnectionClosed.is_connection_fatal());
        assert!(RpcError::Protocol("bad tag".into()).is_connection_fatal());
        assert!(RpcError::Transport("broken pipe".into()).is_connection_fatal());
        assert!(!RpcError::Codec("frame too large".into()).is_connection_fatal());
        assert!(!RpcError::Timeout.is_connection_fatal());
        assert_eq!(RpcError::ConnectionClosed.to_string(), "connection closed");
    }
}
