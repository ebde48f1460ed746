//! MessagePack-RPC over byte-stream connections with automatic request/response
//! correlation
//!
//! This library implements the MessagePack-RPC message model (requests,
//! responses and notifications), a client engine that multiplexes concurrent
//! calls over one connection and matches responses by id, and a server engine
//! that dispatches inbound messages to registered method handlers.
//!
//! Connections are [`Transport`]s: TCP via [`connect_tcp`] / [`accept_tcp`] /
//! [`TransportBuilder`], any Tokio stream via [`transport_from_stream`], and an
//! in-process pair via [`memory_pair`].
//!

// Import all sub modules once...
mod client;
mod domain;
mod protocol;
mod server;
mod transport;

mod rpc_config;
mod transport_builder;

mod correlation;
mod error;
mod macros;
mod sync;

pub(crate) use macros::{log_debug, log_error, log_info, log_trace, log_warn};

// Re-export main types
pub use client::{Reply, RpcClient};
pub use server::{MethodHandler, Responder, RpcServer, NOT_IMPLEMENTED};

pub use rpc_config::{RpcConfig, TransportConfig};
pub use transport_builder::TransportBuilder;

pub use correlation::IdGenerator;
pub use error::{Result, RpcError};

pub use protocol::{
    //
    CodecOptions,
    DecodeOptions,
    EncodeOptions,
    Message,
    MessageType,
    MsgPackCodec,
};

/// Dynamically typed MessagePack value used for params and results.
pub use rmpv::Value;

pub use transport::{accept_tcp, connect_tcp, memory_pair, transport_from_stream};

// --- public re-exports
pub use domain::{
    //
    SubscriptionHandle,
    Transport,
    TransportEvent,
    TransportPtr,
};
