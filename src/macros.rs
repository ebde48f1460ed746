// src/macros.rs

//
// Logging macros
//
// logging feature enabled  → tracing, under the `msgpack_rpc` target
// logging feature disabled → log_error goes to stderr, the rest only
//                            type-check their arguments
//

#![allow(unused_macros)]

// --------------------
// ERROR
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "msgpack_rpc", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!("msgpack-rpc: {}", format_args!($($arg)*))
    };
}

// --------------------
// WARN / INFO / DEBUG / TRACE
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "msgpack_rpc", $($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "msgpack_rpc", $($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "msgpack_rpc", $($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "msgpack_rpc", $($arg)*)
    };
}

// Disabled levels still expand `format_args!` so captured identifiers count
// as used and call sites need no `_`-prefixed bindings.
#[cfg(not(feature = "logging"))]
macro_rules! log_silent {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::macros::log_silent!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::macros::log_silent!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::macros::log_silent!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::macros::log_silent!($($arg)*) };
}

#[cfg(not(feature = "logging"))]
pub(crate) use log_silent;

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_trace;
pub(crate) use log_warn;
