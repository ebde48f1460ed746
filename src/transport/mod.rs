//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait. All of them share one connection actor over a byte
//! stream and are exposed only through constructor functions.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
mod stream;
mod tcp;

pub use memory::memory_pair;
pub use stream::transport_from_stream;
pub use tcp::{accept_tcp, connect_tcp};
