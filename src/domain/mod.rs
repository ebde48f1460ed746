//! Domain layer public interface.
//!
//! This module defines the connection abstraction shared by the client and
//! server engines, independent of sockets, framing or codecs.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    SubscriptionHandle,
    Transport,
    TransportEvent,
    TransportPtr,
};
