//! Protocol types for MessagePack-RPC framing and message shapes.
//!
//! This module defines the positional wire layout of the three message
//! kinds and the codec that frames them on a byte stream.
mod codec;
mod message;

pub use codec::{CodecOptions, DecodeOptions, EncodeOptions, MsgPackCodec};
pub use message::{Message, MessageType};
