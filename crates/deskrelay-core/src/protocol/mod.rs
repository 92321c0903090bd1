//! Protocol module containing the JSON message types and the binary frame codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_frame, encode_frame, FrameEnvelope, FrameKind, ProtocolError};
pub use messages::*;
