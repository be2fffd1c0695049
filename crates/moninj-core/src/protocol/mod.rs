//! Device-link wire protocol: message types, binary codec, and the probe /
//! override constant tables.
//!
//! The device link is a single TCP connection to the embedded hardware
//! controller.  After a fixed handshake, both sides exchange small
//! fixed-layout binary frames; see [`codec`] for the byte format.

pub mod codec;
pub mod messages;

pub use codec::{decode_event, encode_command, ProtocolError};
pub use messages::{ttl, synth, DeviceCommand, DeviceEvent};
