//! Binary codec for device-link frames.
//!
//! Wire format after the handshake:
//! ```text
//! [frame_type:1][fields…]
//! ```
//! All multi-byte integers are big-endian.  Frame layouts:
//!
//! | Frame                | Layout                                   |
//! |----------------------|------------------------------------------|
//! | MonitorProbe         | `[0x01][enable:1][channel:4][probe:1]`   |
//! | MonitorInjection     | `[0x02][enable:1][channel:4][overrd:1]`  |
//! | Inject               | `[0x03][channel:4][overrd:1][value:1]`   |
//! | GetInjectionStatus   | `[0x04][channel:4][overrd:1]`            |
//! | Monitor              | `[0x10][channel:4][probe:1][value:8]`    |
//! | InjectionStatus      | `[0x11][channel:4][overrd:1][value:1]`   |

use thiserror::Error;

use crate::protocol::messages::{CommandType, DeviceCommand, DeviceEvent, EventType};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The frame type byte is not a recognized value.
    #[error("unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// The device declared an endianness other than big-endian.
    #[error("unsupported endianness byte: 0x{0:02X}")]
    UnsupportedEndianness(u8),

    /// The handshake reply did not match the expected magic exchange.
    #[error("bad handshake from device link")]
    BadHandshake,
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes a host→device command into its wire frame.
pub fn encode_command(cmd: &DeviceCommand) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11);
    buf.push(cmd.command_type() as u8);
    match *cmd {
        DeviceCommand::MonitorProbe { enable, channel, probe } => {
            buf.push(enable as u8);
            buf.extend_from_slice(&channel.to_be_bytes());
            buf.push(probe);
        }
        DeviceCommand::MonitorInjection { enable, channel, overrd } => {
            buf.push(enable as u8);
            buf.extend_from_slice(&channel.to_be_bytes());
            buf.push(overrd);
        }
        DeviceCommand::Inject { channel, overrd, value } => {
            buf.extend_from_slice(&channel.to_be_bytes());
            buf.push(overrd);
            buf.push(value as u8);
        }
        DeviceCommand::GetInjectionStatus { channel, overrd } => {
            buf.extend_from_slice(&channel.to_be_bytes());
            buf.push(overrd);
        }
    }
    buf
}

/// Encodes a device→host event into its wire frame.
///
/// Used by the device-side simulator in tests; real events originate from the
/// hardware controller.
pub fn encode_event(ev: &DeviceEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(14);
    match *ev {
        DeviceEvent::Monitor { channel, probe, value } => {
            buf.push(EventType::Monitor as u8);
            buf.extend_from_slice(&channel.to_be_bytes());
            buf.push(probe);
            buf.extend_from_slice(&value.to_be_bytes());
        }
        DeviceEvent::InjectionStatus { channel, overrd, value } => {
            buf.push(EventType::InjectionStatus as u8);
            buf.extend_from_slice(&channel.to_be_bytes());
            buf.push(overrd);
            buf.push(value as u8);
        }
    }
    buf
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one device→host event from the beginning of `bytes`.
///
/// Returns the decoded event and the number of bytes consumed so the caller
/// can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are truncated or the frame type is
/// unknown.
pub fn decode_event(bytes: &[u8]) -> Result<(DeviceEvent, usize), ProtocolError> {
    let ty_byte = *bytes.first().ok_or(ProtocolError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    let ty = EventType::try_from(ty_byte).map_err(|_| ProtocolError::UnknownFrameType(ty_byte))?;
    match ty {
        EventType::Monitor => {
            require_len(bytes, 14)?;
            let channel = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
            let probe = bytes[5];
            let value = i64::from_be_bytes(bytes[6..14].try_into().expect("length checked"));
            Ok((DeviceEvent::Monitor { channel, probe, value }, 14))
        }
        EventType::InjectionStatus => {
            require_len(bytes, 7)?;
            let channel = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
            let overrd = bytes[5];
            let value = bytes[6] as i8;
            Ok((DeviceEvent::InjectionStatus { channel, overrd, value }, 7))
        }
    }
}

/// Decodes one host→device command from the beginning of `bytes`.
///
/// The device-side counterpart of [`decode_event`]; used by the test
/// simulator to verify what the proxy put on the wire.
pub fn decode_command(bytes: &[u8]) -> Result<(DeviceCommand, usize), ProtocolError> {
    let ty_byte = *bytes.first().ok_or(ProtocolError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    let ty =
        CommandType::try_from(ty_byte).map_err(|_| ProtocolError::UnknownFrameType(ty_byte))?;
    match ty {
        CommandType::MonitorProbe => {
            require_len(bytes, 7)?;
            let enable = bytes[1] != 0;
            let channel = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
            Ok((DeviceCommand::MonitorProbe { enable, channel, probe: bytes[6] }, 7))
        }
        CommandType::MonitorInjection => {
            require_len(bytes, 7)?;
            let enable = bytes[1] != 0;
            let channel = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
            Ok((DeviceCommand::MonitorInjection { enable, channel, overrd: bytes[6] }, 7))
        }
        CommandType::Inject => {
            require_len(bytes, 7)?;
            let channel = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
            Ok((DeviceCommand::Inject { channel, overrd: bytes[5], value: bytes[6] as i8 }, 7))
        }
        CommandType::GetInjectionStatus => {
            require_len(bytes, 6)?;
            let channel = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
            Ok((DeviceCommand::GetInjectionStatus { channel, overrd: bytes[5] }, 6))
        }
    }
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if bytes.len() < needed {
        return Err(ProtocolError::InsufficientData { needed, available: bytes.len() });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
