//! All device-link message types.
//!
//! The link is asymmetric: the host sends [`DeviceCommand`]s (subscription
//! management and injection), the device sends [`DeviceEvent`]s (monitor
//! readings and injection status).  The canonical channel addressing is a
//! 32-bit channel number plus an 8-bit probe or override slot.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Magic string written by the host immediately after connecting.
pub const LINK_MAGIC: &[u8; 12] = b"moninj-ip 01";

/// Endianness byte sent by the device in reply to the magic.
/// `b'e'` declares big-endian frames, the only supported value.
pub const ENDIAN_BIG: u8 = b'e';

// ── Command type codes ────────────────────────────────────────────────────────

/// Host→device frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    MonitorProbe = 0x01,
    MonitorInjection = 0x02,
    Inject = 0x03,
    GetInjectionStatus = 0x04,
}

impl TryFrom<u8> for CommandType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CommandType::MonitorProbe),
            0x02 => Ok(CommandType::MonitorInjection),
            0x03 => Ok(CommandType::Inject),
            0x04 => Ok(CommandType::GetInjectionStatus),
            _ => Err(()),
        }
    }
}

/// Device→host frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Monitor = 0x10,
    InjectionStatus = 0x11,
}

impl TryFrom<u8> for EventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(EventType::Monitor),
            0x11 => Ok(EventType::InjectionStatus),
            _ => Err(()),
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A host→device request, forwarded verbatim by the proxy RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    /// Enable or disable monitoring of one probe on one channel.
    MonitorProbe { enable: bool, channel: u32, probe: u8 },
    /// Enable or disable monitoring of one override slot on one channel.
    MonitorInjection { enable: bool, channel: u32, overrd: u8 },
    /// Force an override value irrespective of the hardware's natural state.
    Inject { channel: u32, overrd: u8, value: i8 },
    /// Request a one-shot injection-status report; the reply arrives as an
    /// [`DeviceEvent::InjectionStatus`] event.
    GetInjectionStatus { channel: u32, overrd: u8 },
}

impl DeviceCommand {
    /// Returns the [`CommandType`] discriminant for this command.
    pub fn command_type(&self) -> CommandType {
        match self {
            DeviceCommand::MonitorProbe { .. } => CommandType::MonitorProbe,
            DeviceCommand::MonitorInjection { .. } => CommandType::MonitorInjection,
            DeviceCommand::Inject { .. } => CommandType::Inject,
            DeviceCommand::GetInjectionStatus { .. } => CommandType::GetInjectionStatus,
        }
    }
}

/// A device→host notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A monitored probe changed value.
    Monitor { channel: u32, probe: u8, value: i64 },
    /// An override slot changed state (also sent in reply to
    /// [`DeviceCommand::GetInjectionStatus`]).
    InjectionStatus { channel: u32, overrd: u8, value: i8 },
}

// ── Probe and override tables ─────────────────────────────────────────────────

/// Probe and override slot numbers for TTL channels.
pub mod ttl {
    /// Current logic level of the line.
    pub const PROBE_LEVEL: u8 = 0;
    /// Output-enable state of the line driver.
    pub const PROBE_OUTPUT_ENABLE: u8 = 1;

    /// Master override flag: when set, injected values win.
    pub const OVERRIDE_ENABLE: u8 = 0;
    /// Level forced while the override is enabled.
    pub const OVERRIDE_LEVEL: u8 = 1;
    /// Output-enable forced while the override is enabled.
    pub const OVERRIDE_OUTPUT_ENABLE: u8 = 2;
}

/// Probe slot layout for multi-register synthesizer channels.
///
/// Each physical channel occupies three probe slots on its bus channel:
/// the register address being written, then the high and low data words.
pub mod synth {
    /// Offset of the register-address probe (equal to the channel number).
    pub const PROBE_REG_OFFSET: u8 = 0;
    /// Offset of the high-word probe.
    pub const PROBE_DATA_HIGH_OFFSET: u8 = 4;
    /// Offset of the low-word probe.
    pub const PROBE_DATA_LOW_OFFSET: u8 = 8;

    /// Injection slots, monitored only on channel 0 of a physical device.
    pub const OVERRIDE_SLOTS: [u8; 3] = [0, 1, 2];
}
