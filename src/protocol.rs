//! Pentair-family wire protocol
//!
//! Two framing variants ride the same RS-485 bus family:
//!
//! - **Pentair-16** (IntelliTouch, EasyTouch, SunTouch, IntelliCom):
//!   preamble `FF 00 FF`, header `A5`, then
//!   `[flag, dest, src, action, length, payload, ck-hi, ck-lo]`.
//! - **Pentair-2** (IntelliCenter): header `A5 00`, then
//!   `[dest, src, action, length, payload, ck-hi, ck-lo]`.
//!
//! The checksum is the unsigned sum of every byte from the `A5` header
//! through the last payload byte, modulo 65536, big-endian on the wire.

use crate::config::ControllerType;

pub mod decoder;
pub mod frame;

pub use decoder::{DecodeEvent, FrameDecoder, RejectReason};
pub use frame::Frame;

/// Framing variant, selected per port by controller type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    /// `FF 00 FF A5` preamble framing
    Pentair16,
    /// `A5 00` header framing
    Pentair2,
}

impl ProtocolFamily {
    /// The framing a controller variant speaks.
    ///
    /// Standalone has no attached panel; its loopback and relay-side
    /// messaging uses the Pentair-16 shape.
    pub fn for_controller(controller_type: ControllerType) -> Self {
        match controller_type {
            ControllerType::IntelliCenter => ProtocolFamily::Pentair2,
            _ => ProtocolFamily::Pentair16,
        }
    }
}

/// Largest payload a frame may carry; the length field is one byte
pub const MAX_PAYLOAD: usize = 255;

/// Header byte starting the checksummed region in both families
pub const HEADER: u8 = 0xA5;

/// Pentair-16 preamble preceding the header
pub const PREAMBLE_16: [u8; 3] = [0xFF, 0x00, 0xFF];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_by_controller() {
        assert_eq!(
            ProtocolFamily::for_controller(ControllerType::IntelliCenter),
            ProtocolFamily::Pentair2
        );
        assert_eq!(
            ProtocolFamily::for_controller(ControllerType::IntelliTouch),
            ProtocolFamily::Pentair16
        );
        assert_eq!(
            ProtocolFamily::for_controller(ControllerType::SunTouch),
            ProtocolFamily::Pentair16
        );
    }
}
