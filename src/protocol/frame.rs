//! Frame model and encoder

use super::{ProtocolFamily, HEADER, MAX_PAYLOAD, PREAMBLE_16};
use crate::error::{Result, TritonError};

/// One logical message on the wire.
///
/// `flag` is the byte between the `A5` header and the destination in the
/// Pentair-16 family; boards set it per variant. Pentair-2 has no flag
/// byte (the `00` following `A5` belongs to the header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flag: u8,
    pub dest: u8,
    pub src: u8,
    pub action: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(flag: u8, dest: u8, src: u8, action: u8, payload: Vec<u8>) -> Self {
        Self {
            flag,
            dest,
            src,
            action,
            payload,
        }
    }

    /// Checksum over an already-assembled checksummed region
    /// (header byte through last payload byte)
    pub fn checksum(region: &[u8]) -> u16 {
        region.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
    }

    /// Encode into one contiguous buffer ready for the port layer
    pub fn encode(&self, family: ProtocolFamily) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(TritonError::internal(format!(
                "payload of {} bytes exceeds frame limit",
                self.payload.len()
            )));
        }

        let mut out = Vec::with_capacity(self.payload.len() + 11);
        let region_start;

        match family {
            ProtocolFamily::Pentair16 => {
                out.extend_from_slice(&PREAMBLE_16);
                region_start = out.len();
                out.push(HEADER);
                out.push(self.flag);
            }
            ProtocolFamily::Pentair2 => {
                region_start = 0;
                out.push(HEADER);
                out.push(0x00);
            }
        }

        out.push(self.dest);
        out.push(self.src);
        out.push(self.action);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);

        let sum = Self::checksum(&out[region_start..]);
        out.extend_from_slice(&sum.to_be_bytes());
        Ok(out)
    }

    /// Total encoded length for this frame in the given family
    pub fn encoded_len(&self, family: ProtocolFamily) -> usize {
        match family {
            ProtocolFamily::Pentair16 => 3 + 6 + self.payload.len() + 2,
            ProtocolFamily::Pentair2 => 6 + self.payload.len() + 2,
        }
    }

    /// Short descriptor for logs and `NoResponse` payloads
    pub fn describe(&self) -> String {
        format!("action {} to {}", self.action, self.dest)
    }
}
