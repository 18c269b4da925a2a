//! Response matching
//!
//! Each outbound message that expects a reply declares a descriptor: the
//! peer it addressed, the action code of the reply, and optionally a
//! correlating byte inside the reply payload. Pentair panels acknowledge a
//! command action `n` with an ack frame whose payload leads with `n`; the
//! correlation field captures that without special-casing.

use crate::protocol::Frame;

/// A byte inside the response payload that must match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    pub offset: usize,
    pub value: u8,
}

/// Expected response descriptor for an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMatch {
    /// Address of the device the request went to; the reply's source
    pub peer: u8,
    /// Action code of the reply
    pub action: u8,
    /// Optional correlating byte in the reply payload
    pub correlate: Option<Correlation>,
}

impl ResponseMatch {
    /// Plain (peer, action) match
    pub fn action(peer: u8, action: u8) -> Self {
        Self {
            peer,
            action,
            correlate: None,
        }
    }

    /// Ack-style match: reply action plus a correlating payload byte
    pub fn ack(peer: u8, action: u8, correlate_offset: usize, correlate_value: u8) -> Self {
        Self {
            peer,
            action,
            correlate: Some(Correlation {
                offset: correlate_offset,
                value: correlate_value,
            }),
        }
    }

    /// Whether the inbound frame completes this descriptor
    pub fn matches(&self, frame: &Frame) -> bool {
        if frame.src != self.peer || frame.action != self.action {
            return false;
        }
        match self.correlate {
            Some(c) => frame.payload.get(c.offset) == Some(&c.value),
            None => true,
        }
    }

    /// Short descriptor for `NoResponse` payloads
    pub fn describe(&self) -> String {
        match self.correlate {
            Some(c) => format!(
                "action {} from {} (payload[{}]={})",
                self.action, self.peer, c.offset, c.value
            ),
            None => format!("action {} from {}", self.action, self.peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_peer_and_action() {
        let m = ResponseMatch::action(0x10, 0x02);
        assert!(m.matches(&Frame::new(0, 0x20, 0x10, 0x02, vec![])));
        assert!(!m.matches(&Frame::new(0, 0x20, 0x11, 0x02, vec![])));
        assert!(!m.matches(&Frame::new(0, 0x20, 0x10, 0x03, vec![])));
    }

    #[test]
    fn ack_requires_correlating_byte() {
        let m = ResponseMatch::ack(0x10, 0x01, 0, 0x86);
        assert!(m.matches(&Frame::new(0, 0x20, 0x10, 0x01, vec![0x86])));
        assert!(!m.matches(&Frame::new(0, 0x20, 0x10, 0x01, vec![0x87])));
        assert!(!m.matches(&Frame::new(0, 0x20, 0x10, 0x01, vec![])));
    }
}
