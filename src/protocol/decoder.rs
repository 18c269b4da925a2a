//! Resumable frame decoder
//!
//! Decodes a byte stream into frames through the state machine
//! `Hunt → Header → Length → Body → Checksum → Emit|Reject`. The decoder
//! holds its position across reads, so frames split over any number of
//! port reads assemble correctly. On checksum failure the leading byte of
//! the candidate frame is discarded and hunting resumes from the next byte,
//! so a corrupted frame costs at most its own bytes.
//!
//! The 250 ms inter-byte abort window is owned by the engine runtime: it
//! observes the gap on the port and calls [`FrameDecoder::abort_partial`].

use super::frame::Frame;
use super::{ProtocolFamily, HEADER, PREAMBLE_16};
use std::collections::VecDeque;

/// Decoder output for one consumed byte sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A complete frame passed its checksum
    Frame(Frame),
    /// A candidate frame was rejected; hunting resumed one byte in
    Rejected(RejectReason),
}

/// Why a candidate frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ChecksumMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Hunt,
    Flag,
    Dest,
    Src,
    Action,
    Length,
    Body,
    ChecksumHi,
    ChecksumLo,
}

enum Step {
    Continue,
    Emit(Frame),
    Reject(RejectReason),
}

/// Incremental decoder for one port's byte stream
pub struct FrameDecoder {
    family: ProtocolFamily,
    state: State,
    window: VecDeque<u8>,
    /// Raw bytes of the current candidate, preamble included, kept for
    /// single-byte resync on rejection
    candidate: Vec<u8>,
    sum: u16,
    flag: u8,
    dest: u8,
    src: u8,
    action: u8,
    length: u8,
    payload: Vec<u8>,
    checksum_hi: u8,
}

impl FrameDecoder {
    pub fn new(family: ProtocolFamily) -> Self {
        Self {
            family,
            state: State::Hunt,
            window: VecDeque::with_capacity(4),
            candidate: Vec::new(),
            sum: 0,
            flag: 0,
            dest: 0,
            src: 0,
            action: 0,
            length: 0,
            payload: Vec::new(),
            checksum_hi: 0,
        }
    }

    /// Whether a frame is partially assembled
    pub fn in_frame(&self) -> bool {
        self.state != State::Hunt
    }

    /// Abort a partially assembled frame (inter-byte gap expired).
    /// Returns true when a partial frame was actually discarded.
    pub fn abort_partial(&mut self) -> bool {
        if self.in_frame() {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Consume a chunk of bytes, producing zero or more events
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        let mut queue: VecDeque<u8> = bytes.iter().copied().collect();

        while let Some(byte) = queue.pop_front() {
            match self.step(byte) {
                Step::Continue => {}
                Step::Emit(frame) => {
                    events.push(DecodeEvent::Frame(frame));
                    self.reset();
                }
                Step::Reject(reason) => {
                    events.push(DecodeEvent::Rejected(reason));
                    // Single-byte resync: everything after the candidate's
                    // first byte is replayed through the state machine
                    let replay = std::mem::take(&mut self.candidate);
                    for b in replay.iter().skip(1).rev() {
                        queue.push_front(*b);
                    }
                    self.reset();
                }
            }
        }

        events
    }

    fn reset(&mut self) {
        self.state = State::Hunt;
        self.window.clear();
        self.candidate.clear();
        self.payload.clear();
        self.sum = 0;
    }

    fn step(&mut self, byte: u8) -> Step {
        match self.state {
            State::Hunt => {
                self.hunt(byte);
                Step::Continue
            }
            State::Flag => {
                self.candidate.push(byte);
                self.flag = byte;
                self.sum = self.sum.wrapping_add(byte as u16);
                self.state = State::Dest;
                Step::Continue
            }
            State::Dest => {
                self.candidate.push(byte);
                self.dest = byte;
                self.sum = self.sum.wrapping_add(byte as u16);
                self.state = State::Src;
                Step::Continue
            }
            State::Src => {
                self.candidate.push(byte);
                self.src = byte;
                self.sum = self.sum.wrapping_add(byte as u16);
                self.state = State::Action;
                Step::Continue
            }
            State::Action => {
                self.candidate.push(byte);
                self.action = byte;
                self.sum = self.sum.wrapping_add(byte as u16);
                self.state = State::Length;
                Step::Continue
            }
            State::Length => {
                self.candidate.push(byte);
                self.length = byte;
                self.sum = self.sum.wrapping_add(byte as u16);
                self.state = if byte == 0 {
                    State::ChecksumHi
                } else {
                    State::Body
                };
                Step::Continue
            }
            State::Body => {
                self.candidate.push(byte);
                self.payload.push(byte);
                self.sum = self.sum.wrapping_add(byte as u16);
                if self.payload.len() == self.length as usize {
                    self.state = State::ChecksumHi;
                }
                Step::Continue
            }
            State::ChecksumHi => {
                self.candidate.push(byte);
                self.checksum_hi = byte;
                self.state = State::ChecksumLo;
                Step::Continue
            }
            State::ChecksumLo => {
                self.candidate.push(byte);
                let received = u16::from_be_bytes([self.checksum_hi, byte]);
                if received == self.sum {
                    Step::Emit(Frame {
                        flag: self.flag,
                        dest: self.dest,
                        src: self.src,
                        action: self.action,
                        payload: std::mem::take(&mut self.payload),
                    })
                } else {
                    Step::Reject(RejectReason::ChecksumMismatch)
                }
            }
        }
    }

    fn hunt(&mut self, byte: u8) {
        static PREFIX_16: [u8; 4] = [PREAMBLE_16[0], PREAMBLE_16[1], PREAMBLE_16[2], HEADER];
        static PREFIX_2: [u8; 2] = [HEADER, 0x00];

        self.window.push_back(byte);
        let (prefix, next_state): (&'static [u8], State) = match self.family {
            ProtocolFamily::Pentair16 => (&PREFIX_16, State::Flag),
            ProtocolFamily::Pentair2 => (&PREFIX_2, State::Dest),
        };
        if self.window.len() > prefix.len() {
            self.window.pop_front();
        }

        if self.window.len() == prefix.len() && self.window.iter().eq(prefix.iter()) {
            self.window.clear();
            self.candidate.extend_from_slice(prefix);
            // Pentair-2 has no flag byte; its constant 00 is already summed
            self.flag = 0;
            self.sum = prefix
                .iter()
                .skip_while(|b| **b != HEADER)
                .fold(0u16, |acc, b| acc.wrapping_add(*b as u16));
            self.state = next_state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder16() -> FrameDecoder {
        FrameDecoder::new(ProtocolFamily::Pentair16)
    }

    fn circuit_on_frame() -> Vec<u8> {
        Frame::new(0x00, 0x10, 0x00, 0x86, vec![0x06, 0x01])
            .encode(ProtocolFamily::Pentair16)
            .unwrap()
    }

    #[test]
    fn decodes_whole_frame() {
        let mut dec = decoder16();
        let events = dec.feed(&circuit_on_frame());
        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Frame(f) => {
                assert_eq!(f.dest, 0x10);
                assert_eq!(f.action, 0x86);
                assert_eq!(f.payload, vec![0x06, 0x01]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!dec.in_frame());
    }

    #[test]
    fn decodes_across_split_reads() {
        let bytes = circuit_on_frame();
        let mut dec = decoder16();
        // Feed one byte at a time, as a slow serial bridge would deliver
        let mut events = Vec::new();
        for b in &bytes {
            events.extend(dec.feed(std::slice::from_ref(b)));
        }
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DecodeEvent::Frame(_)));
    }

    #[test]
    fn skips_leading_garbage() {
        let mut bytes = vec![0x12, 0xFF, 0x55, 0x00];
        bytes.extend(circuit_on_frame());
        let mut dec = decoder16();
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DecodeEvent::Frame(_)));
    }

    #[test]
    fn checksum_failure_resyncs_to_next_frame() {
        // First frame carries a corrupted checksum; the valid frame behind
        // it must decode normally
        let mut bad = circuit_on_frame();
        let last = bad.len() - 1;
        bad[last] = bad[last].wrapping_add(1);
        bad.extend(circuit_on_frame());

        let mut dec = decoder16();
        let events = dec.feed(&bad);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            DecodeEvent::Rejected(RejectReason::ChecksumMismatch)
        ));
        assert!(matches!(events[1], DecodeEvent::Frame(_)));
    }

    #[test]
    fn corrupt_payload_byte_is_rejected() {
        let mut bytes = circuit_on_frame();
        bytes[9] = bytes[9].wrapping_add(1); // first payload byte
        let mut dec = decoder16();
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DecodeEvent::Rejected(_)));
    }

    #[test]
    fn zero_length_payload_frame() {
        let frame = Frame::new(0x00, 0x10, 0x22, 0xC2, vec![]);
        let bytes = frame.encode(ProtocolFamily::Pentair16).unwrap();
        let mut dec = decoder16();
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodeEvent::Frame(f) => assert!(f.payload.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn pentair2_round_trip() {
        let frame = Frame::new(0x00, 0x0F, 0x10, 0x1E, vec![0x01, 0x02, 0x03]);
        let bytes = frame.encode(ProtocolFamily::Pentair2).unwrap();
        let mut dec = FrameDecoder::new(ProtocolFamily::Pentair2);
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], DecodeEvent::Frame(frame));
    }

    #[test]
    fn abort_partial_discards_frame_in_progress() {
        let bytes = circuit_on_frame();
        let mut dec = decoder16();
        dec.feed(&bytes[..7]);
        assert!(dec.in_frame());
        assert!(dec.abort_partial());
        assert!(!dec.in_frame());

        // A fresh complete frame still decodes
        let events = dec.feed(&circuit_on_frame());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DecodeEvent::Frame(_)));
    }

    #[test]
    fn preamble_bytes_inside_payload_do_not_confuse_decoder() {
        let frame = Frame::new(0x00, 0x10, 0x00, 0x02, vec![0xFF, 0x00, 0xFF, 0xA5]);
        let bytes = frame.encode(ProtocolFamily::Pentair16).unwrap();
        let mut dec = decoder16();
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], DecodeEvent::Frame(frame));
    }

    #[test]
    fn overlapping_preamble_prefix_still_locks() {
        // FF FF 00 FF A5 ... : the second FF begins the true preamble
        let mut bytes = vec![0xFF];
        bytes.extend(circuit_on_frame());
        let mut dec = decoder16();
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DecodeEvent::Frame(_)));
    }
}
