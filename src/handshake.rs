//! EAPOL key-frame classification and per-target message bookkeeping.

use std::collections::BTreeSet;

use crate::cursor::ByteCursor;
use crate::mac::MacAddress;
use crate::parser::{FrameHeader, FrameKind, LLC_SNAP_EAPOL};

pub const EAPOL_KEY_TYPE: u8 = 3;

/// Key-information bit that stands for each message number, checked in
/// ascending order. The ack/install/MIC/secure flags are not consulted.
const MESSAGE_BITS: [(u16, u8); 4] = [(0x0001, 1), (0x0002, 2), (0x0004, 3), (0x0008, 4)];

/// Reads the key-information field of an EAPOL-Key frame.
///
/// The field sits after the LLC/SNAP header, the four-byte EAPOL header and
/// the descriptor type, and is big-endian on the wire.
pub fn key_information(frame: &[u8], header: &FrameHeader) -> Option<u16> {
    if header.kind != FrameKind::Eapol {
        return None;
    }
    let mut cur = ByteCursor::at(frame, header.body_offset)?;
    cur.skip(LLC_SNAP_EAPOL.len())?;
    cur.read_u8()?; // protocol version
    if cur.read_u8()? != EAPOL_KEY_TYPE {
        return None;
    }
    cur.skip(2)?; // packet body length
    cur.read_u8()?; // descriptor type
    cur.read_u16_be()
}

pub fn message_number(key_info: u16) -> Option<u8> {
    MESSAGE_BITS
        .iter()
        .find(|(bit, _)| key_info & bit != 0)
        .map(|&(_, msg)| msg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandshakeKey {
    pub bssid: MacAddress,
    pub message: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Duplicate,
    /// `completed` is true only for the message that finished the set.
    Recorded { message: u8, completed: bool },
}

#[derive(Debug, Default)]
pub struct HandshakeTracker {
    seen: BTreeSet<HandshakeKey>,
    completed: bool,
}

impl HandshakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, bssid: MacAddress, message: u8) -> HandshakeOutcome {
        if !self.seen.insert(HandshakeKey { bssid, message }) {
            return HandshakeOutcome::Duplicate;
        }

        let completed = !self.completed && self.messages_for(bssid).len() == MESSAGE_BITS.len();
        if completed {
            self.completed = true;
        }
        HandshakeOutcome::Recorded { message, completed }
    }

    pub fn messages_for(&self, bssid: MacAddress) -> Vec<u8> {
        self.seen
            .iter()
            .filter(|key| key.bssid == bssid)
            .map(|key| key.message)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.completed = false;
    }
}
