use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::cursor::ByteCursor;
use crate::mac::MacAddress;

pub const MGMT_HEADER_LEN: usize = 24;
pub const QOS_HEADER_LEN: usize = 26;

pub const FC_BEACON: u8 = 0x80;
pub const FC_DEAUTH: u8 = 0xC0;
pub const FC_ASSOC_REQ: u8 = 0x00;
pub const FC_REASSOC_REQ: u8 = 0x20;

pub const TAG_SSID: u8 = 0x00;
pub const TAG_DS_PARAMS: u8 = 0x03;
pub const TAG_RSN: u8 = 0x30;

pub const MAX_SSID_LEN: usize = 32;

/// 802.2 LLC/SNAP header announcing ethertype 0x888E.
pub const LLC_SNAP_EAPOL: [u8; 8] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8E];

bitflags! {
    /// Second byte of the frame-control field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const TO_DS = 0x01;
        const FROM_DS = 0x02;
        const MORE_FRAGMENTS = 0x04;
        const RETRY = 0x08;
        const POWER_MGMT = 0x10;
        const MORE_DATA = 0x20;
        const PROTECTED = 0x40;
        const ORDER = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCategory {
    Management,
    Control,
    Data,
    Extension,
}

impl FrameCategory {
    pub fn from_frame_control(fc0: u8) -> Self {
        match (fc0 & 0x0C) >> 2 {
            0 => FrameCategory::Management,
            1 => FrameCategory::Control,
            2 => FrameCategory::Data,
            _ => FrameCategory::Extension,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Beacon,
    Deauthentication,
    AssociationRequest,
    ReassociationRequest,
    Eapol,
    Data,
    Other,
}

/// Typed view over the first bytes of a frame. Derived on every dispatch,
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub category: FrameCategory,
    pub flags: FrameFlags,
    pub receiver: MacAddress,
    pub transmitter: MacAddress,
    pub bssid: MacAddress,
    pub body_offset: usize,
    pub ie_offset: usize,
    pub len: usize,
}

impl FrameHeader {
    /// The non-AP side of the exchange, when the addressing says which one
    /// it is.
    pub fn station(&self) -> Option<MacAddress> {
        match self.category {
            FrameCategory::Management => {
                if self.transmitter == self.bssid {
                    Some(self.receiver)
                } else {
                    Some(self.transmitter)
                }
            }
            FrameCategory::Data => {
                let to_ds = self.flags.contains(FrameFlags::TO_DS);
                let from_ds = self.flags.contains(FrameFlags::FROM_DS);
                match (to_ds, from_ds) {
                    (true, false) => Some(self.transmitter),
                    (false, true) => Some(self.receiver),
                    (false, false) => Some(self.transmitter),
                    (true, true) => None,
                }
            }
            _ => None,
        }
    }

    pub fn has_qos(&self) -> bool {
        self.body_offset == QOS_HEADER_LEN
    }
}

/// Classifies a raw 802.11 frame (radiotap already stripped).
///
/// Returns `None` for anything shorter than a management header or whose
/// body offset would land past the end of the buffer.
pub fn classify(frame: &[u8]) -> Option<FrameHeader> {
    if frame.len() < MGMT_HEADER_LEN {
        return None;
    }

    let mut cur = ByteCursor::new(frame);
    let fc0 = cur.read_u8()?;
    let flags = FrameFlags::from_bits_truncate(cur.read_u8()?);
    cur.skip(2)?; // duration
    let addr1 = MacAddress(cur.read_array()?);
    let addr2 = MacAddress(cur.read_array()?);
    let addr3 = MacAddress(cur.read_array()?);

    let category = FrameCategory::from_frame_control(fc0);

    // QoS subtypes of data frames (subtype bit 3) carry two extra bytes.
    let body_offset = if category == FrameCategory::Data && fc0 & 0x80 != 0 {
        QOS_HEADER_LEN
    } else {
        MGMT_HEADER_LEN
    };
    if body_offset > frame.len() {
        return None;
    }

    let (kind, bssid, ie_offset) = match category {
        FrameCategory::Management => {
            // Management frames always carry the BSSID in address 3.
            let (kind, fixed) = match fc0 & 0xFC {
                FC_BEACON => (FrameKind::Beacon, 12),
                FC_DEAUTH => (FrameKind::Deauthentication, 2),
                FC_ASSOC_REQ => (FrameKind::AssociationRequest, 4),
                FC_REASSOC_REQ => (FrameKind::ReassociationRequest, 10),
                _ => (FrameKind::Other, 0),
            };
            (kind, addr3, body_offset + fixed)
        }
        FrameCategory::Data => {
            let bssid = match (flags.contains(FrameFlags::TO_DS), flags.contains(FrameFlags::FROM_DS)) {
                (false, false) => addr3,
                (true, false) => addr1,
                (false, true) => addr2,
                (true, true) => addr3,
            };
            let kind = if is_llc_snap_eapol(frame, body_offset) {
                FrameKind::Eapol
            } else {
                FrameKind::Data
            };
            (kind, bssid, body_offset)
        }
        _ => (FrameKind::Other, addr3, body_offset),
    };

    Some(FrameHeader {
        kind,
        category,
        flags,
        receiver: addr1,
        transmitter: addr2,
        bssid,
        body_offset,
        ie_offset,
        len: frame.len(),
    })
}

fn is_llc_snap_eapol(frame: &[u8], body_offset: usize) -> bool {
    frame
        .get(body_offset..body_offset + LLC_SNAP_EAPOL.len())
        .map_or(false, |snap| snap == LLC_SNAP_EAPOL)
}

/// One tagged parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub id: u8,
    pub data: &'a [u8],
}

/// Walks tagged parameters. Iteration ends at the first element whose
/// declared length runs past the buffer.
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    cursor: ByteCursor<'a>,
}

impl<'a> Elements<'a> {
    pub fn new(frame: &'a [u8], start: usize) -> Self {
        let cursor = ByteCursor::at(frame, start.min(frame.len())).unwrap_or_else(|| ByteCursor::new(frame));
        Elements { cursor }
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Element<'a>> {
        let mut peek = self.cursor.clone();
        let id = peek.read_u8()?;
        let len = peek.read_u8()? as usize;
        let data = peek.take(len)?;
        self.cursor = peek;
        Some(Element { id, data })
    }
}

pub fn elements<'a>(frame: &'a [u8], header: &FrameHeader) -> Elements<'a> {
    Elements::new(frame, header.ie_offset)
}

pub fn find_element<'a>(frame: &'a [u8], start: usize, id: u8) -> Option<&'a [u8]> {
    Elements::new(frame, start).find(|e| e.id == id).map(|e| e.data)
}

/// SSID bytes to text. Over-long values are rejected, NULs (used by some
/// hidden networks) are dropped.
pub fn decode_ssid(raw: &[u8]) -> Option<String> {
    if raw.len() > MAX_SSID_LEN {
        return None;
    }
    let ssid = String::from_utf8_lossy(raw).replace('\0', "");
    Some(ssid)
}

pub fn extract_ssid(frame: &[u8], header: &FrameHeader) -> Option<String> {
    find_element(frame, header.ie_offset, TAG_SSID).and_then(decode_ssid)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconInfo {
    pub ssid: Option<String>,
    pub channel: Option<u8>,
}

pub fn parse_beacon(frame: &[u8], header: &FrameHeader) -> BeaconInfo {
    let mut info = BeaconInfo { ssid: None, channel: None };
    for element in elements(frame, header) {
        match element.id {
            TAG_SSID if info.ssid.is_none() => info.ssid = decode_ssid(element.data),
            TAG_DS_PARAMS if info.channel.is_none() => info.channel = element.data.first().copied(),
            _ => {}
        }
        if info.ssid.is_some() && info.channel.is_some() {
            break;
        }
    }
    info
}

/// Fields pulled out of the radiotap header that precedes every frame on a
/// monitor interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadiotapInfo {
    pub header_len: usize,
    pub channel: Option<u8>,
    pub rssi: Option<i8>,
    pub fcs_at_end: bool,
}

const TSFT_PRESENT: u32 = 1 << 0;
const FLAGS_PRESENT: u32 = 1 << 1;
const RATE_PRESENT: u32 = 1 << 2;
const CHANNEL_PRESENT: u32 = 1 << 3;
const FHSS_PRESENT: u32 = 1 << 4;
const ANT_SIGNAL_PRESENT: u32 = 1 << 5;
const EXT_PRESENT: u32 = 1 << 31;

const RADIOTAP_FLAG_FCS: u8 = 0x10;

pub fn parse_radiotap_header(data: &[u8]) -> Option<RadiotapInfo> {
    if data.len() < 8 {
        return None;
    }

    let header_len = LittleEndian::read_u16(&data[2..4]) as usize;
    if data.len() < header_len || header_len < 8 {
        return None;
    }
    let header = &data[..header_len];

    let present = LittleEndian::read_u32(&header[4..8]);

    // Skip any extended presence words.
    let mut pos = 8;
    let mut word = present;
    while word & EXT_PRESENT != 0 {
        if pos + 4 > header_len {
            return None;
        }
        word = LittleEndian::read_u32(&header[pos..pos + 4]);
        pos += 4;
    }

    let align = |pos: usize, to: usize| (pos + to - 1) & !(to - 1);
    let mut info = RadiotapInfo { header_len, ..Default::default() };

    if present & TSFT_PRESENT != 0 {
        pos = align(pos, 8) + 8;
    }

    if present & FLAGS_PRESENT != 0 {
        if let Some(flags) = header.get(pos) {
            info.fcs_at_end = flags & RADIOTAP_FLAG_FCS != 0;
        }
        pos += 1;
    }

    if present & RATE_PRESENT != 0 {
        pos += 1;
    }

    if present & CHANNEL_PRESENT != 0 {
        pos = align(pos, 2);
        if pos + 4 <= header_len {
            let freq = LittleEndian::read_u16(&header[pos..pos + 2]);
            info.channel = freq_to_channel(freq);
        }
        pos += 4;
    }

    if present & FHSS_PRESENT != 0 {
        pos += 2;
    }

    if present & ANT_SIGNAL_PRESENT != 0 {
        if let Some(signal) = header.get(pos) {
            info.rssi = Some(*signal as i8);
        }
    }

    Some(info)
}

pub fn freq_to_channel(freq: u16) -> Option<u8> {
    match freq {
        2484 => Some(14),
        2412..=2472 => Some(((freq - 2407) / 5) as u8),
        5000..=5895 => Some(((freq - 5000) / 5) as u8),
        _ => None,
    }
}

/// Splits a monitor-mode packet into its radiotap metadata and the bare
/// 802.11 frame, trimming a trailing FCS when the header flags one.
pub fn strip_radiotap(packet: &[u8]) -> Option<(RadiotapInfo, &[u8])> {
    let info = parse_radiotap_header(packet)?;
    let mut frame = &packet[info.header_len..];
    if info.fcs_at_end {
        if frame.len() < 4 {
            return None;
        }
        frame = &frame[..frame.len() - 4];
    }
    Some((info, frame))
}
