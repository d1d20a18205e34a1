//! PMKID recovery from the RSN element of (re)association requests.

use std::fmt;

use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::mac::MacAddress;
use crate::parser::{self, FrameHeader, FrameKind, TAG_RSN};

pub const PMKID_LEN: usize = 16;

/// RSN capability bit gating PMKID extraction.
pub const RSN_CAP_PMKID: u16 = 0x8000;

pub type Pmkid = [u8; PMKID_LEN];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PmkidRecord {
    pub bssid: MacAddress,
    pub station: MacAddress,
    #[serde(serialize_with = "serialize_pmkid")]
    pub pmkid: Pmkid,
    pub ssid: String,
}

fn serialize_pmkid<S: serde::Serializer>(pmkid: &Pmkid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(pmkid))
}

impl PmkidRecord {
    /// `pmkid*bssid*station*ssid` followed by a newline.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for PmkidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}*{}*{}*{}",
            hex::encode(self.pmkid),
            self.bssid.to_hex(),
            self.station.to_hex(),
            self.ssid
        )
    }
}

/// Parses the body of an RSN element and returns the first PMKID, if the
/// capability bit allows one and the list is non-empty.
pub fn parse_rsn_pmkid(rsn: &[u8]) -> Option<Pmkid> {
    let mut cur = ByteCursor::new(rsn);

    cur.read_u16_le()?; // version
    cur.skip(4)?; // group cipher suite

    let pairwise_count = cur.read_u16_le()? as usize;
    cur.skip(pairwise_count * 4)?;

    let akm_count = cur.read_u16_le()? as usize;
    cur.skip(akm_count * 4)?;

    let capabilities = cur.read_u16_le()?;
    if capabilities & RSN_CAP_PMKID == 0 {
        return None;
    }

    let pmkid_count = cur.read_u16_le()?;
    if pmkid_count == 0 {
        return None;
    }

    cur.read_array::<PMKID_LEN>()
}

/// Looks for a PMKID in an association or reassociation request.
///
/// The SSID is taken from the frame when it carries one, otherwise from
/// `fallback_ssid`, otherwise `"Unknown"`.
pub fn extract_pmkid(frame: &[u8], header: &FrameHeader, fallback_ssid: Option<&str>) -> Option<PmkidRecord> {
    if !matches!(
        header.kind,
        FrameKind::AssociationRequest | FrameKind::ReassociationRequest
    ) {
        return None;
    }

    let rsn = parser::find_element(frame, header.ie_offset, TAG_RSN)?;
    let pmkid = parse_rsn_pmkid(rsn)?;

    let ssid = parser::extract_ssid(frame, header)
        .filter(|s| !s.is_empty())
        .or_else(|| fallback_ssid.filter(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());

    Some(PmkidRecord {
        bssid: header.bssid,
        station: header.transmitter,
        pmkid,
        ssid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsn_body(capabilities: u16, pmkids: &[[u8; 16]]) -> Vec<u8> {
        let mut body = vec![0x01, 0x00]; // version 1
        body.extend_from_slice(&[0x00, 0x0f, 0xac, 0x04]); // group CCMP
        body.extend_from_slice(&[0x01, 0x00, 0x00, 0x0f, 0xac, 0x04]); // 1 pairwise
        body.extend_from_slice(&[0x01, 0x00, 0x00, 0x0f, 0xac, 0x02]); // 1 AKM (PSK)
        body.extend_from_slice(&capabilities.to_le_bytes());
        body.extend_from_slice(&(pmkids.len() as u16).to_le_bytes());
        for p in pmkids {
            body.extend_from_slice(p);
        }
        body
    }

    #[test]
    fn test_pmkid_returned_when_capable() {
        let pmkid = [0x5a; 16];
        assert_eq!(parse_rsn_pmkid(&rsn_body(0x8000, &[pmkid])), Some(pmkid));
    }

    #[test]
    fn test_capability_clear_means_no_pmkid() {
        let mut body = rsn_body(0x000c, &[[0x5a; 16]]);
        body.extend_from_slice(&[0xff; 32]);
        assert_eq!(parse_rsn_pmkid(&body), None);
    }

    #[test]
    fn test_zero_count_and_truncation() {
        assert_eq!(parse_rsn_pmkid(&rsn_body(0x8000, &[])), None);

        let full = rsn_body(0x8000, &[[0x01; 16]]);
        for cut in 0..full.len() {
            assert_eq!(parse_rsn_pmkid(&full[..cut]), None, "cut at {}", cut);
        }
    }

    #[test]
    fn test_huge_suite_count_does_not_panic() {
        let mut body = vec![0x01, 0x00, 0x00, 0x0f, 0xac, 0x04];
        body.extend_from_slice(&[0xff, 0xff]);
        assert_eq!(parse_rsn_pmkid(&body), None);
    }

    #[test]
    fn test_line_format() {
        let record = PmkidRecord {
            bssid: MacAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            station: MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            pmkid: [0x01; 16],
            ssid: "HomeNet".to_string(),
        };
        assert_eq!(
            record.to_line(),
            "01010101010101010101010101010101*aabbccddeeff*001122334455*HomeNet\n"
        );
    }
}
