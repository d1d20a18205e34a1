// parser tests against hand-built frames, no radio needed

mod common;

use common::*;
use handshake_sniffer::handshake::{key_information, message_number};
use handshake_sniffer::parser::{classify, parse_beacon, strip_radiotap, FrameKind};
use handshake_sniffer::rsn::{extract_pmkid, parse_rsn_pmkid};

#[test]
fn test_short_frames_rejected() {
    for len in 0..24 {
        assert!(classify(&vec![0x80; len]).is_none(), "len {}", len);
    }
}

#[test]
fn test_beacon_fields() {
    let frame = beacon(AP, "CoffeeShop", 11);
    let header = classify(&frame).unwrap();
    assert_eq!(header.kind, FrameKind::Beacon);
    assert_eq!(header.bssid, AP);

    let info = parse_beacon(&frame, &header);
    assert_eq!(info.ssid.as_deref(), Some("CoffeeShop"));
    assert_eq!(info.channel, Some(11));
}

#[test]
fn test_eapol_messages_in_both_directions() {
    for (bit, expected) in [(0x0001, 1), (0x0002, 2), (0x0004, 3), (0x0008, 4)] {
        let frame = eapol(AP, CLIENT, bit);
        let header = classify(&frame).unwrap();
        assert_eq!(header.kind, FrameKind::Eapol);
        assert_eq!(header.bssid, AP);
        assert_eq!(header.station(), Some(CLIENT));
        assert_eq!(key_information(&frame, &header), Some(bit));
        assert_eq!(message_number(bit), Some(expected));
    }
}

#[test]
fn test_qos_eapol_uses_longer_header() {
    let mut frame = eapol(AP, CLIENT, 0x0002);
    frame[0] = 0x88;
    frame.splice(24..24, [0x00, 0x00]);
    let header = classify(&frame).unwrap();
    assert!(header.has_qos());
    assert_eq!(header.kind, FrameKind::Eapol);
    assert_eq!(key_information(&frame, &header), Some(0x0002));
}

#[test]
fn test_truncated_eapol_has_no_key_information() {
    let mut frame = eapol(AP, CLIENT, 0x0001);
    frame.truncate(24 + 8 + 5 + 1);
    let header = classify(&frame).unwrap();
    assert_eq!(header.kind, FrameKind::Eapol);
    assert_eq!(key_information(&frame, &header), None);
}

#[test]
fn test_pmkid_behind_several_suites() {
    let pmkid = [0xC3; 16];
    let mut rsn = vec![0x01, 0x00, 0x00, 0x0F, 0xAC, 0x04];
    rsn.extend_from_slice(&[0x02, 0x00]);
    rsn.extend_from_slice(&[0x00, 0x0F, 0xAC, 0x04, 0x00, 0x0F, 0xAC, 0x02]);
    rsn.extend_from_slice(&[0x02, 0x00]);
    rsn.extend_from_slice(&[0x00, 0x0F, 0xAC, 0x02, 0x00, 0x0F, 0xAC, 0x08]);
    rsn.extend_from_slice(&[0x0C, 0x80]);
    rsn.extend_from_slice(&[0x01, 0x00]);
    rsn.extend_from_slice(&pmkid);
    assert_eq!(parse_rsn_pmkid(&rsn), Some(pmkid));

    // capability bit cleared
    let mut no_cap = rsn.clone();
    let caps = no_cap.len() - 20;
    no_cap[caps + 1] = 0x00;
    assert_eq!(parse_rsn_pmkid(&no_cap), None);

    // PMKID list cut short
    assert_eq!(parse_rsn_pmkid(&rsn[..rsn.len() - 1]), None);
}

#[test]
fn test_reassociation_request_pmkid() {
    let mut frame = association_request(AP, CLIENT, Some("Lab"), &rsn_with_pmkid([0x11; 16]));
    frame[0] = 0x20;
    // reassociation adds the current AP address to the fixed fields
    frame.splice(28..28, AP.as_bytes().iter().copied());
    let header = classify(&frame).unwrap();
    assert_eq!(header.kind, FrameKind::ReassociationRequest);

    let record = extract_pmkid(&frame, &header, None).unwrap();
    assert_eq!(record.ssid, "Lab");
    assert_eq!(record.station, CLIENT);
    assert_eq!(record.pmkid, [0x11; 16]);
}

#[test]
fn test_radiotap_with_fcs_is_trimmed() {
    // version, pad, len 9, present = flags, flags = FCS at end
    let mut packet = vec![0x00, 0x00, 0x09, 0x00, 0x02, 0x00, 0x00, 0x00, 0x10];
    let frame = beacon(AP, "x", 1);
    packet.extend_from_slice(&frame);
    packet.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

    let (info, bare) = strip_radiotap(&packet).unwrap();
    assert_eq!(info.header_len, 9);
    assert!(info.fcs_at_end);
    assert_eq!(bare, frame.as_slice());
}

#[test]
fn test_element_overrun_before_rsn_yields_no_pmkid() {
    let mut frame = association_request(AP, CLIENT, Some("Lab"), &rsn_with_pmkid([0x44; 16]));
    // SSID element claims more bytes than the frame holds
    frame[29] = 0xFF;
    let header = classify(&frame).unwrap();
    assert_eq!(header.kind, FrameKind::AssociationRequest);
    assert!(extract_pmkid(&frame, &header, Some("Lab")).is_none());
}
