use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use ldpd_packet::*;

use super::{decode_cxt, test_decode_pdu, test_encode_pdu};

static KEEPALIVE_PDU: Lazy<(Vec<u8>, Pdu)> = Lazy::new(|| {
    let mut pdu = Pdu::new(Ipv4Addr::new(1, 1, 1, 1), 0);
    pdu.messages.push_back(KeepaliveMsg { msg_id: 1 }.into());
    (
        vec![
            0x00, 0x01, 0x00, 0x12, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x02,
            0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01,
        ],
        pdu,
    )
});

static MULTI_MSG_PDU: Lazy<(Vec<u8>, Pdu)> = Lazy::new(|| {
    let mut pdu = Pdu::new(Ipv4Addr::new(1, 1, 1, 1), 0);
    pdu.messages.push_back(KeepaliveMsg { msg_id: 1 }.into());
    pdu.messages.push_back(KeepaliveMsg { msg_id: 2 }.into());
    (
        vec![
            0x00, 0x01, 0x00, 0x1e, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x02,
            0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x02, 0x01, 0x00, 0x04,
            0x00, 0x00, 0x00, 0x02,
        ],
        pdu,
    )
});

#[test]
fn test_encode_pdu_single() {
    let (ref bytes, ref pdu) = *KEEPALIVE_PDU;
    test_encode_pdu(bytes, pdu);
}

#[test]
fn test_decode_pdu_single() {
    let (ref bytes, ref pdu) = *KEEPALIVE_PDU;
    test_decode_pdu(&decode_cxt(None), bytes, pdu);
}

#[test]
fn test_encode_pdu_multi() {
    let (ref bytes, ref pdu) = *MULTI_MSG_PDU;
    test_encode_pdu(bytes, pdu);
}

#[test]
fn test_decode_pdu_multi() {
    let (ref bytes, ref pdu) = *MULTI_MSG_PDU;
    test_decode_pdu(&decode_cxt(None), bytes, pdu);
}

// An unsupported protocol version must be refused.
#[test]
fn test_decode_pdu_bad_version() {
    let bytes = vec![
        0x00, 0x02, 0x00, 0x12, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x02,
        0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01,
    ];
    assert!(matches!(
        Pdu::decode(&bytes, &decode_cxt(None)),
        Err(DecodeError::InvalidVersion(2))
    ));
}

// A truncated buffer must not decode.
#[test]
fn test_decode_pdu_incomplete() {
    let (ref bytes, _) = *KEEPALIVE_PDU;
    assert!(matches!(
        Pdu::get_pdu_size(&bytes[..bytes.len() - 1], &decode_cxt(None)),
        Err(DecodeError::IncompletePdu)
    ));
}

// Unknown message types: refused with the U-bit clear, skipped with it set.
#[test]
fn test_decode_pdu_unknown_message() {
    let bytes = vec![
        0x00, 0x01, 0x00, 0x12, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01,
    ];
    assert!(matches!(
        Pdu::decode(&bytes, &decode_cxt(None)),
        Err(DecodeError::UnknownMessage(_, 0x0005))
    ));

    let bytes = vec![
        0x00, 0x01, 0x00, 0x12, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x80,
        0x05, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01,
    ];
    let pdu = Pdu::decode(&bytes, &decode_cxt(None)).unwrap();
    assert!(pdu.messages.is_empty());
}

// Messages are split into multiple PDUs when the maximum PDU length would
// be exceeded.
#[test]
fn test_encode_pdu_split() {
    let mut pdu = Pdu::new(Ipv4Addr::new(1, 1, 1, 1), 0);
    for msg_id in 0..8 {
        pdu.messages.push_back(KeepaliveMsg { msg_id }.into());
    }

    // Room for the header plus two keepalives per PDU.
    let buf = pdu.encode(Pdu::HDR_SIZE + 24);
    assert_eq!(buf.len(), 4 * (Pdu::HDR_SIZE as usize + 24));

    // Each emitted PDU must carry its own valid length field.
    let mut offset = 0;
    while offset < buf.len() {
        let pdu_len =
            u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        assert_eq!(pdu_len, Pdu::HDR_MIN_LEN as usize + 24);
        offset += pdu_len + Pdu::HDR_DEAD_LEN as usize;
    }
}
