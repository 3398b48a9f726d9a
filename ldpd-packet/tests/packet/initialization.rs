use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use ldpd_packet::*;

use super::{decode_cxt, decode_msg, test_decode_msg, test_encode_msg};

static INIT_MSG: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00, 0x05, 0x05, 0x00, 0x00,
            0x0e, 0x00, 0x01, 0x00, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02,
            0x02, 0x02, 0x00, 0x00,
        ],
        InitMsg {
            msg_id: 5,
            params: TlvCommonSessParams {
                version: 1,
                keepalive_time: 180,
                flags: InitFlags::empty(),
                pvlim: 0,
                max_pdu_len: 0,
                lsr_id: Ipv4Addr::new(2, 2, 2, 2),
                lspace_id: 0,
            },
        }
        .into(),
    )
});

#[test]
fn test_encode_init() {
    let (ref bytes, ref msg) = *INIT_MSG;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_init() {
    let (ref bytes, ref msg) = *INIT_MSG;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}

// A zero keepalive time is invalid on the wire.
#[test]
fn test_decode_init_bad_keepalive() {
    let bytes = vec![
        0x02, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00, 0x05, 0x05, 0x00, 0x00,
        0x0e, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02,
        0x02, 0x02, 0x00, 0x00,
    ];
    assert!(matches!(
        decode_msg(&decode_cxt(None), &bytes),
        Err(DecodeError::BadKeepaliveTime(..))
    ));
}

// Reserved flag bits must be clear.
#[test]
fn test_decode_init_unknown_flags() {
    let bytes = vec![
        0x02, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00, 0x05, 0x05, 0x00, 0x00,
        0x0e, 0x00, 0x01, 0x00, 0xb4, 0x01, 0x00, 0x00, 0x00, 0x02, 0x02,
        0x02, 0x02, 0x00, 0x00,
    ];
    assert!(matches!(
        decode_msg(&decode_cxt(None), &bytes),
        Err(DecodeError::InvalidTlvValue(..))
    ));
}
