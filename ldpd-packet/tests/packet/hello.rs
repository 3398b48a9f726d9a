use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use ldpd_packet::*;

use super::{decode_cxt, decode_msg, test_decode_msg, test_encode_msg};

static LINK_HELLO: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x01, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x01, 0x04, 0x00, 0x00,
            0x04, 0x00, 0x0f, 0x00, 0x00, 0x04, 0x01, 0x00, 0x04, 0x01, 0x01,
            0x01, 0x01,
        ],
        HelloMsg {
            msg_id: 1,
            params: TlvCommonHelloParams {
                holdtime: 15,
                flags: HelloFlags::empty(),
            },
            ipv4_addr: Some(TlvIpv4TransAddr(Ipv4Addr::new(1, 1, 1, 1))),
            ipv6_addr: None,
        }
        .into(),
    )
});

static TARGETED_HELLO: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x01, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x00,
            0x04, 0x00, 0x2d, 0xc0, 0x00, 0x04, 0x01, 0x00, 0x04, 0x02, 0x02,
            0x02, 0x02,
        ],
        HelloMsg {
            msg_id: 2,
            params: TlvCommonHelloParams {
                holdtime: 45,
                flags: HelloFlags::TARGETED | HelloFlags::REQ_TARGETED,
            },
            ipv4_addr: Some(TlvIpv4TransAddr(Ipv4Addr::new(2, 2, 2, 2))),
            ipv6_addr: None,
        }
        .into(),
    )
});

#[test]
fn test_encode_link_hello() {
    let (ref bytes, ref msg) = *LINK_HELLO;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_link_hello() {
    let (ref bytes, ref msg) = *LINK_HELLO;
    test_decode_msg(&decode_cxt(Some(true)), bytes, msg);
}

#[test]
fn test_encode_targeted_hello() {
    let (ref bytes, ref msg) = *TARGETED_HELLO;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_targeted_hello() {
    let (ref bytes, ref msg) = *TARGETED_HELLO;
    test_decode_msg(&decode_cxt(Some(false)), bytes, msg);
}

// A targeted hello arriving on the multicast socket must be refused, and
// the same goes for a link hello arriving as unicast.
#[test]
fn test_decode_hello_wrong_transport() {
    let (ref bytes, _) = *TARGETED_HELLO;
    assert!(matches!(
        decode_msg(&decode_cxt(Some(true)), bytes),
        Err(DecodeError::McastTHello(..))
    ));

    let (ref bytes, _) = *LINK_HELLO;
    assert!(matches!(
        decode_msg(&decode_cxt(Some(false)), bytes),
        Err(DecodeError::UcastLHello(..))
    ));
}

// The transport address must be a usable unicast address.
#[test]
fn test_decode_hello_bad_transport_addr() {
    let bytes = vec![
        0x01, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x03, 0x04, 0x00, 0x00,
        0x04, 0x00, 0x0f, 0x00, 0x00, 0x04, 0x01, 0x00, 0x04, 0xe0, 0x00,
        0x00, 0x02,
    ];
    assert!(matches!(
        decode_msg(&decode_cxt(Some(true)), &bytes),
        Err(DecodeError::InvalidTransportAddr(..))
    ));
}
