use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use ldpd_packet::*;

use super::{decode_cxt, decode_msg, test_decode_msg, test_encode_msg};

static ADDRESS_MSG: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x03, 0x00, 0x00, 0x12, 0x00, 0x00, 0x00, 0x07, 0x01, 0x01, 0x00,
            0x0a, 0x00, 0x01, 0x0a, 0x00, 0x01, 0x01, 0xac, 0x10, 0x01, 0x01,
        ],
        AddressMsg {
            msg_id: 7,
            msg_type: AddressMessageType::Address,
            addr_list: TlvAddressList(BTreeSet::from([
                Ipv4Addr::new(10, 0, 1, 1),
                Ipv4Addr::new(172, 16, 1, 1),
            ])),
        }
        .into(),
    )
});

static ADDRESS_WITHDRAW_MSG: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x03, 0x01, 0x00, 0x0e, 0x00, 0x00, 0x00, 0x08, 0x01, 0x01, 0x00,
            0x06, 0x00, 0x01, 0x0a, 0x00, 0x01, 0x01,
        ],
        AddressMsg {
            msg_id: 8,
            msg_type: AddressMessageType::AddressWithdraw,
            addr_list: TlvAddressList(BTreeSet::from([Ipv4Addr::new(
                10, 0, 1, 1,
            )])),
        }
        .into(),
    )
});

#[test]
fn test_encode_address() {
    let (ref bytes, ref msg) = *ADDRESS_MSG;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_address() {
    let (ref bytes, ref msg) = *ADDRESS_MSG;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}

#[test]
fn test_encode_address_withdraw() {
    let (ref bytes, ref msg) = *ADDRESS_WITHDRAW_MSG;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_address_withdraw() {
    let (ref bytes, ref msg) = *ADDRESS_WITHDRAW_MSG;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}

// IPv6 address lists are refused at the decoder.
#[test]
fn test_decode_address_ipv6() {
    let bytes = vec![
        0x03, 0x00, 0x00, 0x1a, 0x00, 0x00, 0x00, 0x09, 0x01, 0x01, 0x00,
        0x12, 0x00, 0x02, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
    ];
    assert!(matches!(
        decode_msg(&decode_cxt(None), &bytes),
        Err(DecodeError::UnsupportedAf(_, 2))
    ));
}
