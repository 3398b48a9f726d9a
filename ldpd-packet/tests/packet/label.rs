use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use ipnetwork::Ipv4Network;
use ldpd_packet::*;
use ldpd_utils::l2vpn::{PwStatus, PwType};
use ldpd_utils::mpls::Label;

use super::{decode_cxt, decode_msg, test_decode_msg, test_encode_msg};

static MAPPING_PREFIX: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x04, 0x00, 0x00, 0x17, 0x00, 0x00, 0x00, 0x09, 0x01, 0x00, 0x00,
            0x07, 0x02, 0x00, 0x01, 0x18, 0xac, 0x10, 0x01, 0x02, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00, 0x64,
        ],
        LabelMsg {
            msg_id: 9,
            msg_type: LabelMessageType::LabelMapping,
            fec: TlvFec(vec![FecElem::Prefix(
                Ipv4Network::new(Ipv4Addr::new(172, 16, 1, 0), 24).unwrap(),
            )]),
            label: Some(TlvLabel(Label::new(100))),
            request_id: None,
            pw_status: None,
        }
        .into(),
    )
});

static MAPPING_PWID: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x04, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x02, 0x01, 0x00, 0x00,
            0x10, 0x80, 0x80, 0x05, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x64, 0x01, 0x04, 0x05, 0xdc, 0x02, 0x00, 0x00, 0x04, 0x00,
            0x00, 0x01, 0x2c, 0x09, 0x6a, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00,
        ],
        LabelMsg {
            msg_id: 2,
            msg_type: LabelMessageType::LabelMapping,
            fec: TlvFec(vec![FecElem::Pwid(FecElemPwid {
                pw_type: PwType::Ethernet,
                cword: true,
                group_id: 0,
                pwid: Some(100),
                ifmtu: Some(1500),
            })]),
            label: Some(TlvLabel(Label::new(300))),
            request_id: None,
            pw_status: Some(TlvPwStatus(PwStatus(0))),
        }
        .into(),
    )
});

static REQUEST: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x04, 0x01, 0x00, 0x0d, 0x00, 0x00, 0x00, 0x06, 0x01, 0x00, 0x00,
            0x05, 0x02, 0x00, 0x01, 0x08, 0x0a,
        ],
        LabelMsg {
            msg_id: 6,
            msg_type: LabelMessageType::LabelRequest,
            fec: TlvFec(vec![FecElem::Prefix(
                Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap(),
            )]),
            label: None,
            request_id: None,
            pw_status: None,
        }
        .into(),
    )
});

static WITHDRAW_WILDCARD: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x04, 0x02, 0x00, 0x09, 0x00, 0x00, 0x00, 0x04, 0x01, 0x00, 0x00,
            0x01, 0x01,
        ],
        LabelMsg {
            msg_id: 4,
            msg_type: LabelMessageType::LabelWithdraw,
            fec: TlvFec(vec![FecElem::Wildcard]),
            label: None,
            request_id: None,
            pw_status: None,
        }
        .into(),
    )
});

#[test]
fn test_encode_mapping_prefix() {
    let (ref bytes, ref msg) = *MAPPING_PREFIX;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_mapping_prefix() {
    let (ref bytes, ref msg) = *MAPPING_PREFIX;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}

#[test]
fn test_encode_mapping_pwid() {
    let (ref bytes, ref msg) = *MAPPING_PWID;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_mapping_pwid() {
    let (ref bytes, ref msg) = *MAPPING_PWID;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}

#[test]
fn test_encode_request() {
    let (ref bytes, ref msg) = *REQUEST;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_request() {
    let (ref bytes, ref msg) = *REQUEST;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}

#[test]
fn test_encode_withdraw_wildcard() {
    let (ref bytes, ref msg) = *WITHDRAW_WILDCARD;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_withdraw_wildcard() {
    let (ref bytes, ref msg) = *WITHDRAW_WILDCARD;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}

// The wildcard FEC element is only valid in Label Withdraw and Label
// Release messages.
#[test]
fn test_decode_mapping_wildcard() {
    let bytes = vec![
        0x04, 0x00, 0x00, 0x11, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00,
        0x01, 0x01, 0x02, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x64,
    ];
    assert!(matches!(
        decode_msg(&decode_cxt(None), &bytes),
        Err(DecodeError::UnknownFec(..))
    ));
}

// A label mapping without a label TLV is missing mandatory parameters.
#[test]
fn test_decode_mapping_no_label() {
    let bytes = vec![
        0x04, 0x00, 0x00, 0x0d, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00,
        0x05, 0x02, 0x00, 0x01, 0x08, 0x0a,
    ];
    assert!(matches!(
        decode_msg(&decode_cxt(None), &bytes),
        Err(DecodeError::MissingMsgParams(_, TlvType::GenericLabel))
    ));
}

// IPv6 prefix FEC elements are refused at the decoder.
#[test]
fn test_decode_mapping_ipv6_fec() {
    let bytes = vec![
        0x04, 0x00, 0x00, 0x17, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00,
        0x07, 0x02, 0x00, 0x02, 0x18, 0x20, 0x01, 0x0d, 0x02, 0x00, 0x00,
        0x04, 0x00, 0x00, 0x00, 0x64,
    ];
    assert!(matches!(
        decode_msg(&decode_cxt(None), &bytes),
        Err(DecodeError::UnsupportedAf(_, 2))
    ));
}
