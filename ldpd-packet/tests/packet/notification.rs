use std::sync::LazyLock as Lazy;

use ldpd_packet::*;
use ldpd_utils::l2vpn::{PwStatus, PwType};

use super::{decode_cxt, test_decode_msg, test_encode_msg};

static SHUTDOWN: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x00, 0x12, 0x00, 0x00, 0x00, 0x0b, 0x03, 0x00, 0x00,
            0x0a, 0x80, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ],
        NotifMsg {
            msg_id: 11,
            status: TlvStatus {
                status_code: StatusCode::Shutdown.encode(false),
                msg_id: 0,
                msg_type: 0,
            },
            pw_status: None,
            fec: None,
        }
        .into(),
    )
});

static PW_STATUS: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x00, 0x2a, 0x00, 0x00, 0x00, 0x0c, 0x03, 0x00, 0x00,
            0x0a, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x09, 0x6a, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00,
            0x0c, 0x80, 0x00, 0x05, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x64,
        ],
        NotifMsg {
            msg_id: 12,
            status: TlvStatus {
                status_code: StatusCode::PwStatus as u32,
                msg_id: 0,
                msg_type: 0,
            },
            pw_status: Some(TlvPwStatus(PwStatus(
                PwStatus::NOT_FORWARDING,
            ))),
            fec: Some(TlvFec(vec![FecElem::Pwid(FecElemPwid {
                pw_type: PwType::Ethernet,
                cword: false,
                group_id: 0,
                pwid: Some(100),
                ifmtu: None,
            })])),
        }
        .into(),
    )
});

#[test]
fn test_encode_shutdown() {
    let (ref bytes, ref msg) = *SHUTDOWN;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_shutdown() {
    let (ref bytes, ref msg) = *SHUTDOWN;
    test_decode_msg(&decode_cxt(None), bytes, msg);

    let Message::Notification(msg) = msg else {
        unreachable!();
    };
    assert!(msg.is_fatal_error());
    assert_eq!(msg.status_code(), Some(StatusCode::Shutdown));
}

#[test]
fn test_encode_pw_status() {
    let (ref bytes, ref msg) = *PW_STATUS;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_pw_status() {
    let (ref bytes, ref msg) = *PW_STATUS;
    test_decode_msg(&decode_cxt(None), bytes, msg);

    let Message::Notification(msg) = msg else {
        unreachable!();
    };
    assert!(!msg.is_fatal_error());
    assert_eq!(msg.status_code(), Some(StatusCode::PwStatus));
}
