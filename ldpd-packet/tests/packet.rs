//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#[path = "packet/address.rs"]
mod address;
#[path = "packet/hello.rs"]
mod hello;
#[path = "packet/initialization.rs"]
mod initialization;
#[path = "packet/keepalive.rs"]
mod keepalive;
#[path = "packet/label.rs"]
mod label;
#[path = "packet/notification.rs"]
mod notification;
#[path = "packet/pdu.rs"]
mod pdu;

use std::net::{IpAddr, Ipv4Addr};

use bytes::{Bytes, BytesMut};
use ldpd_packet::*;

fn decode_cxt(multicast: Option<bool>) -> DecodeCxt {
    DecodeCxt {
        pkt_info: PacketInfo {
            src_addr: IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            multicast,
        },
        pdu_max_len: Pdu::DFLT_MAX_LEN,
        validate_pdu_hdr: None,
    }
}

//
// Helper functions.
//

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    let mut bytes_actual = BytesMut::with_capacity(1500);
    msg.encode(&mut bytes_actual);
    assert_eq!(bytes_expected, &bytes_actual[..]);
}

fn test_decode_msg(cxt: &DecodeCxt, bytes: &[u8], msg_expected: &Message) {
    let msg_actual = decode_msg(cxt, bytes).unwrap().unwrap();
    assert_eq!(*msg_expected, msg_actual);
}

fn decode_msg(
    cxt: &DecodeCxt,
    bytes: &[u8],
) -> DecodeResult<Option<Message>> {
    let mut buf = Bytes::copy_from_slice(bytes);

    // Create fake PDU decode information, required to decode LDP messages.
    let len = buf.len() as u16;
    let mut pdui = PduDecodeInfo {
        version: Pdu::VERSION,
        lsr_id: Ipv4Addr::new(1, 1, 1, 1),
        lspace_id: 0,
        pdu_len: len,
        pdu_rlen: len,
    };

    let msg = Message::decode(&mut buf, cxt, &mut pdui)?;
    assert_eq!(pdui.pdu_rlen, 0);
    Ok(msg)
}

fn test_encode_pdu(bytes_expected: &[u8], pdu: &Pdu) {
    let bytes_actual = pdu.encode(Pdu::DFLT_MAX_LEN);
    assert_eq!(bytes_expected, &bytes_actual[..]);
}

fn test_decode_pdu(cxt: &DecodeCxt, bytes: &[u8], pdu_expected: &Pdu) {
    let pdu_size = Pdu::get_pdu_size(bytes, cxt).unwrap();
    assert_eq!(pdu_size, bytes.len());
    let pdu_actual = Pdu::decode(bytes, cxt).unwrap();
    assert_eq!(*pdu_expected, pdu_actual);
}
