//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ldpd_utils::bytes::{BytesExt, BytesMutExt};
use ldpd_utils::ip::AddressFamily;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::DecodeCxt;
use crate::error::{DecodeError, DecodeResult};
use crate::message::{
    AddressMessageType, Message, MessageDecodeInfo, MessageKind, MessageType,
};
use crate::tlv::{self, TlvDecodeInfo, TlvKind, TlvType};

//
// Address messages.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |0|   Address (0x0300)          |      Message Length           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Message ID                                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// |                     Address List TLV                          |
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Optional Parameters                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// The Address Withdraw message (0x0301) shares the same layout.
//
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddressMsg {
    pub msg_id: u32,
    pub msg_type: AddressMessageType,
    pub addr_list: TlvAddressList,
}

// Address List TLV.
//
// Only the IPv4 address family is accepted; IPv6 lists are rejected with an
// Unsupported Address Family status.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TlvAddressList(pub BTreeSet<Ipv4Addr>);

// ===== impl AddressMsg =====

impl MessageKind for AddressMsg {
    const U_BIT: bool = false;

    fn msg_id(&self) -> u32 {
        self.msg_id
    }

    fn msg_type(&self) -> MessageType {
        self.msg_type.into()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        // Encode mandatory TLV(s).
        self.addr_list.encode(self.msg_type(), buf);
    }

    fn decode_body(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        msgi: &mut MessageDecodeInfo,
    ) -> DecodeResult<Message> {
        // Decode mandatory TLV(s).
        let tlvi = tlv::decode_tlv_hdr(buf, msgi)?;
        if tlvi.tlv_type != TlvType::AddrList as u16 {
            return Err(DecodeError::MissingMsgParams(
                msgi.clone(),
                TlvType::AddrList,
            ));
        }
        let addr_list = TlvAddressList::decode_value(buf, cxt, &tlvi)?;

        // Create new message.
        let mut msg = AddressMsg {
            msg_type: AddressMessageType::from_u16(msgi.msg_type).unwrap(),
            msg_id: msgi.msg_id,
            addr_list,
        };

        // Decode optional TLV(s).
        msg.decode_opt_tlvs(buf, cxt, msgi)?;

        Ok(Message::Address(msg))
    }
}

// ===== impl TlvAddressList =====

impl TlvKind for TlvAddressList {
    const TLV_TYPE: TlvType = TlvType::AddrList;
    const U_BIT: bool = false;
    const F_BIT: bool = false;

    fn encode_value(&self, buf: &mut BytesMut) {
        buf.put_u16(AddressFamily::Ipv4 as u16);
        for addr in &self.0 {
            buf.put_ipv4(addr);
        }
    }

    fn decode_value(
        buf: &mut Bytes,
        _cxt: &DecodeCxt,
        tlvi: &TlvDecodeInfo,
    ) -> DecodeResult<Self> {
        if tlvi.tlv_len < 2 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }

        // Parse address family identifier.
        let af = buf.get_u16();
        match AddressFamily::from_u16(af) {
            Some(AddressFamily::Ipv4) => (),
            _ => return Err(DecodeError::UnsupportedAf(tlvi.clone(), af)),
        }

        // Parse list of addresses.
        let mut addr_list = BTreeSet::new();
        let mut tlv_rlen = tlvi.tlv_len - 2;
        while tlv_rlen > 0 {
            if tlv_rlen < 4 {
                return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
            }
            let addr = buf.get_ipv4();
            addr_list.insert(addr);
            tlv_rlen -= 4;
        }

        Ok(TlvAddressList(addr_list))
    }
}
