//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::Ipv4Network;
use ldpd_utils::ip::{AddressFamily, Ipv4AddrExt, Ipv4NetworkExt};
use ldpd_utils::l2vpn::{PwStatus, PwType};
use ldpd_utils::mpls::Label;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::DecodeCxt;
use crate::error::{DecodeError, DecodeResult};
use crate::message::{
    LabelMessageType, Message, MessageDecodeInfo, MessageKind, MessageType,
};
use crate::tlv::{self, TlvDecodeInfo, TlvKind, TlvType};

//
// Label messages.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |0|   Label Mapping (0x0400)    |      Message Length           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Message ID                                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     FEC TLV                                   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Label TLV                                 |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Optional Parameters                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// Label Request (0x0401), Label Withdraw (0x0402), Label Release (0x0403)
// and Label Abort Request (0x0404) share the same layout, with the Label TLV
// being optional (Withdraw/Release) or absent (Request), and the Abort
// Request carrying a mandatory Label Request Message ID TLV instead.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct LabelMsg {
    pub msg_id: u32,
    pub msg_type: LabelMessageType,
    pub fec: TlvFec,
    pub label: Option<TlvLabel>,
    pub request_id: Option<TlvLabelRequestId>,
    pub pw_status: Option<TlvPwStatus>,
}

//
// FEC TLV.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |0|0| FEC (0x0100)              |      Length                   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        FEC Element 1                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// ~                                                               ~
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        FEC Element n                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TlvFec(pub Vec<FecElem>);

// Forwarding Equivalence Class (FEC) Type Name Space.
//
// IANA registry:
// https://www.iana.org/assignments/ldp-namespaces/ldp-namespaces.xhtml#fec-type
pub const FEC_ELM_WILDCARD: u8 = 0x01;
pub const FEC_ELM_PREFIX: u8 = 0x02;
pub const FEC_ELM_PWID: u8 = 0x80;

// Control-word flag in the PW type field of a PWid FEC element.
pub const CONTROL_WORD_FLAG: u16 = 0x8000;

// PWid interface parameter sub-TLVs (RFC 4447, section 5.5). The sub-TLV
// length octet covers the whole sub-TLV, header included.
pub const SUBTLV_HDR_SIZE: u8 = 2;
pub const SUBTLV_IFMTU: u8 = 0x01;
pub const SUBTLV_IFMTU_SIZE: u8 = 4;

//
// Prefix FEC Element value encoding:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Prefix (2)   |     Address Family            |     PreLen    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Prefix                                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// PWid FEC Element value encoding:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  PWid (0x80)  |C|         PW type             |PW info Length |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Group ID                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          PW ID                                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Interface Parameter Sub-TLVs                   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FecElem {
    Wildcard,
    Prefix(Ipv4Network),
    Pwid(FecElemPwid),
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FecElemPwid {
    pub pw_type: PwType,
    pub cword: bool,
    pub group_id: u32,
    pub pwid: Option<u32>,
    pub ifmtu: Option<u16>,
}

// Generic Label TLV.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TlvLabel(pub Label);

// Label Request Message ID TLV.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TlvLabelRequestId(pub u32);

// PW Status TLV (RFC 4447, section 5.4.2).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TlvPwStatus(pub PwStatus);

// ===== impl LabelMsg =====

impl MessageKind for LabelMsg {
    const U_BIT: bool = false;

    fn msg_id(&self) -> u32 {
        self.msg_id
    }

    fn msg_type(&self) -> MessageType {
        self.msg_type.into()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        // Encode mandatory TLV(s).
        self.fec.encode(self.msg_type(), buf);

        // Encode optional TLV(s).
        if let Some(tlv) = &self.label {
            tlv.encode(self.msg_type(), buf);
        }
        if let Some(tlv) = &self.request_id {
            tlv.encode(self.msg_type(), buf);
        }
        if let Some(tlv) = &self.pw_status {
            tlv.encode(self.msg_type(), buf);
        }
    }

    fn decode_body(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        msgi: &mut MessageDecodeInfo,
    ) -> DecodeResult<Message> {
        // Decode mandatory FEC TLV (all label messages).
        let tlvi = tlv::decode_tlv_hdr(buf, msgi)?;
        if tlvi.tlv_type != TlvType::Fec as u16 {
            return Err(DecodeError::MissingMsgParams(
                msgi.clone(),
                TlvType::Fec,
            ));
        }
        let fec = TlvFec::decode_value(buf, cxt, &tlvi)?;

        // Create new message.
        let mut msg = LabelMsg {
            msg_type: LabelMessageType::from_u16(msgi.msg_type).unwrap(),
            msg_id: msgi.msg_id,
            fec,
            label: None,
            request_id: None,
            pw_status: None,
        };

        // Decode optional TLV(s).
        msg.decode_opt_tlvs(buf, cxt, msgi)?;

        // Additional sanity checks.
        for fec_elem in &msg.fec.0 {
            match fec_elem {
                // RFC 5036 - Section 3.4.1:
                // "To be processed correctly, the Wildcard FEC Element must
                // be the only FEC Element in the FEC TLV" and its use is
                // limited to Label Withdraw and Label Release messages.
                FecElem::Wildcard => match msg.msg_type {
                    LabelMessageType::LabelWithdraw
                    | LabelMessageType::LabelRelease => (),
                    _ => {
                        return Err(DecodeError::UnknownFec(
                            tlvi.clone(),
                            FEC_ELM_WILDCARD,
                        ));
                    }
                },
                // Explicit-null labels of the wrong address family and
                // reserved labels bound to pseudowires are invalid.
                FecElem::Prefix(_) => {
                    if let Some(label) = msg.get_label() {
                        if label.get() == Label::IPV6_EXPLICIT_NULL {
                            return Err(DecodeError::InvalidTlvValue(
                                tlvi.clone(),
                            ));
                        }
                    }
                }
                FecElem::Pwid(pwid) => {
                    if let Some(label) = msg.get_label() {
                        if label.is_reserved() {
                            return Err(DecodeError::InvalidTlvValue(
                                tlvi.clone(),
                            ));
                        }
                    }
                    // The PW ID may only be omitted in Label Withdraw and
                    // Label Release messages.
                    if pwid.pwid.is_none() {
                        match msg.msg_type {
                            LabelMessageType::LabelWithdraw
                            | LabelMessageType::LabelRelease => (),
                            _ => {
                                return Err(DecodeError::MissingMsgParams(
                                    msgi.clone(),
                                    TlvType::Fec,
                                ));
                            }
                        }
                    }
                }
            }
        }

        // RFC 5036 - Section 3.4.1:
        // "Note that this version of LDP supports the use of multiple FEC
        // Elements per FEC for the Label Mapping message only".
        if msg.msg_type != LabelMessageType::LabelMapping
            && msg.fec.0.len() > 1
        {
            return Err(DecodeError::InvalidTlvValue(tlvi));
        }

        // Check for missing message-specific mandatory parameters.
        if msg.msg_type == LabelMessageType::LabelMapping
            && msg.label.is_none()
        {
            return Err(DecodeError::MissingMsgParams(
                msgi.clone(),
                TlvType::GenericLabel,
            ));
        }
        if msg.msg_type == LabelMessageType::LabelAbortReq
            && msg.request_id.is_none()
        {
            return Err(DecodeError::MissingMsgParams(
                msgi.clone(),
                TlvType::LabelRequestId,
            ));
        }

        Ok(Message::Label(msg))
    }

    fn decode_opt_tlv(
        &mut self,
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        tlvi: &TlvDecodeInfo,
    ) -> DecodeResult<bool> {
        match tlvi.tlv_etype.unwrap() {
            TlvType::AtmLabel | TlvType::FrLabel => {
                return Err(DecodeError::InvalidTlvValue(tlvi.clone()));
            }
            TlvType::HopCount | TlvType::PathVector => {
                // Loop detection is unnecessary for frame-mode MPLS networks.
                buf.advance(tlvi.tlv_len as usize);
            }
            TlvType::GenericLabel => {
                self.label = Some(TlvLabel::decode_value(buf, cxt, tlvi)?);
            }
            TlvType::LabelRequestId => {
                self.request_id =
                    Some(TlvLabelRequestId::decode_value(buf, cxt, tlvi)?);
            }
            TlvType::PwStatus
                if self.msg_type == LabelMessageType::LabelMapping =>
            {
                self.pw_status =
                    Some(TlvPwStatus::decode_value(buf, cxt, tlvi)?);
            }
            _ => {
                return Ok(true);
            }
        };

        Ok(false)
    }
}

impl LabelMsg {
    pub fn get_label(&self) -> Option<Label> {
        self.label.as_ref().map(|label| label.0)
    }
}

// ===== impl TlvFec =====

impl TlvKind for TlvFec {
    const TLV_TYPE: TlvType = TlvType::Fec;
    const U_BIT: bool = false;
    const F_BIT: bool = false;

    fn encode_value(&self, buf: &mut BytesMut) {
        for fec_elem in &self.0 {
            fec_elem.encode(buf);
        }
    }

    fn decode_value(
        buf: &mut Bytes,
        _cxt: &DecodeCxt,
        tlvi: &TlvDecodeInfo,
    ) -> DecodeResult<Self> {
        // FEC list can't be empty.
        if tlvi.tlv_len < 1 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }

        let mut fec_elems: Vec<FecElem> = vec![];
        let mut tlv_rlen = tlvi.tlv_len;
        while tlv_rlen >= 1 {
            let fec_elem = FecElem::decode(buf, tlvi, &mut tlv_rlen)?;

            fec_elems.push(fec_elem);
        }

        Ok(Self(fec_elems))
    }
}

// ===== impl FecElem =====

impl FecElem {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            FecElem::Wildcard => {
                buf.put_u8(FEC_ELM_WILDCARD);
            }
            FecElem::Prefix(prefix) => {
                // FEC element type.
                buf.put_u8(FEC_ELM_PREFIX);

                // FEC address family.
                buf.put_u16(AddressFamily::Ipv4 as u16);

                // FEC prefix length.
                let plen = prefix.prefix();
                buf.put_u8(plen);

                // FEC prefix (variable length).
                let prefix_bytes = prefix.ip().octets();
                let plen_wire = prefix_wire_len(plen);
                buf.put(&prefix_bytes[0..plen_wire]);
            }
            FecElem::Pwid(pwid) => {
                pwid.encode(buf);
            }
        }
    }

    fn decode(
        buf: &mut Bytes,
        tlvi: &TlvDecodeInfo,
        tlv_rlen: &mut u16,
    ) -> DecodeResult<Self> {
        // Parse FEC element type.
        let fec_elem_type = buf.get_u8();
        *tlv_rlen -= 1;

        match fec_elem_type {
            FEC_ELM_WILDCARD => Ok(FecElem::Wildcard),
            FEC_ELM_PREFIX => {
                if *tlv_rlen < 3 {
                    return Err(DecodeError::InvalidTlvValue(tlvi.clone()));
                }

                // Parse prefix address family. The LIB holds no IPv6 state,
                // so IPv6 prefixes are refused here at the decoder.
                let af = buf.get_u16();
                *tlv_rlen -= 2;
                match AddressFamily::from_u16(af) {
                    Some(AddressFamily::Ipv4) => (),
                    _ => {
                        return Err(DecodeError::UnsupportedAf(
                            tlvi.clone(),
                            af,
                        ));
                    }
                }

                // Parse prefix length.
                let plen = buf.get_u8();
                *tlv_rlen -= 1;
                let plen_wire = prefix_wire_len(plen);
                if *tlv_rlen < plen_wire as u16
                    || plen > Ipv4Network::MAX_PREFIXLEN
                {
                    return Err(DecodeError::InvalidTlvValue(tlvi.clone()));
                }

                // Parse prefix.
                let mut prefix_bytes = [0; Ipv4Addr::LENGTH];
                buf.copy_to_slice(&mut prefix_bytes[..plen_wire]);
                *tlv_rlen -= plen_wire as u16;

                Ipv4Network::new(Ipv4Addr::from(prefix_bytes), plen)
                    .map(|prefix| FecElem::Prefix(prefix.apply_mask()))
                    .map_err(|_| DecodeError::InvalidTlvValue(tlvi.clone()))
            }
            FEC_ELM_PWID => {
                let pwid = FecElemPwid::decode(buf, tlvi, tlv_rlen)?;
                Ok(FecElem::Pwid(pwid))
            }
            _ => Err(DecodeError::UnknownFec(tlvi.clone(), fec_elem_type)),
        }
    }
}

impl From<Ipv4Network> for FecElem {
    fn from(prefix: Ipv4Network) -> FecElem {
        FecElem::Prefix(prefix)
    }
}

// ===== impl FecElemPwid =====

impl FecElemPwid {
    fn encode(&self, buf: &mut BytesMut) {
        // FEC element type.
        buf.put_u8(FEC_ELM_PWID);

        // PW type and control-word flag.
        let mut pw_type = self.pw_type as u16;
        if self.cword {
            pw_type |= CONTROL_WORD_FLAG;
        }
        buf.put_u16(pw_type);

        // PW info length.
        let mut pw_len = 0;
        if self.pwid.is_some() {
            pw_len += 4;
        }
        if self.ifmtu.is_some() {
            pw_len += SUBTLV_IFMTU_SIZE;
        }
        buf.put_u8(pw_len);

        // Group ID.
        buf.put_u32(self.group_id);

        // PW ID.
        if let Some(pwid) = self.pwid {
            buf.put_u32(pwid);
        }

        // Interface parameter sub-TLVs.
        if let Some(ifmtu) = self.ifmtu {
            buf.put_u8(SUBTLV_IFMTU);
            buf.put_u8(SUBTLV_IFMTU_SIZE);
            buf.put_u16(ifmtu);
        }
    }

    fn decode(
        buf: &mut Bytes,
        tlvi: &TlvDecodeInfo,
        tlv_rlen: &mut u16,
    ) -> DecodeResult<Self> {
        // The element type was already consumed: PW type (2), PW info
        // length (1) and group ID (4) must follow.
        if *tlv_rlen < 7 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }

        // Parse PW type and control-word flag.
        let mut raw_pw_type = buf.get_u16();
        *tlv_rlen -= 2;
        let cword = raw_pw_type & CONTROL_WORD_FLAG != 0;
        raw_pw_type &= !CONTROL_WORD_FLAG;
        let pw_type = PwType::from_u16(raw_pw_type)
            .ok_or_else(|| DecodeError::InvalidTlvValue(tlvi.clone()))?;

        // Parse PW info length.
        let mut pw_len = buf.get_u8();
        *tlv_rlen -= 1;
        if *tlv_rlen < 4 + pw_len as u16 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }

        // Parse group ID.
        let group_id = buf.get_u32();
        *tlv_rlen -= 4;

        let mut pwid = FecElemPwid {
            pw_type,
            cword,
            group_id,
            pwid: None,
            ifmtu: None,
        };

        // Parse PW ID.
        if pw_len == 0 {
            return Ok(pwid);
        }
        if pw_len < 4 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }
        pwid.pwid = Some(buf.get_u32());
        *tlv_rlen -= 4;
        pw_len -= 4;

        // Parse optional interface parameter sub-TLVs.
        while pw_len > 0 {
            if pw_len < SUBTLV_HDR_SIZE {
                return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
            }
            let subtlv_type = buf.get_u8();
            let subtlv_len = buf.get_u8();
            *tlv_rlen -= 2;
            if subtlv_len < SUBTLV_HDR_SIZE || subtlv_len > pw_len {
                return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
            }

            match subtlv_type {
                SUBTLV_IFMTU => {
                    if subtlv_len != SUBTLV_IFMTU_SIZE {
                        return Err(DecodeError::InvalidTlvLength(
                            tlvi.tlv_len,
                        ));
                    }
                    pwid.ifmtu = Some(buf.get_u16());
                    *tlv_rlen -= 2;
                }
                _ => {
                    // Ignore unknown sub-TLVs.
                    let value_len = (subtlv_len - SUBTLV_HDR_SIZE) as usize;
                    buf.advance(value_len);
                    *tlv_rlen -= value_len as u16;
                }
            }
            pw_len -= subtlv_len;
        }

        Ok(pwid)
    }
}

// ===== impl TlvLabel =====

impl TlvKind for TlvLabel {
    const TLV_TYPE: TlvType = TlvType::GenericLabel;
    const U_BIT: bool = false;
    const F_BIT: bool = false;

    fn encode_value(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0.get());
    }

    fn decode_value(
        buf: &mut Bytes,
        _cxt: &DecodeCxt,
        tlvi: &TlvDecodeInfo,
    ) -> DecodeResult<Self> {
        if tlvi.tlv_len != 4 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }

        let label = buf.get_u32();
        if label > *Label::UNRESERVED_RANGE.end()
            || (label <= *Label::RESERVED_RANGE.end()
                && label != Label::IPV4_EXPLICIT_NULL
                && label != Label::IPV6_EXPLICIT_NULL
                && label != Label::IMPLICIT_NULL)
        {
            return Err(DecodeError::InvalidTlvValue(tlvi.clone()));
        }

        Ok(Self(Label::new(label)))
    }
}

// ===== impl TlvLabelRequestId =====

impl TlvKind for TlvLabelRequestId {
    const TLV_TYPE: TlvType = TlvType::LabelRequestId;
    const U_BIT: bool = false;
    const F_BIT: bool = false;

    fn encode_value(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0);
    }

    fn decode_value(
        buf: &mut Bytes,
        _cxt: &DecodeCxt,
        tlvi: &TlvDecodeInfo,
    ) -> DecodeResult<Self> {
        if tlvi.tlv_len != 4 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }

        let request_id = buf.get_u32();

        Ok(Self(request_id))
    }
}

// ===== impl TlvPwStatus =====

impl TlvKind for TlvPwStatus {
    const TLV_TYPE: TlvType = TlvType::PwStatus;
    const U_BIT: bool = false;
    const F_BIT: bool = false;

    fn encode_value(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0.0);
    }

    fn decode_value(
        buf: &mut Bytes,
        _cxt: &DecodeCxt,
        tlvi: &TlvDecodeInfo,
    ) -> DecodeResult<Self> {
        if tlvi.tlv_len != 4 {
            return Err(DecodeError::InvalidTlvLength(tlvi.tlv_len));
        }

        let status = buf.get_u32();

        Ok(Self(PwStatus(status)))
    }
}

// ===== global functions =====

// Calculate the number of bytes required to encode a prefix.
fn prefix_wire_len(len: u8) -> usize {
    (len as usize).div_ceil(8)
}
