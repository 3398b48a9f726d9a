//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

use crate::message::MessageDecodeInfo;
use crate::tlv::{TlvDecodeInfo, TlvType};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// LDP decode errors.
#[derive(Debug, Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    // PDU header
    IncompletePdu,
    InvalidPduLength(u16),
    InvalidVersion(u16),
    InvalidLsrId(Ipv4Addr),
    InvalidLabelSpace(u16),
    // Message (general errors)
    InvalidMessageLength(u16),
    UnknownMessage(MessageDecodeInfo, u16),
    MissingMsgParams(MessageDecodeInfo, TlvType),
    // TLV (general errors)
    InvalidTlvLength(u16),
    UnknownTlv(MessageDecodeInfo, u16),
    InvalidTlvValue(TlvDecodeInfo),
    // Message-specific errors
    UnsupportedAf(TlvDecodeInfo, u16),
    UnknownFec(TlvDecodeInfo, u8),
    BadKeepaliveTime(TlvDecodeInfo, u16),
    McastTHello(TlvDecodeInfo, IpAddr),
    UcastLHello(TlvDecodeInfo, IpAddr),
    InvalidTransportAddr(TlvDecodeInfo, IpAddr),
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::IncompletePdu => {
                write!(f, "incomplete PDU")
            }
            DecodeError::InvalidPduLength(len) => {
                write!(f, "invalid PDU length: {}", len)
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid LDP version: {}", version)
            }
            DecodeError::InvalidLsrId(lsr_id) => {
                write!(f, "invalid LSR-ID: {}", lsr_id)
            }
            DecodeError::InvalidLabelSpace(lspace) => {
                write!(f, "invalid label space: {}", lspace)
            }
            DecodeError::InvalidMessageLength(len) => {
                write!(f, "invalid message length: {}", len)
            }
            DecodeError::UnknownMessage(_msgi, msg_type) => {
                write!(f, "unknown message: 0x{:04x}", msg_type)
            }
            DecodeError::MissingMsgParams(_msgi, tlv_type) => {
                write!(f, "missing message parameters: {}", tlv_type)
            }
            DecodeError::InvalidTlvLength(len) => {
                write!(f, "invalid TLV length: {}", len)
            }
            DecodeError::UnknownTlv(_msgi, tlv_type) => {
                write!(f, "unknown TLV: 0x{:04x}", tlv_type)
            }
            DecodeError::InvalidTlvValue(_tlvi) => {
                write!(f, "invalid TLV value")
            }
            DecodeError::UnsupportedAf(_tlvi, af) => {
                write!(f, "unsupported address family: {}", af)
            }
            DecodeError::UnknownFec(_tlvi, fec) => {
                write!(f, "unknown FEC type: {}", fec)
            }
            DecodeError::BadKeepaliveTime(_tlvi, time) => {
                write!(f, "invalid KeepAlive time: {}", time)
            }
            DecodeError::McastTHello(_tlvi, addr) => {
                write!(f, "multicast targeted hello from {}", addr)
            }
            DecodeError::UcastLHello(_tlvi, addr) => {
                write!(f, "unicast link hello from {}", addr)
            }
            DecodeError::InvalidTransportAddr(_tlvi, addr) => {
                write!(f, "invalid transport address: {}", addr)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}
