//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Pseudowire type.
//
// IANA registry:
// https://www.iana.org/assignments/pwe3-parameters/pwe3-parameters.xhtml
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PwType {
    EthernetTagged = 0x0004,
    Ethernet = 0x0005,
}

// Pseudowire status word (RFC 4447, section 5.4.2).
//
// All bits clear means the pseudowire is forwarding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PwStatus(pub u32);

impl PwStatus {
    pub const FORWARDING: u32 = 0;
    pub const NOT_FORWARDING: u32 = 0x0000_0001;
    pub const LOCAL_RX_FAULT: u32 = 0x0000_0002;
    pub const LOCAL_TX_FAULT: u32 = 0x0000_0004;
    pub const PSN_RX_FAULT: u32 = 0x0000_0008;
    pub const PSN_TX_FAULT: u32 = 0x0000_0010;

    pub fn forwarding() -> PwStatus {
        PwStatus(Self::FORWARDING)
    }

    pub fn is_forwarding(&self) -> bool {
        self.0 == Self::FORWARDING
    }
}

impl std::fmt::Display for PwStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_forwarding() {
            write!(f, "forwarding")
        } else {
            write!(f, "not forwarding (0x{:08x})", self.0)
        }
    }
}

impl std::fmt::Display for PwType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PwType::Ethernet => write!(f, "ethernet"),
            PwType::EthernetTagged => write!(f, "ethernet-tagged"),
        }
    }
}
