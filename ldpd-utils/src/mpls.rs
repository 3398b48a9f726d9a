//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// MPLS label.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Label(u32);

impl Label {
    pub const VALUE_MASK: u32 = 0x000FFFFF;

    // Well-known MPLS labels.
    pub const IPV4_EXPLICIT_NULL: u32 = 0;
    pub const ROUTER_ALERT: u32 = 1;
    pub const IPV6_EXPLICIT_NULL: u32 = 2;
    pub const IMPLICIT_NULL: u32 = 3;

    // MPLS label ranges.
    pub const RESERVED_RANGE: std::ops::RangeInclusive<u32> = 0..=15;
    pub const UNRESERVED_RANGE: std::ops::RangeInclusive<u32> = 16..=1048575;

    pub fn new(label: u32) -> Label {
        if label > *Self::UNRESERVED_RANGE.end() {
            panic!("invalid label value: {}", label);
        }
        Label(label)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_reserved(&self) -> bool {
        Self::RESERVED_RANGE.contains(&self.0)
    }

    pub fn is_implicit_null(&self) -> bool {
        self.0 == Self::IMPLICIT_NULL
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Label::IPV4_EXPLICIT_NULL => write!(f, "ipv4-explicit-null"),
            Label::ROUTER_ALERT => write!(f, "router-alert"),
            Label::IPV6_EXPLICIT_NULL => write!(f, "ipv6-explicit-null"),
            Label::IMPLICIT_NULL => write!(f, "implicit-null"),
            _ => write!(f, "{}", self.0),
        }
    }
}
