//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> Ipv4Network;

    // Returns true if this is a routable network.
    fn is_routable(&self) -> bool;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    const MAX_PREFIXLEN: u8;
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn is_usable(&self) -> bool {
        match self {
            IpAddr::V4(addr) => addr.is_usable(),
            IpAddr::V6(addr) => addr.is_usable(),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            || self.is_unspecified())
    }
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    const LENGTH: usize = 16;

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_routable(&self) -> bool {
        !self.ip().is_loopback()
            && !self.ip().is_broadcast()
            && !self.ip().is_multicast()
            && !self.ip().is_link_local()
    }
}

// ===== impl Ipv6Network =====

impl Ipv6NetworkExt for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;
}
