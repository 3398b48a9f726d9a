//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use ldpd_utils::mpls::Label;

use crate::debug::Debug;
use crate::fec::{Fec, LabelMapping, LabelRequest};

// The label distribution view of an operational neighbor.
//
// The five FEC-keyed tables encode which labels we learned, advertised,
// requested, were asked for, and withdrew from this peer.
#[derive(Debug)]
pub struct LdeNbr {
    pub peerid: u32,
    pub lsr_id: Ipv4Addr,
    // Addresses advertised by the peer in Address messages.
    pub addr_list: BTreeSet<Ipv4Addr>,
    pub recv_map: BTreeMap<Fec, LabelMapping>,
    pub sent_map: BTreeMap<Fec, LabelMapping>,
    pub recv_req: BTreeMap<Fec, LabelRequest>,
    pub sent_req: BTreeMap<Fec, LabelRequest>,
    pub sent_wdraw: BTreeMap<Fec, Option<Label>>,
}

// ===== impl LdeNbr =====

impl LdeNbr {
    pub(crate) fn new(peerid: u32, lsr_id: Ipv4Addr) -> LdeNbr {
        Debug::NbrCreate(peerid, &lsr_id).log();

        LdeNbr {
            peerid,
            lsr_id,
            addr_list: Default::default(),
            recv_map: Default::default(),
            sent_map: Default::default(),
            recv_req: Default::default(),
            sent_req: Default::default(),
            sent_wdraw: Default::default(),
        }
    }

    // Checks whether the given address was advertised by this peer.
    pub(crate) fn owns_addr(&self, addr: &Ipv4Addr) -> bool {
        self.addr_list.contains(addr)
    }
}

impl Drop for LdeNbr {
    fn drop(&mut self) {
        Debug::NbrDelete(self.peerid, &self.lsr_id).log();
    }
}
