//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ldpd_utils::l2vpn::PwType;
use ldpd_utils::mpls::Label;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;

// Label Information Base key: an IPv4 prefix or a pseudowire endpoint.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Fec {
    Ipv4(Ipv4Network),
    Pwid {
        pw_type: PwType,
        pwid: u32,
        lsr_id: Ipv4Addr,
    },
}

// A LIB entry: one local label, a set of nexthops and the per-peer label
// bindings learned (downstream) and advertised (upstream).
#[derive(Debug)]
pub struct FecNode {
    pub fec: Fec,
    pub local_label: Option<Label>,
    // Whether the prefix is directly connected (egress labels apply).
    pub connected: bool,
    pub nexthops: BTreeMap<Ipv4Addr, FecNh>,
    pub downstream: BTreeMap<Ipv4Addr, LabelMapping>,
    pub upstream: BTreeMap<Ipv4Addr, LabelMapping>,
}

// A nexthop entry, holding the remote label currently installed in the FIB
// for it. Multiple nexthops per FEC support ECMP.
#[derive(Clone, Debug)]
pub struct FecNh {
    pub nexthop: Ipv4Addr,
    pub ifindex: u32,
    pub priority: u8,
    remote_label: Option<Label>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LabelMapping {
    pub label: Label,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LabelRequest {
    pub id: u32,
}

// ===== impl Fec =====

impl std::fmt::Display for Fec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fec::Ipv4(prefix) => write!(f, "{}", prefix),
            Fec::Pwid { pwid, lsr_id, .. } => {
                write!(f, "pwid {} (lsr-id {})", pwid, lsr_id)
            }
        }
    }
}

// ===== impl FecNode =====

impl FecNode {
    pub(crate) fn new(fec: Fec) -> FecNode {
        let fn_ = FecNode {
            fec,
            local_label: None,
            connected: false,
            nexthops: Default::default(),
            downstream: Default::default(),
            upstream: Default::default(),
        };

        Debug::FecCreate(&fn_.fec).log();

        fn_
    }

    pub(crate) fn nexthop_add(
        &mut self,
        nexthop: Ipv4Addr,
        ifindex: u32,
        priority: u8,
    ) -> &mut FecNh {
        self.nexthops.entry(nexthop).or_insert(FecNh {
            nexthop,
            ifindex,
            priority,
            remote_label: None,
        })
    }

    pub(crate) fn set_local_label(&mut self, label: Option<Label>) {
        if self.local_label != label {
            Debug::FecLabelUpdate(&self.fec, &self.local_label, &label).log();
            self.local_label = label;
        }
    }

    // An orphan entry carries no forwarding or label distribution state and
    // may be reclaimed.
    pub(crate) fn is_orphan(&self) -> bool {
        self.nexthops.is_empty()
            && self.downstream.is_empty()
            && self.upstream.is_empty()
    }
}

impl Drop for FecNode {
    fn drop(&mut self) {
        Debug::FecDelete(&self.fec).log();
    }
}

// ===== impl FecNh =====

impl FecNh {
    pub fn get_label(&self) -> Option<Label> {
        self.remote_label
    }

    pub(crate) fn set_label(&mut self, fec: &Fec, label: Option<Label>) {
        if self.remote_label != label {
            Debug::NexthopLabelUpdate(fec, &self.nexthop, &label).log();
            self.remote_label = label;
        }
    }
}
