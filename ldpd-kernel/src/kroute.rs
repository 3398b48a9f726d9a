//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use ipnetwork::Ipv4Network;
use ldpd_utils::ibus::{Kroute, KrouteFlags};
use ldpd_utils::ip::Ipv4NetworkExt;

// Route priorities, mirroring the kernel's notion of route preference. BGP
// routes are never redistributed to the LDE.
pub const RTP_CONNECTED: u8 = 4;
pub const RTP_STATIC: u8 = 8;
pub const RTP_OSPF: u8 = 32;
pub const RTP_RIP: u8 = 36;
pub const RTP_BGP: u8 = 48;
pub const RTP_DEFAULT: u8 = 56;

// Mirror of the kernel routing table: prefixes ordered by (prefix, length),
// each carrying an ordered list of priorities, each holding an ordered list
// of nexthops.
#[derive(Debug, Default)]
pub struct KrouteTable {
    prefixes: BTreeMap<Ipv4Network, KroutePrefix>,
}

#[derive(Debug, Default)]
pub struct KroutePrefix {
    // Ordered by priority, most preferred (lowest) first.
    priorities: Vec<KroutePriority>,
}

#[derive(Debug)]
pub struct KroutePriority {
    pub priority: u8,
    pub nexthops: Vec<KrouteNode>,
}

#[derive(Debug)]
pub struct KrouteNode {
    pub kr: Kroute,
}

// Result of a mirror update, used to drive redistribution to the LDE.
#[derive(Debug, Eq, PartialEq)]
pub enum RedistChange {
    // Route added at the best priority.
    Add(Vec<Kroute>),
    // Routes removed from the best priority.
    Del(Vec<Kroute>),
    // The best priority changed: withdraw the old set, advertise the new.
    Replace { del: Vec<Kroute>, add: Vec<Kroute> },
    None,
}

// ===== impl KrouteTable =====

impl KrouteTable {
    // Whether the route is eligible for the mirror at all.
    pub fn acceptable(kr: &Kroute) -> bool {
        if kr.priority == RTP_BGP {
            return false;
        }
        if kr
            .flags
            .intersects(KrouteFlags::REJECT | KrouteFlags::BLACKHOLE)
        {
            return false;
        }
        kr.prefix.is_routable()
    }

    // Inserts or updates a route, returning what changed at the best
    // priority of its prefix.
    pub fn insert(&mut self, kr: Kroute) -> RedistChange {
        let old_best = self.best_nexthops(&kr.prefix);

        let kp = self.prefixes.entry(kr.prefix).or_default();
        let kprio = match kp
            .priorities
            .iter_mut()
            .find(|kprio| kprio.priority == kr.priority)
        {
            Some(kprio) => kprio,
            None => {
                let pos = kp
                    .priorities
                    .iter()
                    .position(|kprio| kprio.priority > kr.priority)
                    .unwrap_or(kp.priorities.len());
                kp.priorities.insert(
                    pos,
                    KroutePriority {
                        priority: kr.priority,
                        nexthops: Vec::new(),
                    },
                );
                &mut kp.priorities[pos]
            }
        };

        match kprio
            .nexthops
            .iter_mut()
            .find(|kn| kn.kr.nexthop == kr.nexthop)
        {
            Some(kn) => {
                // Preserve the installed labels on route refreshes.
                let local_label = kn.kr.local_label;
                let remote_label = kn.kr.remote_label;
                let flags = kn.kr.flags;
                kn.kr = kr;
                kn.kr.local_label = local_label;
                kn.kr.remote_label = remote_label;
                kn.kr.flags |= flags & KrouteFlags::LDPD_INSERTED;
            }
            None => {
                kprio.nexthops.push(KrouteNode { kr });
            }
        }

        self.redist_change(&kr.prefix, old_best)
    }

    // Removes a route, returning what changed at the best priority of its
    // prefix.
    pub fn remove(&mut self, kr: &Kroute) -> RedistChange {
        let old_best = self.best_nexthops(&kr.prefix);

        let Some(kp) = self.prefixes.get_mut(&kr.prefix) else {
            return RedistChange::None;
        };
        if let Some(prio_pos) = kp
            .priorities
            .iter()
            .position(|kprio| kprio.priority == kr.priority)
        {
            let kprio = &mut kp.priorities[prio_pos];
            kprio.nexthops.retain(|kn| kn.kr.nexthop != kr.nexthop);
            if kprio.nexthops.is_empty() {
                kp.priorities.remove(prio_pos);
            }
        }
        if kp.priorities.is_empty() {
            self.prefixes.remove(&kr.prefix);
        }

        self.redist_change(&kr.prefix, old_best)
    }

    // Looks up a specific nexthop entry.
    pub fn find_gw_mut(
        &mut self,
        prefix: &Ipv4Network,
        priority: u8,
        nexthop: &std::net::Ipv4Addr,
    ) -> Option<&mut KrouteNode> {
        self.prefixes
            .get_mut(prefix)?
            .priorities
            .iter_mut()
            .find(|kprio| kprio.priority == priority)?
            .nexthops
            .iter_mut()
            .find(|kn| kn.kr.nexthop == *nexthop)
    }

    // Looks up any nexthop entry for the prefix, preferring the best
    // priority.
    pub fn find_any_gw_mut(
        &mut self,
        prefix: &Ipv4Network,
        nexthop: &std::net::Ipv4Addr,
    ) -> Option<&mut KrouteNode> {
        self.prefixes
            .get_mut(prefix)?
            .priorities
            .iter_mut()
            .flat_map(|kprio| kprio.nexthops.iter_mut())
            .find(|kn| kn.kr.nexthop == *nexthop)
    }

    // Exact lookup with a fallback on any priority: label messages carry
    // the priority the route was redistributed with, but the route may have
    // moved between priorities in the meantime.
    pub fn find_gw_or_any_mut(
        &mut self,
        prefix: &Ipv4Network,
        priority: u8,
        nexthop: &std::net::Ipv4Addr,
    ) -> Option<&mut KrouteNode> {
        let exact = self
            .prefixes
            .get(prefix)
            .map(|kp| {
                kp.priorities.iter().any(|kprio| {
                    kprio.priority == priority
                        && kprio
                            .nexthops
                            .iter()
                            .any(|kn| kn.kr.nexthop == *nexthop)
                })
            })
            .unwrap_or(false);
        if exact {
            self.find_gw_mut(prefix, priority, nexthop)
        } else {
            self.find_any_gw_mut(prefix, nexthop)
        }
    }

    // The current set of redistributable nexthops of a prefix (the lowest
    // priority present).
    pub fn best_nexthops(&self, prefix: &Ipv4Network) -> Vec<Kroute> {
        self.prefixes
            .get(prefix)
            .and_then(|kp| kp.priorities.first())
            .map(|kprio| kprio.nexthops.iter().map(|kn| kn.kr).collect())
            .unwrap_or_default()
    }

    fn redist_change(
        &self,
        prefix: &Ipv4Network,
        old_best: Vec<Kroute>,
    ) -> RedistChange {
        let new_best = self.best_nexthops(prefix);

        let deleted: Vec<Kroute> = old_best
            .iter()
            .filter(|old| {
                !new_best.iter().any(|new| {
                    new.priority == old.priority && new.nexthop == old.nexthop
                })
            })
            .copied()
            .collect();
        let added: Vec<Kroute> = new_best
            .iter()
            .filter(|new| {
                !old_best.iter().any(|old| {
                    new.priority == old.priority && new.nexthop == old.nexthop
                })
            })
            .copied()
            .collect();

        match (deleted.is_empty(), added.is_empty()) {
            (true, true) => RedistChange::None,
            (true, false) => RedistChange::Add(added),
            (false, true) => RedistChange::Del(deleted),
            (false, false) => RedistChange::Replace {
                del: deleted,
                add: added,
            },
        }
    }

    // Returns an iterator visiting all route entries.
    pub fn iter(&self) -> impl Iterator<Item = &'_ KrouteNode> + '_ {
        self.prefixes.values().flat_map(|kp| {
            kp.priorities
                .iter()
                .flat_map(|kprio| kprio.nexthops.iter())
        })
    }

    // Returns an iterator visiting all route entries with mutable
    // references.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut KrouteNode> + '_ {
        self.prefixes.values_mut().flat_map(|kp| {
            kp.priorities
                .iter_mut()
                .flat_map(|kprio| kprio.nexthops.iter_mut())
        })
    }
}
