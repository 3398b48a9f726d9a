//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use ipnetwork::Ipv4Network;
use ldpd_utils::config::Config;
use ldpd_utils::ibus::{
    IbusSender, Kaddr, KifUpdate, Kpw, Kroute, KrouteFlags, LdeToMainMsg,
    LdpeToMainMsg, MainToLdeMsg, MainToLdpeMsg,
};
use ldpd_utils::ip::Ipv4NetworkExt;
use tracing::{debug, warn};

use crate::fib::{Fib, KernelEvent};
use crate::kroute::{KrouteTable, RedistChange};

// Requests the parent must handle outside the kernel component.
#[derive(Debug, Eq, PartialEq)]
pub enum ParentRequest {
    Reload,
    LogVerbose(bool),
}

// Interface mirror entry.
#[derive(Debug)]
pub struct Kif {
    pub update: KifUpdate,
    pub addrs: BTreeSet<Ipv4Network>,
}

#[derive(Clone, Debug)]
pub struct KernelChannelsTx {
    pub ldpe: IbusSender<MainToLdpeMsg>,
    pub lde: IbusSender<MainToLdeMsg>,
}

// The parent's view of the kernel: the authoritative route and interface
// mirrors, plus the label programming state.
#[derive(Debug)]
pub struct Kernel {
    pub config: Config,
    pub krt: KrouteTable,
    pub kifs: BTreeMap<u32, Kif>,
    // Installed pseudowire configurations, keyed by ifindex.
    pub kpws: BTreeMap<u32, Kpw>,
    // FIB coupling switch.
    pub fib_coupled: bool,
    pub fib: Fib,
    pub tx: KernelChannelsTx,
}

// ===== impl Kernel =====

impl Kernel {
    pub fn new(config: Config, fib: Fib, tx: KernelChannelsTx) -> Kernel {
        let fib_coupled = !config.no_fib_update;
        Kernel {
            config,
            krt: Default::default(),
            kifs: Default::default(),
            kpws: Default::default(),
            fib_coupled,
            fib,
            tx,
        }
    }

    // ===== kernel events =====

    pub async fn process_event(&mut self, event: KernelEvent) {
        match event {
            KernelEvent::Link(kif) => self.process_link(kif),
            KernelEvent::AddrAdd(kaddr) => self.process_addr_add(kaddr),
            KernelEvent::AddrDel(kaddr) => self.process_addr_del(kaddr),
            KernelEvent::RouteAdd(kr) => self.process_route_add(kr),
            KernelEvent::RouteDel(kr) => self.process_route_del(kr),
        }
    }

    fn process_link(&mut self, kif: KifUpdate) {
        self.kifs
            .entry(kif.ifindex)
            .and_modify(|entry| entry.update = kif.clone())
            .or_insert_with(|| Kif {
                update: kif.clone(),
                addrs: Default::default(),
            });

        let _ = self.tx.ldpe.send(MainToLdpeMsg::IfStatus(kif.clone()));
        let _ = self.tx.lde.send(MainToLdeMsg::IfStatus(kif));
    }

    fn process_addr_add(&mut self, kaddr: Kaddr) {
        // Filter out addresses LDP can't run on.
        if !kaddr.addr.is_routable() {
            return;
        }

        if let Some(kif) = self.kifs.get_mut(&kaddr.ifindex) {
            if !kif.addrs.insert(kaddr.addr) {
                return;
            }
        }
        let _ = self.tx.ldpe.send(MainToLdpeMsg::NewAddr(kaddr));
    }

    fn process_addr_del(&mut self, kaddr: Kaddr) {
        if !kaddr.addr.is_routable() {
            return;
        }

        if let Some(kif) = self.kifs.get_mut(&kaddr.ifindex) {
            if !kif.addrs.remove(&kaddr.addr) {
                return;
            }
        }
        let _ = self.tx.ldpe.send(MainToLdpeMsg::DelAddr(kaddr));
    }

    fn process_route_add(&mut self, kr: Kroute) {
        if !KrouteTable::acceptable(&kr) {
            return;
        }

        let change = self.krt.insert(kr);
        self.redistribute(change);
    }

    fn process_route_del(&mut self, kr: Kroute) {
        let change = self.krt.remove(&kr);
        self.redistribute(change);
    }

    // Redistributes the best-priority route set changes to the LDE.
    fn redistribute(&self, change: RedistChange) {
        let (del, add) = match change {
            RedistChange::None => return,
            RedistChange::Add(add) => (Vec::new(), add),
            RedistChange::Del(del) => (del, Vec::new()),
            RedistChange::Replace { del, add } => (del, add),
        };

        for kr in del {
            let _ = self.tx.lde.send(MainToLdeMsg::NetworkDel(kr));
        }
        for kr in add {
            let _ = self.tx.lde.send(MainToLdeMsg::NetworkAdd(kr));
        }
    }

    // ===== LDE label programming =====

    pub async fn process_lde_msg(&mut self, msg: LdeToMainMsg) {
        match msg {
            LdeToMainMsg::KLabelChange(kr) => self.klabel_change(kr).await,
            LdeToMainMsg::KLabelDelete(kr) => self.klabel_delete(kr).await,
            LdeToMainMsg::KPwLabelChange(kpw) => {
                self.kpwlabel_change(kpw).await
            }
            LdeToMainMsg::KPwLabelDelete(kpw) => {
                self.kpwlabel_delete(kpw).await
            }
        }
    }

    async fn klabel_change(&mut self, kr: Kroute) {
        let Some(kn) = self.krt.find_gw_or_any_mut(&kr.prefix, kr.priority, &kr.nexthop)
        else {
            warn!(prefix = %kr.prefix, nexthop = %kr.nexthop,
                "label change for lost FEC");
            return;
        };

        kn.kr.local_label = kr.local_label;
        kn.kr.remote_label = kr.remote_label;

        if !self.fib_coupled {
            return;
        }
        kn.kr.flags.insert(KrouteFlags::LDPD_INSERTED);
        let kr = kn.kr;
        self.fib_install(&kr).await;
    }

    async fn klabel_delete(&mut self, kr: Kroute) {
        let Some(kn) = self.krt.find_gw_or_any_mut(&kr.prefix, kr.priority, &kr.nexthop)
        else {
            // The route disappeared from the mirror first; nothing left to
            // deprogram.
            debug!(prefix = %kr.prefix, nexthop = %kr.nexthop,
                "label delete for lost FEC");
            return;
        };

        let installed = kn.kr.flags.contains(KrouteFlags::LDPD_INSERTED);
        let old = kn.kr;
        kn.kr.local_label = None;
        kn.kr.remote_label = None;
        kn.kr.flags.remove(KrouteFlags::LDPD_INSERTED);

        if installed && self.fib_coupled {
            self.fib_uninstall(&old).await;
        }
    }

    async fn kpwlabel_change(&mut self, kpw: Kpw) {
        self.kpws.insert(kpw.ifindex, kpw);
        if self.fib_coupled {
            self.fib.kmpw_set(&kpw).await;
        }
    }

    async fn kpwlabel_delete(&mut self, kpw: Kpw) {
        self.kpws.remove(&kpw.ifindex);
        if self.fib_coupled {
            self.fib.kmpw_unset(&kpw).await;
        }
    }

    // Translates one labeled route into FIB operations: the MPLS LSP for
    // the incoming label (implicit-null labels are not installed) plus the
    // IPv4 gateway mapping imposing the outgoing label.
    async fn fib_install(&self, kr: &Kroute) {
        if let Some(local_label) = kr.local_label {
            if !local_label.is_implicit_null() {
                self.fib
                    .mpls_route_add(
                        local_label,
                        kr.remote_label,
                        kr.nexthop,
                        kr.ifindex,
                    )
                    .await;
            }
        }
        if kr.remote_label.is_some() {
            self.fib
                .ip_route_set(kr.prefix, kr.nexthop, kr.ifindex, kr.remote_label)
                .await;
        }
    }

    async fn fib_uninstall(&self, kr: &Kroute) {
        if let Some(local_label) = kr.local_label {
            if !local_label.is_implicit_null() {
                self.fib.mpls_route_del(local_label).await;
            }
        }
        if kr.remote_label.is_some() {
            // Restore the unlabeled route.
            self.fib
                .ip_route_set(kr.prefix, kr.nexthop, kr.ifindex, None)
                .await;
        }
    }

    // ===== FIB coupling =====

    pub async fn process_ldpe_msg(
        &mut self,
        msg: LdpeToMainMsg,
    ) -> Option<ParentRequest> {
        match msg {
            LdpeToMainMsg::FibCouple => {
                self.fib_couple().await;
                None
            }
            LdpeToMainMsg::FibDecouple => {
                self.fib_decouple().await;
                None
            }
            LdpeToMainMsg::Reload => Some(ParentRequest::Reload),
            LdpeToMainMsg::LogVerbose(verbose) => {
                Some(ParentRequest::LogVerbose(verbose))
            }
        }
    }

    // Reinstalls every LDP-derived route and pseudowire.
    pub async fn fib_couple(&mut self) {
        if self.fib_coupled {
            return;
        }
        self.fib_coupled = true;

        let mut install = Vec::new();
        for kn in self.krt.iter_mut() {
            if kn.kr.local_label.is_some() || kn.kr.remote_label.is_some() {
                kn.kr.flags.insert(KrouteFlags::LDPD_INSERTED);
                install.push(kn.kr);
            }
        }
        for kr in install {
            self.fib_install(&kr).await;
        }
        for kpw in self.kpws.values() {
            self.fib.kmpw_set(kpw).await;
        }
    }

    // Deletes every LDP-inserted route and pseudowire from the kernel.
    pub async fn fib_decouple(&mut self) {
        if !self.fib_coupled {
            return;
        }

        let mut uninstall = Vec::new();
        for kn in self.krt.iter_mut() {
            if kn.kr.flags.contains(KrouteFlags::LDPD_INSERTED) {
                kn.kr.flags.remove(KrouteFlags::LDPD_INSERTED);
                uninstall.push(kn.kr);
            }
        }
        for kr in uninstall {
            self.fib_uninstall(&kr).await;
        }
        for kpw in self.kpws.values() {
            self.fib.kmpw_unset(kpw).await;
        }

        self.fib_coupled = false;
    }

    // ===== configuration reload =====

    // Applies the parent's own side effects of a configuration merge.
    pub async fn merge_config(&mut self, new: Config) {
        let was_decoupled = self.config.no_fib_update;
        let _ = self.config.merge(new);
        let now_decoupled = self.config.no_fib_update;

        if was_decoupled != now_decoupled {
            if now_decoupled {
                self.fib_decouple().await;
            } else {
                self.fib_couple().await;
            }
        }
    }

    // Replays interface and address state to the children, activating any
    // newly configured interfaces.
    pub fn resend_interfaces(&self) {
        for kif in self.kifs.values() {
            let _ = self
                .tx
                .ldpe
                .send(MainToLdpeMsg::IfStatus(kif.update.clone()));
            let _ = self
                .tx
                .lde
                .send(MainToLdeMsg::IfStatus(kif.update.clone()));
            for addr in &kif.addrs {
                let kaddr = Kaddr {
                    ifindex: kif.update.ifindex,
                    addr: *addr,
                };
                let _ = self.tx.ldpe.send(MainToLdpeMsg::NewAddr(kaddr));
            }
        }
    }
}
