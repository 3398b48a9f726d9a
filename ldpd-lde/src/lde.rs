//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

use ldpd_packet::{MessageType, StatusCode};
use ldpd_utils::config::{Config, ConfigChanges};
use ldpd_utils::ibus::{
    CtlPw, CtlRt, IbusSender, KifUpdate, Kpw, Kroute, KrouteFlags,
    LdeToLdpeMsg, LdeToMainMsg, LdePipes, LdpeToLdeMsg, Map, MapFec, Notify,
};
use ldpd_utils::l2vpn::PwStatus;
use ldpd_utils::mpls::Label;

use crate::debug::Debug;
use crate::fec::{Fec, FecNode, LabelMapping, LabelRequest};
use crate::l2vpn::{L2vpn, L2vpnPw, PwFlags};
use crate::neighbor::LdeNbr;

// Interval between orphan LIB entry collection walks (in seconds).
pub const LDE_GC_INTERVAL: u64 = 300;

// First label handed out by the allocator.
const MPLS_LABEL_RESERVED_MAX: u32 = 15;

// The label decision engine: the LIB and the downstream-unsolicited,
// liberal-retention, independent-control procedures of RFC 5036.
#[derive(Debug)]
pub struct Lde {
    // Running configuration (LDE view).
    pub config: Config,
    // Configuration tree being streamed in during a reload.
    pub pending_conf: Option<Config>,
    // Label Information Base.
    pub fecs: BTreeMap<Fec, FecNode>,
    // Operational neighbors, keyed by peer-id.
    pub nbrs: HashMap<u32, LdeNbr>,
    // Layer-2 VPN instances.
    pub l2vpns: BTreeMap<String, L2vpn>,
    // Label allocator.
    pub next_label: u32,
    // Tx channels.
    pub tx: LdeChannelsTx,
}

#[derive(Clone, Debug)]
pub struct LdeChannelsTx {
    pub ldpe: IbusSender<LdeToLdpeMsg>,
    pub main: IbusSender<LdeToMainMsg>,
}

// ===== impl Lde =====

impl Lde {
    pub fn new(config: Config, tx: LdeChannelsTx) -> Lde {
        let mut lde = Lde {
            config,
            pending_conf: None,
            fecs: Default::default(),
            nbrs: Default::default(),
            l2vpns: Default::default(),
            next_label: MPLS_LABEL_RESERVED_MAX,
            tx,
        };

        // Instantiate the configured L2VPNs and their pseudowires.
        for cfg in lde.config.l2vpns.clone() {
            let l2vpn = L2vpn::from_config(&cfg);
            lde.l2vpns.insert(cfg.name.clone(), l2vpn);
            for pw in &cfg.pseudowires {
                lde.pw_init(&cfg.name, &pw.name);
            }
        }

        lde
    }

    // Main event loop.
    pub async fn run(mut self, mut pipes: LdePipes) {
        let mut gc_interval =
            tokio::time::interval(Duration::from_secs(LDE_GC_INTERVAL));
        // The first tick fires immediately; skip it.
        gc_interval.tick().await;

        loop {
            tokio::select! {
                msg = pipes.from_main.recv() => {
                    match msg {
                        Some(msg) => self.process_main_msg(msg),
                        None => break,
                    }
                }
                msg = pipes.from_ldpe.recv() => {
                    match msg {
                        Some(msg) => self.process_ldpe_msg(msg),
                        None => break,
                    }
                }
                _ = gc_interval.tick() => {
                    self.process_gc_timer();
                }
            }
        }
    }

    pub fn process_main_msg(&mut self, msg: ldpd_utils::ibus::MainToLdeMsg) {
        use ldpd_utils::ibus::MainToLdeMsg;

        match msg {
            MainToLdeMsg::NetworkAdd(kr) => self.process_network_add(kr),
            MainToLdeMsg::NetworkDel(kr) => self.process_network_del(kr),
            MainToLdeMsg::IfStatus(kif) => self.process_ifstatus(kif),
            MainToLdeMsg::Reconf(msg) => {
                if let Some(new_conf) =
                    Config::reconf_accumulate(&mut self.pending_conf, msg)
                {
                    let changes = self.config.merge(new_conf);
                    self.apply_config_changes(changes);
                }
            }
        }
    }

    pub fn process_ldpe_msg(&mut self, msg: LdpeToLdeMsg) {
        match msg {
            LdpeToLdeMsg::LabelMapping { peerid, map } => {
                self.check_mapping(peerid, map);
            }
            LdpeToLdeMsg::LabelRequest { peerid, map } => {
                self.check_request(peerid, map);
            }
            LdpeToLdeMsg::LabelWithdraw { peerid, map } => {
                self.check_withdraw(peerid, map);
            }
            LdpeToLdeMsg::LabelRelease { peerid, map } => {
                self.check_release(peerid, map);
            }
            LdpeToLdeMsg::LabelAbort { .. } => {
                // Under independent control every received request is
                // answered immediately, leaving nothing to abort.
            }
            LdpeToLdeMsg::MappingDump { peerid } => {
                self.process_mapping_dump(peerid);
            }
            LdpeToLdeMsg::AddressAdd { peerid, addr } => {
                self.process_address_add(peerid, addr);
            }
            LdpeToLdeMsg::AddressDel { peerid, addr } => {
                self.process_address_del(peerid, addr);
            }
            LdpeToLdeMsg::Notification { peerid, notify } => {
                self.process_notification(peerid, notify);
            }
            LdpeToLdeMsg::NeighborUp { peerid, lsr_id } => {
                self.process_nbr_up(peerid, lsr_id);
            }
            LdpeToLdeMsg::NeighborDown { peerid } => {
                self.process_nbr_down(peerid);
            }
            LdpeToLdeMsg::ShowLib { client_id } => {
                self.process_show_lib(client_id);
            }
            LdpeToLdeMsg::ShowL2vpnPw { client_id } => {
                self.process_show_l2vpn_pw(client_id);
            }
        }
    }

    // ===== label allocation =====

    fn assign_label(next_label: &mut u32) -> Label {
        *next_label += 1;
        Label::new(*next_label)
    }

    // Egress label advertised for directly connected prefixes.
    fn egress_label(config: &Config) -> Label {
        if config.explicit_null {
            Label::new(Label::IPV4_EXPLICIT_NULL)
        } else {
            Label::new(Label::IMPLICIT_NULL)
        }
    }

    // Releases the local label once the entry carries no distribution state
    // at all, keeping the LIB invariant: a label is assigned iff the FEC has
    // nexthops, downstream bindings or upstream advertisements.
    fn maybe_free_local_label(&mut self, fec: Fec) {
        if let Some(fn_) = self.fecs.get_mut(&fec) {
            if fn_.is_orphan() {
                fn_.set_local_label(None);
            }
        }
    }

    // ===== kernel synchronization =====

    fn process_network_add(&mut self, kr: Kroute) {
        let fec = Fec::Ipv4(kr.prefix);
        let fn_ = self.fecs.entry(fec).or_insert_with(|| FecNode::new(fec));
        if kr.flags.contains(KrouteFlags::CONNECTED) {
            fn_.connected = true;
        }
        fn_.nexthop_add(kr.nexthop, kr.ifindex, kr.priority);

        // Assign a local label if the FEC doesn't have one yet and perform
        // the FEC.1 label distribution procedure.
        if fn_.local_label.is_none() {
            let label = if fn_.connected {
                Lde::egress_label(&self.config)
            } else {
                Lde::assign_label(&mut self.next_label)
            };
            fn_.set_local_label(Some(label));
            self.send_labelmapping_all(fec);
        }

        // FEC.2/FEC.5: a downstream mapping from the neighbor owning this
        // nexthop might already exist; install it right away.
        let nh_addr = kr.nexthop;
        if let Some(peerid) = self.nbr_find_by_addr(&nh_addr) {
            let ln = &self.nbrs[&peerid];
            if let Some(mapping) = ln.recv_map.get(&fec).copied() {
                let fn_ = self.fecs.get_mut(&fec).unwrap();
                if let Some(nh) = fn_.nexthops.get_mut(&nh_addr) {
                    nh.set_label(&fec, Some(mapping.label));
                }
                self.send_change_klabel(fec, nh_addr);
            }
        }
    }

    fn process_network_del(&mut self, kr: Kroute) {
        let fec = Fec::Ipv4(kr.prefix);
        let Some(fn_) = self.fecs.get_mut(&fec) else {
            return;
        };
        if !fn_.nexthops.contains_key(&kr.nexthop) {
            return;
        }

        // Remove the installed LSP first.
        self.send_delete_klabel(fec, kr.nexthop);

        let fn_ = self.fecs.get_mut(&fec).unwrap();
        fn_.nexthops.remove(&kr.nexthop);

        // When the last nexthop is gone the label is withdrawn from every
        // peer; the local label is released once the peers' releases clear
        // the upstream records.
        if fn_.nexthops.is_empty() {
            let label = fn_.local_label;
            self.send_labelwithdraw_all(Some(fec), label);
            self.maybe_free_local_label(fec);
        }
    }

    fn process_ifstatus(&mut self, kif: KifUpdate) {
        for l2vpn in self.l2vpns.values_mut() {
            if let Some(lif) = l2vpn.interfaces.get_mut(&kif.ifname) {
                lif.ifindex = Some(kif.ifindex);
                lif.operative = kif.operative;
            }
            for pw in l2vpn.pws.values_mut() {
                if pw.ifname == kif.ifname {
                    pw.ifindex = Some(kif.ifindex);
                }
            }
        }
    }

    // Translates a LIB entry into kernel programming messages.
    fn send_change_klabel(&mut self, fec: Fec, nh_addr: Ipv4Addr) {
        match fec {
            Fec::Ipv4(prefix) => {
                let Some(fn_) = self.fecs.get(&fec) else {
                    return;
                };
                let Some(nh) = fn_.nexthops.get(&nh_addr) else {
                    return;
                };
                if fn_.local_label.is_none() {
                    return;
                }

                let kr = Kroute {
                    prefix,
                    nexthop: nh.nexthop,
                    local_label: fn_.local_label,
                    remote_label: nh.get_label(),
                    ifindex: nh.ifindex,
                    priority: nh.priority,
                    flags: if fn_.connected {
                        KrouteFlags::CONNECTED
                    } else {
                        KrouteFlags::empty()
                    },
                };
                let sync_pws = (nh.get_label().is_some()
                    && prefix.prefix() == 32)
                    .then(|| prefix.ip());

                let _ = self.tx.main.send(LdeToMainMsg::KLabelChange(kr));

                // A host route toward a pseudowire endpoint becoming labeled
                // might render the pseudowire operational.
                if let Some(addr) = sync_pws {
                    self.l2vpn_sync_pws(addr);
                }
            }
            Fec::Pwid { .. } => self.pw_kernel_update(fec),
        }
    }

    fn send_delete_klabel(&mut self, fec: Fec, nh_addr: Ipv4Addr) {
        match fec {
            Fec::Ipv4(prefix) => {
                let Some(fn_) = self.fecs.get(&fec) else {
                    return;
                };
                let Some(nh) = fn_.nexthops.get(&nh_addr) else {
                    return;
                };

                let kr = Kroute {
                    prefix,
                    nexthop: nh.nexthop,
                    local_label: fn_.local_label,
                    remote_label: nh.get_label(),
                    ifindex: nh.ifindex,
                    priority: nh.priority,
                    flags: if fn_.connected {
                        KrouteFlags::CONNECTED
                    } else {
                        KrouteFlags::empty()
                    },
                };
                let sync_pws =
                    (prefix.prefix() == 32).then(|| prefix.ip());

                let _ = self.tx.main.send(LdeToMainMsg::KLabelDelete(kr));

                if let Some(addr) = sync_pws {
                    self.l2vpn_sync_pws(addr);
                }
            }
            Fec::Pwid { .. } => self.pw_kernel_update(fec),
        }
    }

    // ===== label distribution =====

    // Sends one label mapping to the given peer, threading a pending
    // request ID into it if one exists (SL.4 - SL.7).
    fn send_labelmapping_one(&mut self, peerid: u32, fec: Fec, end: bool) {
        let Some(ln) = self.nbrs.get_mut(&peerid) else {
            return;
        };
        let Some(fn_) = self.fecs.get_mut(&fec) else {
            return;
        };
        let Some(local_label) = fn_.local_label else {
            return;
        };

        let mut map = match fec {
            Fec::Ipv4(prefix) => Map::new(MapFec::Prefix(prefix)),
            Fec::Pwid {
                pw_type,
                pwid,
                lsr_id,
            } => {
                // Only the remote end of the pseudowire is told about it.
                if ln.lsr_id != lsr_id {
                    return;
                }
                let Some((l2vpn_mtu, pw)) =
                    l2vpn_pw_find(&self.l2vpns, lsr_id, pwid)
                else {
                    return;
                };
                let mut map = Map::new(MapFec::Pwid {
                    pw_type,
                    group_id: 0,
                    pwid: Some(pwid),
                    ifmtu: Some(l2vpn_mtu),
                });
                map.cword = pw.flags.contains(PwFlags::CWORD);
                if pw.flags.contains(PwFlags::STATUSTLV_CONF) {
                    map.pw_status = Some(PwStatus::forwarding());
                }
                map
            }
        };
        map.label = Some(local_label);

        // SL.6: is there a pending request for this mapping?
        if let Some(request) = ln.recv_req.remove(&fec) {
            // SL.7: delete record of pending request.
            map.request_id = Some(request.id);
        }

        // SL.4: send label mapping.
        let _ = self
            .tx
            .ldpe
            .send(LdeToLdpeMsg::MappingAdd { peerid, map });
        if end {
            let _ = self.tx.ldpe.send(LdeToLdpeMsg::MappingAddEnd { peerid });
        }

        // SL.5: record sent label mapping.
        let mapping = LabelMapping { label: local_label };
        fn_.upstream.insert(ln.lsr_id, mapping);
        ln.sent_map.insert(fec, mapping);
    }

    // FEC.1: send a label mapping to every established neighbor.
    fn send_labelmapping_all(&mut self, fec: Fec) {
        for peerid in self.nbrs.keys().copied().collect::<Vec<_>>() {
            self.send_labelmapping_one(peerid, fec, true);
        }
    }

    // SWd.1/SWd.2: send a label withdraw and record it.
    fn send_labelwithdraw(
        &mut self,
        peerid: u32,
        fec: Option<Fec>,
        label: Option<Label>,
    ) {
        let Some(ln) = self.nbrs.get_mut(&peerid) else {
            return;
        };

        let mut map = match fec {
            Some(Fec::Ipv4(prefix)) => Map::new(MapFec::Prefix(prefix)),
            Some(Fec::Pwid {
                pw_type,
                pwid,
                lsr_id,
            }) => {
                if ln.lsr_id != lsr_id {
                    return;
                }
                let Some((_, pw)) =
                    l2vpn_pw_find(&self.l2vpns, lsr_id, pwid)
                else {
                    return;
                };
                let mut map = Map::new(MapFec::Pwid {
                    pw_type,
                    group_id: 0,
                    pwid: Some(pwid),
                    ifmtu: None,
                });
                map.cword = pw.flags.contains(PwFlags::CWORD);
                map
            }
            None => Map::new(MapFec::Wildcard),
        };
        map.label = label;

        // SWd.1: send label withdraw.
        let _ = self
            .tx
            .ldpe
            .send(LdeToLdpeMsg::WithdrawAdd { peerid, map });
        let _ = self.tx.ldpe.send(LdeToLdpeMsg::WithdrawAddEnd { peerid });

        // SWd.2: record label withdraw.
        match fec {
            Some(fec) => {
                ln.sent_wdraw.insert(fec, label);
            }
            None => {
                for fec in self.fecs.keys() {
                    ln.sent_wdraw.insert(*fec, label);
                }
            }
        }
    }

    fn send_labelwithdraw_all(&mut self, fec: Option<Fec>, label: Option<Label>) {
        for peerid in self.nbrs.keys().copied().collect::<Vec<_>>() {
            self.send_labelwithdraw(peerid, fec, label);
        }
    }

    fn send_labelrelease(
        &mut self,
        peerid: u32,
        fec: Option<Fec>,
        label: Option<Label>,
    ) {
        let Some(ln) = self.nbrs.get(&peerid) else {
            return;
        };

        let mut map = match fec {
            Some(Fec::Ipv4(prefix)) => Map::new(MapFec::Prefix(prefix)),
            Some(Fec::Pwid {
                pw_type,
                pwid,
                lsr_id,
            }) => {
                if ln.lsr_id != lsr_id {
                    return;
                }
                let cword = l2vpn_pw_find(&self.l2vpns, lsr_id, pwid)
                    .map(|(_, pw)| pw.flags.contains(PwFlags::CWORD))
                    .unwrap_or(false);
                let mut map = Map::new(MapFec::Pwid {
                    pw_type,
                    group_id: 0,
                    pwid: Some(pwid),
                    ifmtu: None,
                });
                map.cword = cword;
                map
            }
            None => Map::new(MapFec::Wildcard),
        };
        map.label = label;

        let _ = self
            .tx
            .ldpe
            .send(LdeToLdpeMsg::ReleaseAdd { peerid, map });
        let _ = self.tx.ldpe.send(LdeToLdpeMsg::ReleaseAddEnd { peerid });
    }

    fn send_notification(
        &self,
        peerid: u32,
        status: StatusCode,
        msg_id: u32,
        msg_type: u16,
    ) {
        let notify = Notify {
            status_code: status.encode(msg_type != 0),
            msg_id,
            msg_type,
            pw_status: None,
            fec: None,
        };
        let _ = self
            .tx
            .ldpe
            .send(LdeToLdpeMsg::NotificationSend { peerid, notify });
    }

    // ===== received label messages =====

    // The LMp.x procedure: record the mapping (liberal retention) and
    // install it in the FIB whenever one of the FEC's nexthops is owned by
    // the advertising peer.
    fn check_mapping(&mut self, peerid: u32, map: Map) {
        let Some(ln) = self.nbrs.get(&peerid) else {
            return;
        };
        let lsr_id = ln.lsr_id;
        let Some(label) = map.label else {
            return;
        };
        let Some(fec) = map_to_fec(&map.fec, lsr_id) else {
            return;
        };

        // Pseudowire parameter negotiation (RFC 4447).
        if matches!(fec, Fec::Pwid { .. })
            && !self.pw_negotiate(peerid, fec, &map)
        {
            return;
        }

        // Find or create the FEC node (liberal retention keeps mappings for
        // currently unroutable FECs). Retained FECs get a local label of
        // their own so a route showing up later is served immediately.
        let fn_ = self.fecs.entry(fec).or_insert_with(|| FecNode::new(fec));
        if fn_.local_label.is_none() {
            let label = Lde::assign_label(&mut self.next_label);
            fn_.set_local_label(Some(label));
            self.send_labelmapping_all(fec);
        }

        // LMp.1: check for an outstanding label request.
        // LMp.2: delete record of the outstanding request.
        let ln = self.nbrs.get_mut(&peerid).unwrap();
        let req_response = ln.sent_req.remove(&fec).is_some();

        // LMp.3 - LMp.8: loop detection, unnecessary for frame-mode MPLS
        // networks.

        // LMp.9: does the LSR have a previously received label mapping for
        // the FEC from this peer?
        let old_label = ln.recv_map.get(&fec).map(|mapping| mapping.label);
        if let Some(old_label) = old_label {
            // LMp.10: the attributes changed.
            if old_label != label && !req_response {
                // LMp.10a: uninstall the old label and release it.
                let fn_ = self.fecs.get(&fec).unwrap();
                let nh_addrs: Vec<Ipv4Addr> = fn_
                    .nexthops
                    .values()
                    .filter(|nh| ln.owns_addr(&nh.nexthop))
                    .map(|nh| nh.nexthop)
                    .collect();
                for nh_addr in nh_addrs {
                    self.send_delete_klabel(fec, nh_addr);
                    let fn_ = self.fecs.get_mut(&fec).unwrap();
                    if let Some(nh) = fn_.nexthops.get_mut(&nh_addr) {
                        nh.set_label(&fec, None);
                    }
                }
                self.send_labelrelease(peerid, Some(fec), Some(old_label));
            }
        }

        // LMp.11 - LMp.12: consider multiple nexthops in order to support
        // multipath.
        let ln = self.nbrs.get(&peerid).unwrap();
        let fn_ = self.fecs.get(&fec).unwrap();
        let nh_addrs: Vec<Ipv4Addr> = match fec {
            Fec::Ipv4(_) => fn_
                .nexthops
                .values()
                .filter(|nh| ln.owns_addr(&nh.nexthop))
                .map(|nh| nh.nexthop)
                .collect(),
            // The pseudowire endpoint is the single nexthop.
            Fec::Pwid { .. } => fn_.nexthops.keys().copied().collect(),
        };
        for nh_addr in nh_addrs {
            let fn_ = self.fecs.get_mut(&fec).unwrap();
            let nh = fn_.nexthops.get_mut(&nh_addr).unwrap();

            // Ignore duplicate mapping.
            if nh.get_label() == Some(label) {
                continue;
            }

            // LMp.15: install the label in the FIB.
            nh.set_label(&fec, Some(label));
            if fn_.local_label.is_some() {
                self.send_change_klabel(fec, nh_addr);
            }
        }

        // LMp.13 and LMp.16: record the mapping from this peer.
        let mapping = LabelMapping { label };
        let fn_ = self.fecs.get_mut(&fec).unwrap();
        fn_.downstream.insert(lsr_id, mapping);
        let ln = self.nbrs.get_mut(&peerid).unwrap();
        ln.recv_map.insert(fec, mapping);

        // LMp.17 - LMp.27 are unnecessary since loop detection is not
        // implemented. LMp.28 - LMp.30 are unnecessary because this LSR is
        // merging capable.
    }

    // The LRq.x procedure.
    fn check_request(&mut self, peerid: u32, map: Map) {
        let Some(ln) = self.nbrs.get(&peerid) else {
            return;
        };
        let lsr_id = ln.lsr_id;
        let Some(fec) = map_to_fec(&map.fec, lsr_id) else {
            return;
        };

        // LRq.1: skip loop detection (not necessary).

        // LRq.2: is there a nexthop for the FEC?
        let has_route = self
            .fecs
            .get(&fec)
            .map(|fn_| {
                !fn_.nexthops.is_empty() && fn_.local_label.is_some()
            })
            .unwrap_or(false);
        if !has_route {
            // LRq.5: send No Route notification.
            self.send_notification(
                peerid,
                StatusCode::NoRoute,
                map.msg_id,
                MessageType::LabelRequest as u16,
            );
            return;
        }

        // LRq.3: is the message source the nexthop?
        let fn_ = self.fecs.get(&fec).unwrap();
        if fn_
            .nexthops
            .values()
            .any(|nh| ln.owns_addr(&nh.nexthop))
        {
            // LRq.4: send Loop Detected notification.
            self.send_notification(
                peerid,
                StatusCode::LoopDetected,
                map.msg_id,
                MessageType::LabelRequest as u16,
            );
            return;
        }

        // LRq.6 - LRq.7: ignore duplicate requests.
        if ln.recv_req.contains_key(&fec) {
            return;
        }

        // LRq.8: record the request; the request ID is threaded back into
        // the label mapping sent in response.
        let ln = self.nbrs.get_mut(&peerid).unwrap();
        ln.recv_req.insert(fec, LabelRequest { id: map.msg_id });

        // LRq.9: perform LSR label distribution.
        self.send_labelmapping_one(peerid, fec, true);

        // LRq.10: nothing to do (Request Never) under liberal retention.
        // LRq.11 - LRq.12 are unnecessary since this LSR is merging capable.
    }

    // The LWd.x procedure.
    fn check_withdraw(&mut self, peerid: u32, map: Map) {
        let Some(ln) = self.nbrs.get(&peerid) else {
            return;
        };
        let lsr_id = ln.lsr_id;

        let targets: Vec<Fec> = match map_to_fec(&map.fec, lsr_id) {
            Some(fec) => vec![fec],
            // A wildcard withdraw applies to every FEC in the LIB; a PWid
            // FEC without a PW ID applies to the peer's pseudowire FECs.
            None => match map.fec {
                MapFec::Wildcard => {
                    // LWd.2: send a single wildcard label release back.
                    self.send_labelrelease(peerid, None, map.label);
                    self.fecs.keys().copied().collect()
                }
                MapFec::Pwid { .. } => self
                    .fecs
                    .keys()
                    .copied()
                    .filter(|fec| {
                        matches!(fec, Fec::Pwid { lsr_id: pw_lsr, .. }
                            if *pw_lsr == lsr_id)
                    })
                    .collect(),
                _ => return,
            },
        };
        let wildcard = matches!(map.fec, MapFec::Wildcard);

        for fec in targets {
            let Some(fn_) = self.fecs.get(&fec) else {
                continue;
            };

            // LWd.1: remove the label from forwarding use.
            let ln = self.nbrs.get(&peerid).unwrap();
            let nh_addrs: Vec<Ipv4Addr> = match fec {
                Fec::Ipv4(_) => fn_
                    .nexthops
                    .values()
                    .filter(|nh| {
                        ln.owns_addr(&nh.nexthop)
                            && (map.label.is_none()
                                || nh.get_label() == map.label)
                    })
                    .map(|nh| nh.nexthop)
                    .collect(),
                Fec::Pwid { lsr_id: pw_lsr, .. } if pw_lsr == lsr_id => {
                    fn_.nexthops.keys().copied().collect()
                }
                Fec::Pwid { .. } => vec![],
            };
            for nh_addr in nh_addrs {
                self.send_delete_klabel(fec, nh_addr);
                let fn_ = self.fecs.get_mut(&fec).unwrap();
                if let Some(nh) = fn_.nexthops.get_mut(&nh_addr) {
                    nh.set_label(&fec, None);
                }
            }

            // LWd.2: send label release.
            if !wildcard {
                self.send_labelrelease(peerid, Some(fec), map.label);
            }

            // LWd.3: check the previously received label mapping.
            let ln = self.nbrs.get_mut(&peerid).unwrap();
            if let Some(mapping) = ln.recv_map.get(&fec).copied() {
                if map.label.is_none() || map.label == Some(mapping.label) {
                    // LWd.4: remove record of the previously received label
                    // mapping.
                    ln.recv_map.remove(&fec);
                    let fn_ = self.fecs.get_mut(&fec).unwrap();
                    fn_.downstream.remove(&lsr_id);
                    self.maybe_free_local_label(fec);
                }
            }
        }
    }

    // The LRl.x procedure.
    fn check_release(&mut self, peerid: u32, map: Map) {
        let Some(ln) = self.nbrs.get(&peerid) else {
            return;
        };
        let lsr_id = ln.lsr_id;

        let targets: Vec<Fec> = match map_to_fec(&map.fec, lsr_id) {
            Some(fec) => vec![fec],
            // A wildcard release clears all FECs for the peer; a PWid FEC
            // without a PW ID clears the peer's pseudowire FECs.
            None => match map.fec {
                MapFec::Wildcard => self.fecs.keys().copied().collect(),
                MapFec::Pwid { .. } => self
                    .fecs
                    .keys()
                    .copied()
                    .filter(|fec| {
                        matches!(fec, Fec::Pwid { lsr_id: pw_lsr, .. }
                            if *pw_lsr == lsr_id)
                    })
                    .collect(),
                _ => return,
            },
        };

        for fec in targets {
            if !self.fecs.contains_key(&fec) {
                continue;
            }

            // LRl.6: check the sent map list and remove it if matching.
            let ln = self.nbrs.get_mut(&peerid).unwrap();
            if let Some(mapping) = ln.sent_map.get(&fec).copied() {
                if map.label.is_none() || map.label == Some(mapping.label) {
                    ln.sent_map.remove(&fec);
                    let fn_ = self.fecs.get_mut(&fec).unwrap();
                    fn_.upstream.remove(&lsr_id);
                    self.maybe_free_local_label(fec);
                }
            }

            // LRl.3: check for a pending withdraw.
            let ln = self.nbrs.get_mut(&peerid).unwrap();
            if let Some(wdraw_label) = ln.sent_wdraw.get(&fec).copied() {
                if map.label.is_none() || map.label == wdraw_label {
                    ln.sent_wdraw.remove(&fec);
                }
            }

            // LRl.11 - LRl.13 are unnecessary since the label is removed
            // from forwarding as soon as the FEC becomes unreachable.
        }
    }

    // ===== addresses =====

    fn process_address_add(&mut self, peerid: u32, addr: Ipv4Addr) {
        let Some(ln) = self.nbrs.get_mut(&peerid) else {
            return;
        };
        if !ln.addr_list.insert(addr) {
            return;
        }

        // Activate any retained mappings waiting on this nexthop.
        let pending: Vec<(Fec, Label)> = self
            .fecs
            .iter()
            .filter(|(fec, fn_)| {
                fn_.nexthops.contains_key(&addr)
                    && ln.recv_map.contains_key(fec)
            })
            .map(|(fec, _)| (*fec, ln.recv_map[fec].label))
            .collect();
        for (fec, label) in pending {
            let fn_ = self.fecs.get_mut(&fec).unwrap();
            if let Some(nh) = fn_.nexthops.get_mut(&addr) {
                nh.set_label(&fec, Some(label));
            }
            if fn_.local_label.is_some() {
                self.send_change_klabel(fec, addr);
            }
        }
    }

    fn process_address_del(&mut self, peerid: u32, addr: Ipv4Addr) {
        let Some(ln) = self.nbrs.get_mut(&peerid) else {
            return;
        };
        if !ln.addr_list.remove(&addr) {
            return;
        }

        // Uninstall anything forwarded through the withdrawn address.
        let installed: Vec<Fec> = self
            .fecs
            .iter()
            .filter(|(_, fn_)| {
                fn_.nexthops
                    .get(&addr)
                    .map(|nh| nh.get_label().is_some())
                    .unwrap_or(false)
            })
            .map(|(fec, _)| *fec)
            .collect();
        for fec in installed {
            self.send_delete_klabel(fec, addr);
            let fn_ = self.fecs.get_mut(&fec).unwrap();
            if let Some(nh) = fn_.nexthops.get_mut(&addr) {
                nh.set_label(&fec, None);
            }
        }
    }

    // ===== neighbors =====

    fn process_nbr_up(&mut self, peerid: u32, lsr_id: Ipv4Addr) {
        self.nbrs.insert(peerid, LdeNbr::new(peerid, lsr_id));
    }

    fn process_nbr_down(&mut self, peerid: u32) {
        let Some(ln) = self.nbrs.remove(&peerid) else {
            return;
        };

        for fec in self.fecs.keys().copied().collect::<Vec<_>>() {
            let fn_ = self.fecs.get(&fec).unwrap();

            // Uninstall everything learned from this peer.
            let nh_addrs: Vec<Ipv4Addr> = match fec {
                Fec::Ipv4(_) => fn_
                    .nexthops
                    .values()
                    .filter(|nh| {
                        ln.owns_addr(&nh.nexthop)
                            && nh.get_label().is_some()
                    })
                    .map(|nh| nh.nexthop)
                    .collect(),
                Fec::Pwid { lsr_id, .. } if lsr_id == ln.lsr_id => {
                    fn_.nexthops.keys().copied().collect()
                }
                Fec::Pwid { .. } => vec![],
            };
            for nh_addr in nh_addrs {
                self.send_delete_klabel(fec, nh_addr);
                let fn_ = self.fecs.get_mut(&fec).unwrap();
                if let Some(nh) = fn_.nexthops.get_mut(&nh_addr) {
                    nh.set_label(&fec, None);
                }
            }

            // Remove downstream and upstream label bindings (if any).
            let fn_ = self.fecs.get_mut(&fec).unwrap();
            fn_.downstream.remove(&ln.lsr_id);
            fn_.upstream.remove(&ln.lsr_id);
            self.maybe_free_local_label(fec);
        }
    }

    // Full LIB snapshot for a newly established session.
    fn process_mapping_dump(&mut self, peerid: u32) {
        let fecs: Vec<Fec> = self
            .fecs
            .iter()
            .filter(|(_, fn_)| fn_.local_label.is_some())
            .map(|(fec, _)| *fec)
            .collect();
        for fec in fecs {
            self.send_labelmapping_one(peerid, fec, false);
        }
        let _ = self.tx.ldpe.send(LdeToLdpeMsg::MappingAddEnd { peerid });
    }

    // ===== pseudowires =====

    fn nbr_find_by_addr(&self, addr: &Ipv4Addr) -> Option<u32> {
        self.nbrs
            .iter()
            .find(|(_, ln)| ln.owns_addr(addr))
            .map(|(peerid, _)| *peerid)
    }

    fn nbr_find_by_lsr_id(&self, lsr_id: &Ipv4Addr) -> Option<u32> {
        self.nbrs
            .iter()
            .find(|(_, ln)| ln.lsr_id == *lsr_id)
            .map(|(peerid, _)| *peerid)
    }

    // Brings a configured pseudowire into the LIB and advertises it to its
    // remote end.
    fn pw_init(&mut self, l2vpn_name: &str, pw_name: &str) {
        let Some(l2vpn) = self.l2vpns.get(l2vpn_name) else {
            return;
        };
        let Some(pw) = l2vpn.pws.get(pw_name) else {
            return;
        };
        let fec = Fec::Pwid {
            pw_type: l2vpn.pw_type,
            pwid: pw.pwid,
            lsr_id: pw.lsr_id,
        };
        let addr = pw.addr;
        let lsr_id = pw.lsr_id;

        let fn_ = self.fecs.entry(fec).or_insert_with(|| FecNode::new(fec));
        fn_.nexthop_add(addr, 0, 0);
        if fn_.local_label.is_none() {
            fn_.set_local_label(Some(Lde::assign_label(&mut self.next_label)));
        }

        if let Some(peerid) = self.nbr_find_by_lsr_id(&lsr_id) {
            self.send_labelmapping_one(peerid, fec, true);
        }
    }

    // Withdraws a pseudowire and removes it from the LIB.
    fn pw_exit(&mut self, l2vpn_name: &str, pw_name: &str) {
        let Some(l2vpn) = self.l2vpns.get(l2vpn_name) else {
            return;
        };
        let Some(pw) = l2vpn.pws.get(pw_name) else {
            return;
        };
        let fec = Fec::Pwid {
            pw_type: l2vpn.pw_type,
            pwid: pw.pwid,
            lsr_id: pw.lsr_id,
        };
        let addr = pw.addr;
        let lsr_id = pw.lsr_id;
        let local_label =
            self.fecs.get(&fec).and_then(|fn_| fn_.local_label);

        // Tear the LSP down and withdraw the label from the remote end.
        self.send_delete_klabel(fec, addr);
        if let Some(peerid) = self.nbr_find_by_lsr_id(&lsr_id) {
            self.send_labelwithdraw(peerid, Some(fec), local_label);
        }

        if let Some(fn_) = self.fecs.get_mut(&fec) {
            fn_.nexthops.remove(&addr);
        }
        self.maybe_free_local_label(fec);
    }

    // RFC 4447 parameter negotiation on label mapping receipt. Returns
    // false when the mapping must not be recorded.
    fn pw_negotiate(&mut self, peerid: u32, fec: Fec, map: &Map) -> bool {
        let Fec::Pwid { pwid, lsr_id, .. } = fec else {
            return true;
        };

        // The advertised PW ID must match a configured pseudowire toward
        // this peer.
        let Some((l2vpn_mtu, pw)) = l2vpn_pw_find(&self.l2vpns, lsr_id, pwid)
        else {
            self.send_labelrelease(peerid, Some(fec), map.label);
            return false;
        };
        let cword_conf = pw.flags.contains(PwFlags::CWORD_CONF);
        let statustlv_conf = pw.flags.contains(PwFlags::STATUSTLV_CONF);
        let (group_id, ifmtu) = match map.fec {
            MapFec::Pwid {
                group_id, ifmtu, ..
            } => (group_id, ifmtu),
            _ => (0, None),
        };

        // The interface MTU sub-TLVs must agree.
        if let Some(ifmtu) = ifmtu {
            if ifmtu != l2vpn_mtu {
                self.send_labelrelease(peerid, Some(fec), map.label);
                self.send_notification(
                    peerid,
                    StatusCode::GenericMisconfig,
                    map.msg_id,
                    MessageType::LabelMapping as u16,
                );
                return false;
            }
        }

        // Control-word negotiation.
        if map.cword != cword_conf {
            self.send_labelrelease(peerid, Some(fec), map.label);
            self.send_notification(
                peerid,
                StatusCode::WrongCBit,
                map.msg_id,
                MessageType::LabelMapping as u16,
            );

            if cword_conf && !map.cword {
                // Match the peer: re-advertise without the control word and
                // wait for its next mapping.
                let local_label =
                    self.fecs.get(&fec).and_then(|fn_| fn_.local_label);
                let (_, pw) =
                    l2vpn_pw_find_mut(&mut self.l2vpns, lsr_id, pwid)
                        .unwrap();
                pw.flags.remove(PwFlags::CWORD);
                self.send_labelwithdraw(peerid, Some(fec), local_label);
                self.send_labelmapping_one(peerid, fec, true);
            }
            return false;
        }

        // Record the negotiated parameters.
        let (_, pw) =
            l2vpn_pw_find_mut(&mut self.l2vpns, lsr_id, pwid).unwrap();
        if map.cword {
            pw.flags.insert(PwFlags::CWORD);
        } else {
            pw.flags.remove(PwFlags::CWORD);
        }
        if map.pw_status.is_some() && statustlv_conf {
            pw.flags.insert(PwFlags::STATUSTLV);
            pw.remote_status = map.pw_status.unwrap().0;
        } else {
            pw.flags.remove(PwFlags::STATUSTLV);
            pw.remote_status = PwStatus::FORWARDING;
        }
        pw.remote_group = group_id;
        pw.remote_mtu = ifmtu;

        true
    }

    // Installs or uninstalls the pseudowire in the kernel according to the
    // current label and status state.
    fn pw_kernel_update(&mut self, fec: Fec) {
        let Fec::Pwid {
            pw_type,
            pwid,
            lsr_id,
        } = fec
        else {
            return;
        };

        let (local_label, remote_label) = match self.fecs.get(&fec) {
            Some(fn_) => {
                let remote_label = fn_
                    .nexthops
                    .values()
                    .next()
                    .and_then(|nh| nh.get_label());
                (fn_.local_label, remote_label)
            }
            None => (None, None),
        };

        let Some((_, pw)) = l2vpn_pw_find_mut(&mut self.l2vpns, lsr_id, pwid)
        else {
            return;
        };

        let ready = local_label.is_some()
            && remote_label.is_some()
            && pw.remote_forwarding();

        let kpw = Kpw {
            ifindex: pw.ifindex.unwrap_or(0),
            pw_type,
            nexthop: pw.addr,
            local_label,
            remote_label,
            cword: pw.flags.contains(PwFlags::CWORD),
        };

        if ready && !pw.is_status_up() {
            pw.flags.insert(PwFlags::STATUS_UP);
            let _ = self.tx.main.send(LdeToMainMsg::KPwLabelChange(kpw));
        } else if !ready && pw.is_status_up() {
            pw.flags.remove(PwFlags::STATUS_UP);
            let _ = self.tx.main.send(LdeToMainMsg::KPwLabelDelete(kpw));
        }
    }

    // Reevaluates the pseudowires terminating at the given address after
    // the host route toward it changed.
    fn l2vpn_sync_pws(&mut self, addr: Ipv4Addr) {
        let fecs: Vec<Fec> = self
            .l2vpns
            .values()
            .flat_map(|l2vpn| {
                l2vpn
                    .pws
                    .values()
                    .filter(|pw| pw.addr == addr)
                    .map(|pw| Fec::Pwid {
                        pw_type: l2vpn.pw_type,
                        pwid: pw.pwid,
                        lsr_id: pw.lsr_id,
                    })
            })
            .collect();
        for fec in fecs {
            self.pw_kernel_update(fec);
        }
    }

    // Remote pseudowire status update received in a notification message.
    fn process_notification(&mut self, peerid: u32, notify: Notify) {
        let Some(ln) = self.nbrs.get(&peerid) else {
            return;
        };
        let lsr_id = ln.lsr_id;
        let Some(status) = notify.pw_status else {
            return;
        };
        let Some(MapFec::Pwid {
            pw_type,
            pwid: Some(pwid),
            ..
        }) = notify.fec
        else {
            return;
        };

        let Some((_, pw)) = l2vpn_pw_find_mut(&mut self.l2vpns, lsr_id, pwid)
        else {
            return;
        };
        pw.remote_status = status.0;
        Debug::PwStatusUpdate(&pw.name.clone(), status.0).log();

        let fec = Fec::Pwid {
            pw_type,
            pwid,
            lsr_id,
        };
        self.pw_kernel_update(fec);
    }

    // ===== configuration reload =====

    fn apply_config_changes(&mut self, changes: ConfigChanges) {
        // Relabel connected prefixes when the explicit-null policy changed.
        if changes.egress_label_changed {
            self.change_egress_label();
        }

        // Tear down removed and reset pseudowires while their old state is
        // still around.
        for (l2vpn_name, pw_name) in
            changes.deleted_pws.iter().chain(changes.reset_pws.iter())
        {
            self.pw_exit(l2vpn_name, pw_name);
        }

        // Synchronize the L2VPN trees with the new configuration.
        self.sync_l2vpns();

        // Initialize new and reset pseudowires.
        for (l2vpn_name, pw_name) in
            changes.new_pws.iter().chain(changes.reset_pws.iter())
        {
            self.pw_init(l2vpn_name, pw_name);
        }
    }

    fn sync_l2vpns(&mut self) {
        let mut l2vpns = BTreeMap::new();
        for cfg in &self.config.l2vpns {
            let mut l2vpn = L2vpn::from_config(cfg);
            // Carry over runtime state of unchanged pseudowires and member
            // interfaces.
            if let Some(old) = self.l2vpns.get(&cfg.name) {
                for (name, pw) in l2vpn.pws.iter_mut() {
                    if let Some(old_pw) = old.pws.get(name) {
                        pw.ifindex = old_pw.ifindex;
                        pw.remote_group = old_pw.remote_group;
                        pw.remote_mtu = old_pw.remote_mtu;
                        pw.remote_status = old_pw.remote_status;
                        pw.flags = old_pw.flags;
                    }
                }
                for (name, lif) in l2vpn.interfaces.iter_mut() {
                    if let Some(old_lif) = old.interfaces.get(name) {
                        lif.ifindex = old_lif.ifindex;
                        lif.operative = old_lif.operative;
                    }
                }
            }
            l2vpns.insert(cfg.name.clone(), l2vpn);
        }
        self.l2vpns = l2vpns;
    }

    // Re-withdraws and re-advertises all connected-prefix labels following
    // an explicit-null policy change.
    fn change_egress_label(&mut self) {
        let new_label = Lde::egress_label(&self.config);
        let connected: Vec<(Fec, Option<Label>)> = self
            .fecs
            .iter()
            .filter(|(_, fn_)| fn_.connected && fn_.local_label.is_some())
            .map(|(fec, fn_)| (*fec, fn_.local_label))
            .collect();

        for (fec, old_label) in connected {
            self.send_labelwithdraw_all(Some(fec), old_label);
            let fn_ = self.fecs.get_mut(&fec).unwrap();
            fn_.set_local_label(Some(new_label));
            self.send_labelmapping_all(fec);
        }
    }

    // ===== garbage collection =====

    // Reclaims LIB entries with no nexthops and no label bindings left.
    pub fn process_gc_timer(&mut self) {
        let orphans: Vec<Fec> = self
            .fecs
            .iter()
            .filter(|(_, fn_)| fn_.is_orphan())
            .map(|(fec, _)| *fec)
            .collect();
        let count = orphans.len();
        for fec in orphans {
            self.fecs.remove(&fec);
        }
        if count > 0 {
            Debug::GcCollected(count).log();
        }
    }

    // ===== control socket queries =====

    fn process_show_lib(&self, client_id: u64) {
        for (fec, fn_) in &self.fecs {
            if fn_.nexthops.is_empty() {
                // Retained mappings without a route.
                for (lsr_id, mapping) in &fn_.downstream {
                    let entry = CtlRt {
                        fec: fec.to_string(),
                        nexthop: Some(*lsr_id),
                        local_label: fn_.local_label,
                        remote_label: Some(mapping.label),
                        in_use: false,
                    };
                    let _ = self.tx.ldpe.send(LdeToLdpeMsg::CtlLibEntry {
                        client_id,
                        entry,
                    });
                }
            } else {
                for nh in fn_.nexthops.values() {
                    let entry = CtlRt {
                        fec: fec.to_string(),
                        nexthop: Some(nh.nexthop),
                        local_label: fn_.local_label,
                        remote_label: nh.get_label(),
                        in_use: nh.get_label().is_some(),
                    };
                    let _ = self.tx.ldpe.send(LdeToLdpeMsg::CtlLibEntry {
                        client_id,
                        entry,
                    });
                }
            }
        }
        let _ = self.tx.ldpe.send(LdeToLdpeMsg::CtlEnd { client_id });
    }

    fn process_show_l2vpn_pw(&self, client_id: u64) {
        for l2vpn in self.l2vpns.values() {
            for pw in l2vpn.pws.values() {
                let fec = Fec::Pwid {
                    pw_type: l2vpn.pw_type,
                    pwid: pw.pwid,
                    lsr_id: pw.lsr_id,
                };
                let fn_ = self.fecs.get(&fec);
                let entry = CtlPw {
                    l2vpn: l2vpn.name.clone(),
                    ifname: pw.ifname.clone(),
                    pwid: pw.pwid,
                    lsr_id: pw.lsr_id,
                    local_label: fn_.and_then(|fn_| fn_.local_label),
                    remote_label: fn_.and_then(|fn_| {
                        fn_.nexthops
                            .values()
                            .next()
                            .and_then(|nh| nh.get_label())
                    }),
                    remote_mtu: pw.remote_mtu,
                    status_up: pw.is_status_up(),
                };
                let _ = self
                    .tx
                    .ldpe
                    .send(LdeToLdpeMsg::CtlPw { client_id, entry });
            }
        }
        let _ = self.tx.ldpe.send(LdeToLdpeMsg::CtlEnd { client_id });
    }
}

// ===== helper functions =====

// Converts a process-neutral FEC into a LIB key. Wildcards and PW ID-less
// pseudowire FECs have no direct key.
fn map_to_fec(map_fec: &MapFec, lsr_id: Ipv4Addr) -> Option<Fec> {
    match map_fec {
        MapFec::Wildcard => None,
        MapFec::Prefix(prefix) => Some(Fec::Ipv4(*prefix)),
        MapFec::Pwid {
            pw_type,
            pwid: Some(pwid),
            ..
        } => Some(Fec::Pwid {
            pw_type: *pw_type,
            pwid: *pwid,
            lsr_id,
        }),
        MapFec::Pwid { pwid: None, .. } => None,
    }
}

// Looks up a pseudowire by its remote end and PW ID, returning the
// enclosing l2vpn's MTU along with it.
fn l2vpn_pw_find(
    l2vpns: &BTreeMap<String, L2vpn>,
    lsr_id: Ipv4Addr,
    pwid: u32,
) -> Option<(u16, &L2vpnPw)> {
    for l2vpn in l2vpns.values() {
        for pw in l2vpn.pws.values() {
            if pw.lsr_id == lsr_id && pw.pwid == pwid {
                return Some((l2vpn.mtu, pw));
            }
        }
    }
    None
}

fn l2vpn_pw_find_mut(
    l2vpns: &mut BTreeMap<String, L2vpn>,
    lsr_id: Ipv4Addr,
    pwid: u32,
) -> Option<(u16, &mut L2vpnPw)> {
    for l2vpn in l2vpns.values_mut() {
        let mtu = l2vpn.mtu;
        for pw in l2vpn.pws.values_mut() {
            if pw.lsr_id == lsr_id && pw.pwid == pwid {
                return Some((mtu, pw));
            }
        }
    }
    None
}

// Entry point used by the daemon: builds the engine and runs it to
// completion.
pub async fn run(config: Config, pipes: LdePipes) {
    let tx = LdeChannelsTx {
        ldpe: pipes.to_ldpe.clone(),
        main: pipes.to_main.clone(),
    };
    let lde = Lde::new(config, tx);
    lde.run(pipes).await;
}
