//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU32};

use ldpd_packet::{AddressMessageType, LabelMessageType};
use ldpd_utils::Sender;
use ldpd_utils::config::{Config, ConfigChanges};
use ldpd_utils::ibus::{
    CtlAdj, CtlIface, CtlMsg, CtlNbr, IbusSender, Kaddr, KifUpdate,
    LdeToLdpeMsg, LdpePipes, LdpeToLdeMsg, LdpeToMainMsg, MainToLdpeMsg,
};
use ldpd_utils::socket::{McastMemberships, TcpListener, UdpSocket};
use ldpd_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, UnboundedSender};

use crate::collections::{Adjacencies, Interfaces, Neighbors, TargetedNbrs};
use crate::control;
use crate::discovery::TargetedNbr;
use crate::error::{Error, IoError};
use crate::events;
use crate::neighbor::{Neighbor, fsm};
use crate::network::{tcp, udp};
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    AdjTimeoutMsg, ControlMsg, NbrInitBackoffTimeoutMsg, NbrKaTimeoutMsg,
    NbrRxPduMsg, TcpAcceptMsg, TcpConnectMsg, UdpRxPduMsg,
};

// The LDP engine: discovery, adjacency tracking and per-neighbor sessions.
#[derive(Debug)]
pub struct Ldpe {
    // Running configuration (LDPE view).
    pub config: Config,
    // Configuration tree being streamed in during a reload.
    pub pending_conf: Option<Config>,
    // Interfaces and targeted neighbors.
    pub interfaces: Interfaces,
    pub tneighbors: TargetedNbrs,
    // Engine state.
    pub state: LdpeState,
    // Tx channels.
    pub tx: LdpeChannelsTx,
    // Connected control clients.
    pub ctl_clients: HashMap<u64, UnboundedSender<CtlMsg>>,
    // Targeted-neighbor references held by pseudowires, keyed by
    // (l2vpn name, pseudowire name).
    pub pw_targets: HashMap<(String, String), Ipv4Addr>,
}

#[derive(Debug)]
pub struct LdpeState {
    pub router_id: Ipv4Addr,
    pub trans_addr: Ipv4Addr,
    // Global message ID.
    pub msg_id: Arc<AtomicU32>,
    // Local addresses advertised in Address messages.
    pub addr_list: BTreeSet<Ipv4Addr>,
    // Discovery adjacencies and session neighbors.
    pub adjacencies: Adjacencies,
    pub neighbors: Neighbors,
    // UDP discovery socket.
    pub disc_socket: Arc<UdpSocket>,
    // UDP extended discovery socket.
    pub edisc_socket: Arc<UdpSocket>,
    // TCP listening socket.
    pub session_socket: Arc<TcpListener>,
    // Multicast group memberships.
    pub mcast_memberships: McastMemberships,
    // Long-running I/O tasks.
    tasks: LdpeTasks,
}

#[derive(Debug)]
struct LdpeTasks {
    _disc_rx: Task<()>,
    edisc_rx: Task<()>,
    tcp_listener: Task<()>,
}

#[derive(Clone, Debug)]
pub struct LdpeChannelsTx {
    pub proto: ProtocolInputChannelsTx,
    pub lde: IbusSender<LdpeToLdeMsg>,
    pub main: IbusSender<LdpeToMainMsg>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // UDP Rx event.
    pub udp_pdu_rx: Sender<UdpRxPduMsg>,
    // Adjacency timeout event.
    pub adj_timeout: Sender<AdjTimeoutMsg>,
    // TCP accept event.
    pub tcp_accept: Sender<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Sender<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_pdu_rx: Sender<NbrRxPduMsg>,
    // Neighbor keepalive timeout event.
    pub nbr_ka_timeout: Sender<NbrKaTimeoutMsg>,
    // Neighbor initialization backoff timeout event.
    pub nbr_initdelay: Sender<NbrInitBackoffTimeoutMsg>,
    // Control socket event.
    pub control: Sender<ControlMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub udp_pdu_rx: Receiver<UdpRxPduMsg>,
    pub adj_timeout: Receiver<AdjTimeoutMsg>,
    pub tcp_accept: Receiver<TcpAcceptMsg>,
    pub tcp_connect: Receiver<TcpConnectMsg>,
    pub nbr_pdu_rx: Receiver<NbrRxPduMsg>,
    pub nbr_ka_timeout: Receiver<NbrKaTimeoutMsg>,
    pub nbr_initdelay: Receiver<NbrInitBackoffTimeoutMsg>,
    pub control: Receiver<ControlMsg>,
}

// ===== impl Ldpe =====

impl Ldpe {
    pub fn new(
        config: Config,
        tx: LdpeChannelsTx,
        state: LdpeState,
    ) -> Ldpe {
        let mut ldpe = Ldpe {
            config,
            pending_conf: None,
            interfaces: Default::default(),
            tneighbors: Default::default(),
            state,
            tx,
            ctl_clients: HashMap::new(),
            pw_targets: HashMap::new(),
        };
        ldpe.apply_config();
        ldpe
    }

    // Instantiates the configured interfaces, targeted neighbors and
    // pseudowire references.
    fn apply_config(&mut self) {
        for cfg in self.config.interfaces.clone() {
            let (_, iface) = self.interfaces.insert(&cfg.name);
            iface.config = Some(cfg);
        }

        for cfg in self.config.tnbrs.clone() {
            let (tnbr_idx, tnbr) = self.tneighbors.insert(cfg.address);
            tnbr.configured = true;
            tnbr.hello_holdtime = cfg.hello_holdtime;
            tnbr.hello_interval = cfg.hello_interval;
            TargetedNbr::update(
                &mut self.tneighbors,
                &mut self.state,
                &self.config,
                &self.tx,
                tnbr_idx,
            );
        }

        for l2vpn in self.config.l2vpns.clone() {
            for pw in &l2vpn.pseudowires {
                self.pw_target_acquire(
                    (l2vpn.name.clone(), pw.name.clone()),
                    pw.lsr_id,
                );
            }
        }
    }

    // Takes a pseudowire reference on the targeted neighbor pointing at the
    // pseudowire's remote end.
    fn pw_target_acquire(&mut self, key: (String, String), addr: Ipv4Addr) {
        self.pw_targets.insert(key, addr);
        let (tnbr_idx, tnbr) = self.tneighbors.insert(addr);
        tnbr.pw_count += 1;
        tnbr.hello_holdtime = self.config.targeted_hello_holdtime;
        tnbr.hello_interval = self.config.targeted_hello_interval;
        TargetedNbr::update(
            &mut self.tneighbors,
            &mut self.state,
            &self.config,
            &self.tx,
            tnbr_idx,
        );
    }

    // Releases a pseudowire reference, possibly tearing the targeted
    // neighbor down.
    fn pw_target_release(&mut self, key: &(String, String)) {
        let Some(addr) = self.pw_targets.remove(key) else {
            return;
        };
        if let Some((tnbr_idx, tnbr)) = self.tneighbors.get_mut_by_addr(&addr)
        {
            tnbr.pw_count = tnbr.pw_count.saturating_sub(1);
            TargetedNbr::update(
                &mut self.tneighbors,
                &mut self.state,
                &self.config,
                &self.tx,
                tnbr_idx,
            );
        }
    }

    // Main event loop.
    pub async fn run(
        mut self,
        mut pipes: LdpePipes,
        mut proto_rx: ProtocolInputChannelsRx,
    ) {
        loop {
            tokio::select! {
                msg = pipes.from_main.recv() => {
                    match msg {
                        Some(msg) => self.process_main_msg(msg),
                        None => break,
                    }
                }
                msg = pipes.from_lde.recv() => {
                    match msg {
                        Some(msg) => self.process_lde_msg(msg),
                        None => break,
                    }
                }
                msg = proto_rx.recv() => {
                    match msg {
                        Some(msg) => self.process_protocol_msg(msg),
                        None => break,
                    }
                }
            }
        }
    }

    // ===== parent pipe =====

    pub fn process_main_msg(&mut self, msg: MainToLdpeMsg) {
        match msg {
            MainToLdpeMsg::IfStatus(kif) => {
                self.process_ifstatus(kif);
            }
            MainToLdpeMsg::NewAddr(kaddr) => {
                self.process_addr_add(kaddr);
            }
            MainToLdpeMsg::DelAddr(kaddr) => {
                self.process_addr_del(kaddr);
            }
            MainToLdpeMsg::Reconf(msg) => {
                if let Some(new_conf) =
                    Config::reconf_accumulate(&mut self.pending_conf, msg)
                {
                    let changes = self.config.merge(new_conf);
                    self.apply_config_changes(changes);
                }
            }
        }
    }

    fn process_ifstatus(&mut self, kif: KifUpdate) {
        if let Some((_, iface)) = self
            .interfaces
            .update_ifindex(&kif.ifname, Some(kif.ifindex))
        {
            iface.system.operative = kif.operative;
            iface.system.loopback = kif.loopback;
            iface.system.mtu = kif.mtu;
            iface.update(&mut self.state, &self.config, &self.tx);
        }
    }

    fn process_addr_add(&mut self, kaddr: Kaddr) {
        let addr = kaddr.addr.ip();

        // Add address to the global list and inform the neighbors.
        if self.state.addr_list.insert(addr) {
            let msg_id = self.state.msg_id.clone();
            for nbr in self
                .state
                .neighbors
                .iter_mut()
                .filter(|nbr| nbr.is_operational())
            {
                nbr.send_address(
                    &msg_id,
                    AddressMessageType::Address,
                    BTreeSet::from([addr]),
                );
            }
        }

        // Check if LDP needs to be activated on the interface.
        if let Some((_, iface)) =
            self.interfaces.get_mut_by_ifindex(kaddr.ifindex)
        {
            if iface.system.addr_list.insert(kaddr.addr) {
                iface.update(&mut self.state, &self.config, &self.tx);
            }
        }
    }

    fn process_addr_del(&mut self, kaddr: Kaddr) {
        let addr = kaddr.addr.ip();

        // Remove address from the global list and inform the neighbors.
        if self.state.addr_list.remove(&addr) {
            let msg_id = self.state.msg_id.clone();
            for nbr in self
                .state
                .neighbors
                .iter_mut()
                .filter(|nbr| nbr.is_operational())
            {
                nbr.send_address(
                    &msg_id,
                    AddressMessageType::AddressWithdraw,
                    BTreeSet::from([addr]),
                );
            }
        }

        // Check if LDP needs to be deactivated on the interface.
        if let Some((_, iface)) =
            self.interfaces.get_mut_by_ifindex(kaddr.ifindex)
        {
            if iface.system.addr_list.remove(&kaddr.addr) {
                iface.update(&mut self.state, &self.config, &self.tx);
            }
        }
    }

    // ===== configuration reload =====

    fn apply_config_changes(&mut self, changes: ConfigChanges) {
        // A keepalive change stops all pending initialization backoffs.
        if changes.keepalive_changed {
            for nbr in self.state.neighbors.iter_mut() {
                nbr.stop_initdelay_timeout();
            }
        }

        // A transport address change tears down every session and rebinds
        // the extended discovery and session sockets.
        if changes.trans_addr_changed {
            self.shutdown_all_sessions();
            self.state.trans_addr = self.config.trans_addr();
            if let Err(error) = self.state.rebind_sockets(&self.tx.proto) {
                error.log();
            }
            for nbr in self.state.neighbors.iter_mut() {
                nbr.laddr = self.config.trans_addr();
            }
            // Reinstall the MD5 keys on the new listening socket.
            for nbr in self.state.neighbors.iter() {
                if let Some(password) = self.config.nbr_password(&nbr.lsr_id)
                {
                    nbr.set_listener_md5sig(
                        &self.state.session_socket,
                        Some(password),
                    );
                }
            }
        }

        // Garbage-collect dynamic targeted neighbors when the acceptance
        // policy is turned off.
        if changes.th_accept_disabled {
            for tnbr_idx in self.tneighbors.indexes().collect::<Vec<_>>() {
                let tnbr = &mut self.tneighbors[tnbr_idx];
                if tnbr.dynamic {
                    tnbr.dynamic = false;
                    TargetedNbr::update(
                        &mut self.tneighbors,
                        &mut self.state,
                        &self.config,
                        &self.tx,
                        tnbr_idx,
                    );
                }
            }
        }

        // Interfaces.
        for name in &changes.deleted_ifaces {
            if let Some((_, iface)) = self.interfaces.get_mut_by_name(name) {
                iface.config = None;
                iface.update(&mut self.state, &self.config, &self.tx);
            }
        }
        for name in &changes.new_ifaces {
            let cfg = self.config.iface(name).cloned();
            let (_, iface) = self.interfaces.insert(name);
            iface.config = cfg;
            iface.update(&mut self.state, &self.config, &self.tx);
        }
        for name in &changes.updated_ifaces {
            let cfg = self.config.iface(name).cloned();
            if let Some((_, iface)) = self.interfaces.get_mut_by_name(name) {
                iface.config = cfg;
                iface.sync_hello_tx(&self.state);
            }
        }

        // Targeted neighbors.
        for addr in &changes.deleted_tnbrs {
            if let Some((tnbr_idx, tnbr)) =
                self.tneighbors.get_mut_by_addr(addr)
            {
                tnbr.configured = false;
                TargetedNbr::update(
                    &mut self.tneighbors,
                    &mut self.state,
                    &self.config,
                    &self.tx,
                    tnbr_idx,
                );
            }
        }
        for addr in &changes.new_tnbrs {
            let cfg = self.config.tnbr(addr).cloned();
            let (tnbr_idx, tnbr) = self.tneighbors.insert(*addr);
            tnbr.configured = true;
            if let Some(cfg) = cfg {
                tnbr.hello_holdtime = cfg.hello_holdtime;
                tnbr.hello_interval = cfg.hello_interval;
            }
            TargetedNbr::update(
                &mut self.tneighbors,
                &mut self.state,
                &self.config,
                &self.tx,
                tnbr_idx,
            );
        }
        for addr in &changes.updated_tnbrs {
            let cfg = self.config.tnbr(addr).cloned();
            if let Some((_, tnbr)) = self.tneighbors.get_mut_by_addr(addr) {
                if let Some(cfg) = cfg {
                    tnbr.hello_holdtime = cfg.hello_holdtime;
                    tnbr.hello_interval = cfg.hello_interval;
                }
                tnbr.sync_hello_tx(&self.state);
            }
        }

        // Neighbor parameters: any change requires a session restart so the
        // TCP MD5 keys can be reinstalled on fresh sockets.
        for lsr_id in changes
            .deleted_nbrps
            .iter()
            .chain(changes.new_nbrps.iter())
            .chain(changes.updated_nbrps.iter())
        {
            let password = self.config.nbr_password(lsr_id).map(String::from);
            if let Some((nbr_idx, nbr)) =
                self.state.neighbors.get_mut_by_lsr_id(lsr_id)
            {
                if nbr.state.intersects(fsm::State::SESSION) {
                    let msg_id = self.state.msg_id.clone();
                    let nbr = &mut self.state.neighbors[nbr_idx];
                    nbr.send_shutdown(&msg_id, 0, 0);
                    Neighbor::fsm(
                        &mut self.state,
                        &self.config,
                        &self.tx,
                        nbr_idx,
                        fsm::Event::CloseSession,
                    );
                }
                let nbr = &self.state.neighbors[nbr_idx];
                nbr.set_listener_md5sig(
                    &self.state.session_socket,
                    password.as_deref(),
                );
            }
        }

        // Pseudowire targeted-neighbor references.
        for key in changes
            .deleted_pws
            .iter()
            .chain(changes.reset_pws.iter())
        {
            self.pw_target_release(key);
        }
        for (l2vpn_name, pw_name) in
            changes.new_pws.iter().chain(changes.reset_pws.iter())
        {
            let Some(pw) = self
                .config
                .l2vpn(l2vpn_name)
                .and_then(|l2vpn| {
                    l2vpn.pseudowires.iter().find(|pw| pw.name == *pw_name)
                })
                .cloned()
            else {
                continue;
            };
            self.pw_target_acquire(
                (l2vpn_name.clone(), pw_name.clone()),
                pw.lsr_id,
            );
        }
    }

    fn shutdown_all_sessions(&mut self) {
        for nbr_idx in self.state.neighbors.indexes().collect::<Vec<_>>() {
            let nbr = &self.state.neighbors[nbr_idx];
            if nbr.state.intersects(fsm::State::SESSION) {
                let msg_id = self.state.msg_id.clone();
                let nbr = &mut self.state.neighbors[nbr_idx];
                nbr.send_shutdown(&msg_id, 0, 0);
                Neighbor::fsm(
                    &mut self.state,
                    &self.config,
                    &self.tx,
                    nbr_idx,
                    fsm::Event::CloseSession,
                );
            }
        }
    }

    // ===== LDE pipe =====

    pub fn process_lde_msg(&mut self, msg: LdeToLdpeMsg) {
        match msg {
            LdeToLdpeMsg::MappingAdd { peerid, map } => {
                if let Some((_, nbr)) =
                    self.state.neighbors.get_mut_by_peerid(peerid)
                {
                    if nbr.is_operational() {
                        nbr.mapping_list.push(map);
                    }
                }
            }
            LdeToLdpeMsg::MappingAddEnd { peerid } => {
                self.label_batch_end(peerid, LabelMessageType::LabelMapping);
            }
            LdeToLdpeMsg::RequestAdd { peerid, map } => {
                if let Some((_, nbr)) =
                    self.state.neighbors.get_mut_by_peerid(peerid)
                {
                    if nbr.is_operational() {
                        nbr.request_list.push(map);
                    }
                }
            }
            LdeToLdpeMsg::RequestAddEnd { peerid } => {
                self.label_batch_end(peerid, LabelMessageType::LabelRequest);
            }
            LdeToLdpeMsg::ReleaseAdd { peerid, map } => {
                if let Some((_, nbr)) =
                    self.state.neighbors.get_mut_by_peerid(peerid)
                {
                    if nbr.is_operational() {
                        nbr.release_list.push(map);
                    }
                }
            }
            LdeToLdpeMsg::ReleaseAddEnd { peerid } => {
                self.label_batch_end(peerid, LabelMessageType::LabelRelease);
            }
            LdeToLdpeMsg::WithdrawAdd { peerid, map } => {
                if let Some((_, nbr)) =
                    self.state.neighbors.get_mut_by_peerid(peerid)
                {
                    if nbr.is_operational() {
                        nbr.withdraw_list.push(map);
                    }
                }
            }
            LdeToLdpeMsg::WithdrawAddEnd { peerid } => {
                self.label_batch_end(peerid, LabelMessageType::LabelWithdraw);
            }
            LdeToLdpeMsg::NotificationSend { peerid, notify } => {
                let fatal = notify.status_code & 0x8000_0000 != 0;
                if let Some((nbr_idx, nbr)) =
                    self.state.neighbors.get_mut_by_peerid(peerid)
                {
                    if !nbr.is_operational() {
                        return;
                    }
                    let msg_id = self.state.msg_id.clone();
                    let nbr = &mut self.state.neighbors[nbr_idx];
                    nbr.send_notification_full(&msg_id, notify);
                    if fatal {
                        Neighbor::fsm(
                            &mut self.state,
                            &self.config,
                            &self.tx,
                            nbr_idx,
                            fsm::Event::CloseSession,
                        );
                    }
                }
            }
            LdeToLdpeMsg::CtlLibEntry { client_id, entry } => {
                self.ctl_reply(client_id, CtlMsg::LibEntry(entry));
            }
            LdeToLdpeMsg::CtlPw { client_id, entry } => {
                self.ctl_reply(client_id, CtlMsg::Pw(entry));
            }
            LdeToLdpeMsg::CtlEnd { client_id } => {
                self.ctl_reply(client_id, CtlMsg::End);
            }
        }
    }

    fn label_batch_end(&mut self, peerid: u32, msg_type: LabelMessageType) {
        let Some((nbr_idx, nbr)) =
            self.state.neighbors.get_mut_by_peerid(peerid)
        else {
            return;
        };
        if !nbr.is_operational() {
            return;
        }

        let maps = match msg_type {
            LabelMessageType::LabelMapping => {
                std::mem::take(&mut nbr.mapping_list)
            }
            LabelMessageType::LabelRequest => {
                std::mem::take(&mut nbr.request_list)
            }
            LabelMessageType::LabelWithdraw => {
                std::mem::take(&mut nbr.withdraw_list)
            }
            LabelMessageType::LabelRelease => {
                std::mem::take(&mut nbr.release_list)
            }
            LabelMessageType::LabelAbortReq => return,
        };
        if maps.is_empty() {
            return;
        }

        let msg_id = self.state.msg_id.clone();
        let nbr = &mut self.state.neighbors[nbr_idx];
        nbr.send_labelmessage(&msg_id, msg_type, maps);
        Neighbor::fsm(
            &mut self.state,
            &self.config,
            &self.tx,
            nbr_idx,
            fsm::Event::PduSent,
        );
    }

    // ===== protocol input =====

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            // Received UDP discovery PDU.
            ProtocolInputMsg::UdpRxPdu(msg) => {
                events::process_udp_pdu(
                    self,
                    msg.src_addr,
                    msg.multicast,
                    msg.pdu,
                );
            }
            // Adjacency's inactivity timer has expired.
            ProtocolInputMsg::AdjTimeout(msg) => {
                if let Err(error) =
                    events::process_adj_timeout(self, msg.adj_id)
                {
                    error.log();
                }
            }
            // Accepted TCP connection request.
            ProtocolInputMsg::TcpAccept(mut msg) => {
                events::process_tcp_accept(
                    self,
                    msg.stream(),
                    msg.conn_info,
                );
            }
            // Established TCP connection.
            ProtocolInputMsg::TcpConnect(mut msg) => {
                if let Err(error) = events::process_tcp_connect(
                    self,
                    msg.nbr_id,
                    msg.stream(),
                    msg.conn_info,
                ) {
                    error.log();
                }
            }
            // Received PDU from neighbor.
            ProtocolInputMsg::NbrRxPdu(msg) => {
                if let Err(error) =
                    events::process_nbr_pdu(self, msg.nbr_id, msg.pdu)
                {
                    error.log();
                }
            }
            // Neighbor's keepalive timeout has expired.
            ProtocolInputMsg::NbrKaTimeout(msg) => {
                if let Err(error) =
                    events::process_nbr_ka_timeout(self, msg.nbr_id)
                {
                    error.log();
                }
            }
            // Neighbor's initialization backoff timeout has expired.
            ProtocolInputMsg::NbrInitBackoffTimeout(msg) => {
                events::process_nbr_initdelay_timeout(self, msg.lsr_id);
            }
            // Control socket event.
            ProtocolInputMsg::Control(msg) => {
                self.process_control_msg(msg);
            }
        }
    }

    // ===== control socket =====

    fn process_control_msg(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Connected { client_id, replies } => {
                self.ctl_clients.insert(client_id, replies);
            }
            ControlMsg::Disconnected { client_id } => {
                self.ctl_clients.remove(&client_id);
            }
            ControlMsg::Request { client_id, msg } => {
                self.process_ctl_request(client_id, msg);
            }
        }
    }

    fn ctl_reply(&self, client_id: u64, msg: CtlMsg) {
        if let Some(replies) = self.ctl_clients.get(&client_id) {
            let _ = replies.send(msg);
        }
    }

    fn process_ctl_request(&mut self, client_id: u64, msg: CtlMsg) {
        match msg {
            CtlMsg::ShowInterfaces => {
                for iface in self.interfaces.iter() {
                    let adj_count = iface
                        .state
                        .as_ref()
                        .and_then(|_| {
                            self.state.adjacencies.get_by_iface(iface.id)
                        })
                        .map(|adjs| adjs.len() as u16)
                        .unwrap_or(0);
                    let entry = CtlIface {
                        name: iface.name.clone(),
                        ifindex: iface.system.ifindex.unwrap_or(0),
                        state: if iface.is_active() {
                            "ACTIVE".to_owned()
                        } else {
                            "DOWN".to_owned()
                        },
                        uptime: iface
                            .state
                            .as_ref()
                            .map(|state| state.uptime.elapsed().as_secs())
                            .unwrap_or(0),
                        adj_count,
                        hello_holdtime: iface.hello_holdtime(),
                        hello_interval: iface
                            .config
                            .as_ref()
                            .map(|cfg| cfg.hello_interval)
                            .unwrap_or(0),
                    };
                    self.ctl_reply(client_id, CtlMsg::Iface(entry));
                }
                self.ctl_reply(client_id, CtlMsg::End);
            }
            CtlMsg::ShowDiscovery => {
                for adj in self.state.adjacencies.iter() {
                    let ifname = adj.source.iface_id.and_then(|iface_id| {
                        self.interfaces
                            .get_by_id(iface_id)
                            .ok()
                            .map(|(_, iface)| iface.name.clone())
                    });
                    let entry = CtlAdj {
                        lsr_id: adj.lsr_id,
                        targeted: adj.source.iface_id.is_none(),
                        ifname,
                        src_addr: adj.source.addr,
                        holdtime: adj.holdtime_negotiated,
                    };
                    self.ctl_reply(client_id, CtlMsg::Adjacency(entry));
                }
                self.ctl_reply(client_id, CtlMsg::End);
            }
            CtlMsg::ShowNeighbors => {
                for nbr in self.state.neighbors.iter() {
                    let entry = CtlNbr {
                        lsr_id: nbr.lsr_id,
                        addr: nbr.addr,
                        state: nbr.state.name().to_owned(),
                        uptime: nbr
                            .uptime
                            .map(|uptime| uptime.elapsed().as_secs()),
                    };
                    self.ctl_reply(client_id, CtlMsg::Neighbor(entry));
                }
                self.ctl_reply(client_id, CtlMsg::End);
            }
            CtlMsg::ShowLib => {
                let _ = self.tx.lde.send(LdpeToLdeMsg::ShowLib { client_id });
            }
            CtlMsg::ShowL2vpnPw => {
                let _ = self
                    .tx
                    .lde
                    .send(LdpeToLdeMsg::ShowL2vpnPw { client_id });
            }
            CtlMsg::FibCouple => {
                let _ = self.tx.main.send(LdpeToMainMsg::FibCouple);
                self.ctl_reply(client_id, CtlMsg::End);
            }
            CtlMsg::FibDecouple => {
                let _ = self.tx.main.send(LdpeToMainMsg::FibDecouple);
                self.ctl_reply(client_id, CtlMsg::End);
            }
            CtlMsg::Reload => {
                let _ = self.tx.main.send(LdpeToMainMsg::Reload);
                self.ctl_reply(client_id, CtlMsg::End);
            }
            CtlMsg::LogVerbose(verbose) => {
                let _ =
                    self.tx.main.send(LdpeToMainMsg::LogVerbose(verbose));
                self.ctl_reply(client_id, CtlMsg::End);
            }
            // Reply messages are never valid requests.
            _ => {
                self.ctl_reply(client_id, CtlMsg::End);
            }
        }
    }
}

// ===== impl LdpeState =====

impl LdpeState {
    pub fn new(
        router_id: Ipv4Addr,
        trans_addr: Ipv4Addr,
        proto_tx: &ProtocolInputChannelsTx,
    ) -> Result<LdpeState, Error> {
        // Create UDP/TCP sockets.
        let disc_socket = udp::discovery_socket(Ipv4Addr::UNSPECIFIED)
            .map(Arc::new)
            .map_err(IoError::UdpSocketError)?;
        let edisc_socket = udp::discovery_socket(trans_addr)
            .map(Arc::new)
            .map_err(IoError::UdpSocketError)?;
        let session_socket = tcp::listen_socket(trans_addr)
            .map(Arc::new)
            .map_err(IoError::TcpSocketError)?;

        // Start UDP/TCP tasks.
        let disc_rx =
            tasks::basic_discovery_rx(&disc_socket, &proto_tx.udp_pdu_rx);
        let edisc_rx =
            tasks::extended_discovery_rx(&edisc_socket, &proto_tx.udp_pdu_rx);
        let tcp_listener =
            tasks::tcp_listener(&session_socket, &proto_tx.tcp_accept);

        Ok(LdpeState {
            router_id,
            trans_addr,
            msg_id: Arc::new(AtomicU32::new(0)),
            addr_list: Default::default(),
            adjacencies: Default::default(),
            neighbors: Default::default(),
            disc_socket,
            edisc_socket,
            session_socket,
            mcast_memberships: Default::default(),
            tasks: LdpeTasks {
                _disc_rx: disc_rx,
                edisc_rx,
                tcp_listener,
            },
        })
    }

    // Recreates the sockets bound to the transport address.
    pub(crate) fn rebind_sockets(
        &mut self,
        proto_tx: &ProtocolInputChannelsTx,
    ) -> Result<(), Error> {
        let edisc_socket = udp::discovery_socket(self.trans_addr)
            .map(Arc::new)
            .map_err(IoError::UdpSocketError)?;
        let session_socket = tcp::listen_socket(self.trans_addr)
            .map(Arc::new)
            .map_err(IoError::TcpSocketError)?;

        self.tasks.edisc_rx =
            tasks::extended_discovery_rx(&edisc_socket, &proto_tx.udp_pdu_rx);
        self.tasks.tcp_listener =
            tasks::tcp_listener(&session_socket, &proto_tx.tcp_accept);
        self.edisc_socket = edisc_socket;
        self.session_socket = session_socket;

        Ok(())
    }

    pub fn get_next_msg_id(msg_id: &Arc<AtomicU32>) -> u32 {
        msg_id.fetch_add(1, atomic::Ordering::Relaxed)
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl ProtocolInputChannelsRx {
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            msg = self.udp_pdu_rx.recv() => {
                msg.map(ProtocolInputMsg::UdpRxPdu)
            }
            msg = self.adj_timeout.recv() => {
                msg.map(ProtocolInputMsg::AdjTimeout)
            }
            msg = self.tcp_accept.recv() => {
                msg.map(ProtocolInputMsg::TcpAccept)
            }
            msg = self.tcp_connect.recv() => {
                msg.map(ProtocolInputMsg::TcpConnect)
            }
            msg = self.nbr_pdu_rx.recv() => {
                msg.map(ProtocolInputMsg::NbrRxPdu)
            }
            msg = self.nbr_ka_timeout.recv() => {
                msg.map(ProtocolInputMsg::NbrKaTimeout)
            }
            msg = self.nbr_initdelay.recv() => {
                msg.map(ProtocolInputMsg::NbrInitBackoffTimeout)
            }
            msg = self.control.recv() => {
                msg.map(ProtocolInputMsg::Control)
            }
        }
    }
}

// ===== global functions =====

pub fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (udp_pdu_rxp, udp_pdu_rxc) = mpsc::channel(4);
    let (adj_timeoutp, adj_timeoutc) = mpsc::channel(4);
    let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
    let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
    let (nbr_pdu_rxp, nbr_pdu_rxc) = mpsc::channel(4);
    let (nbr_ka_timeoutp, nbr_ka_timeoutc) = mpsc::channel(4);
    let (nbr_initdelayp, nbr_initdelayc) = mpsc::channel(4);
    let (controlp, controlc) = mpsc::channel(4);

    let tx = ProtocolInputChannelsTx {
        udp_pdu_rx: udp_pdu_rxp,
        adj_timeout: adj_timeoutp,
        tcp_accept: tcp_acceptp,
        tcp_connect: tcp_connectp,
        nbr_pdu_rx: nbr_pdu_rxp,
        nbr_ka_timeout: nbr_ka_timeoutp,
        nbr_initdelay: nbr_initdelayp,
        control: controlp,
    };
    let rx = ProtocolInputChannelsRx {
        udp_pdu_rx: udp_pdu_rxc,
        adj_timeout: adj_timeoutc,
        tcp_accept: tcp_acceptc,
        tcp_connect: tcp_connectc,
        nbr_pdu_rx: nbr_pdu_rxc,
        nbr_ka_timeout: nbr_ka_timeoutc,
        nbr_initdelay: nbr_initdelayc,
        control: controlc,
    };

    (tx, rx)
}

// Entry point used by the daemon: builds the engine and runs it to
// completion.
pub async fn run(
    config: Config,
    pipes: LdpePipes,
) -> Result<(), Error> {
    let (proto_tx, proto_rx) = protocol_input_channels();

    let router_id = config.router_id;
    let trans_addr = config.trans_addr();
    let state = LdpeState::new(router_id, trans_addr, &proto_tx)?;

    let tx = LdpeChannelsTx {
        proto: proto_tx,
        lde: pipes.to_lde.clone(),
        main: pipes.to_main.clone(),
    };

    // Start the control socket listener.
    let _control_task = control::listener(&tx.proto.control);

    let ldpe = Ldpe::new(config, tx, state);
    ldpe.run(pipes, proto_rx).await;

    Ok(())
}
