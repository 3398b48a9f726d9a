//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use ldpd_packet::messages::{
    HelloFlags, HelloMsg, TlvCommonHelloParams, TlvIpv4TransAddr,
};
use ldpd_packet::{Pdu, StatusCode};
use ldpd_utils::Sender;
use ldpd_utils::config::{Config, TARGETED_DFLT_HOLDTIME};
use ldpd_utils::socket::UdpSocket;
use ldpd_utils::task::{IntervalTask, TimeoutTask};

use crate::collections::{
    AdjacencyId, AdjacencyIndex, InterfaceId, TargetedNbrIndex, TargetedNbrs,
};
use crate::debug::Debug;
use crate::error::IoError;
use crate::ldpe::{LdpeChannelsTx, LdpeState};
use crate::neighbor::{Neighbor, fsm};
use crate::network;
use crate::tasks;
use crate::tasks::messages::input::AdjTimeoutMsg;

#[derive(Debug)]
pub struct Adjacency {
    // Adjacency ID (used for inter-task communication).
    pub id: AdjacencyId,
    // Adjacency source.
    pub source: AdjacencySource,
    // Transport address advertised by the adjacent LSR (either implicit or
    // explicit).
    pub trans_addr: Ipv4Addr,
    // Adjacency LSR-ID.
    pub lsr_id: Ipv4Addr,
    // The holdtime value learned from the adjacent LSR (in seconds).
    pub holdtime_adjacent: u16,
    // The holdtime negotiated between this LSR and the adjacent LSR (in
    // seconds).
    pub holdtime_negotiated: u16,
    // Statistics.
    pub hello_rcvd: u64,
    pub hello_dropped: u64,
    // Adjacency inactivity timeout task.
    pub timeout_task: Option<TimeoutTask>,
}

// Hello source: either (interface, source address) for link hellos or the
// targeted neighbor address for targeted hellos.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AdjacencySource {
    // Optional interface ID (None for targeted adjacencies).
    pub iface_id: Option<InterfaceId>,
    // Source IP address.
    pub addr: Ipv4Addr,
}

#[derive(Debug)]
pub struct TargetedNbr {
    // Targeted neighbor address.
    pub addr: Ipv4Addr,
    pub hello_holdtime: u16,
    pub hello_interval: u16,
    // Indicates whether this targeted neighbor was explicitly configured.
    pub configured: bool,
    // Indicates whether this targeted neighbor was created in response to a
    // remote request for targeted hellos.
    pub dynamic: bool,
    // Number of pseudowires referencing this targeted neighbor.
    pub pw_count: u16,
    // Hello Tx interval task.
    pub hello_interval_task: Option<IntervalTask>,
}

// ===== impl Adjacency =====

impl Adjacency {
    pub(crate) fn new(
        id: AdjacencyId,
        source: AdjacencySource,
        trans_addr: Ipv4Addr,
        lsr_id: Ipv4Addr,
        holdtime_adjacent: u16,
        holdtime_negotiated: u16,
    ) -> Adjacency {
        Debug::AdjacencyCreate(&source, &lsr_id).log();

        Adjacency {
            id,
            source,
            trans_addr,
            lsr_id,
            holdtime_adjacent,
            holdtime_negotiated,
            hello_rcvd: 1,
            hello_dropped: 0,
            timeout_task: None,
        }
    }

    pub(crate) fn reset(
        &mut self,
        holdtime: u16,
        adj_timeoutp: &Sender<AdjTimeoutMsg>,
    ) {
        // An infinite hold time (0xffff) disables the inactivity timeout.
        if holdtime == HelloMsg::INFINITE_HOLDTIME {
            self.timeout_task = None;
            return;
        }

        let holdtime = Duration::from_secs(holdtime.into());

        if let Some(timeout_task) = &mut self.timeout_task {
            // Reset existing timeout task.
            timeout_task.reset(Some(holdtime));
        } else {
            // Create new timeout task.
            let timeout_task =
                tasks::adj_timeout(self.id, holdtime, adj_timeoutp);
            self.timeout_task = Some(timeout_task);
        }
    }

}

impl Drop for Adjacency {
    fn drop(&mut self) {
        Debug::AdjacencyDelete(&self.source, &self.lsr_id).log();
    }
}

// ===== impl AdjacencySource =====

impl AdjacencySource {
    pub fn new(
        iface_id: Option<InterfaceId>,
        addr: Ipv4Addr,
    ) -> AdjacencySource {
        AdjacencySource { iface_id, addr }
    }
}

impl std::fmt::Display for AdjacencySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

// ===== impl TargetedNbr =====

impl TargetedNbr {
    pub(crate) fn new(addr: Ipv4Addr) -> TargetedNbr {
        Debug::TargetedNbrCreate(&addr).log();

        TargetedNbr {
            addr,
            hello_holdtime: TARGETED_DFLT_HOLDTIME,
            hello_interval: 5,
            configured: false,
            dynamic: false,
            pw_count: 0,
            hello_interval_task: None,
        }
    }

    pub(crate) fn start(&mut self, state: &LdpeState) {
        Debug::TargetedNbrStart(&self.addr).log();

        let task = tasks::tnbr_hello_interval(self, state);
        self.hello_interval_task = Some(task);
    }

    pub(crate) fn stop(
        tneighbors: &mut TargetedNbrs,
        state: &mut LdpeState,
        config: &Config,
        tx: &LdpeChannelsTx,
        tnbr_idx: TargetedNbrIndex,
        delete_adjacency: bool,
    ) {
        let tnbr = &mut tneighbors[tnbr_idx];

        Debug::TargetedNbrStop(&tnbr.addr).log();

        // Stop hello tx.
        tnbr.hello_interval_task = None;

        // Delete adjacency (if any).
        if delete_adjacency {
            let source = AdjacencySource {
                iface_id: None,
                addr: tnbr.addr,
            };
            if let Some((adj_idx, _)) =
                state.adjacencies.get_by_source(&source)
            {
                adjacency_delete(
                    state,
                    config,
                    tx,
                    adj_idx,
                    StatusCode::Shutdown,
                );
            }
        }
    }

    // Starts, stops or deletes the targeted neighbor after one of its
    // activation references changed.
    pub(crate) fn update(
        tneighbors: &mut TargetedNbrs,
        state: &mut LdpeState,
        config: &Config,
        tx: &LdpeChannelsTx,
        tnbr_idx: TargetedNbrIndex,
    ) {
        let tnbr = &mut tneighbors[tnbr_idx];

        let is_ready = tnbr.is_ready();
        let is_active = tnbr.is_active();
        let remove = tnbr.remove_check();

        if !is_active && is_ready {
            tnbr.start(state);
        } else if is_active && !is_ready {
            TargetedNbr::stop(tneighbors, state, config, tx, tnbr_idx, true);
        }

        if remove {
            tneighbors.delete(tnbr_idx);
        }
    }

    pub(crate) fn sync_hello_tx(&mut self, state: &LdpeState) {
        if self.hello_interval_task.is_some() {
            let task = tasks::tnbr_hello_interval(self, state);
            self.hello_interval_task = Some(task);
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.hello_interval_task.is_some()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.configured || self.dynamic || self.pw_count > 0
    }

    pub(crate) fn remove_check(&self) -> bool {
        !self.configured && !self.dynamic && self.pw_count == 0
    }

    pub(crate) fn generate_hello(&self, state: &LdpeState) -> HelloMsg {
        let mut flags = HelloFlags::TARGETED;
        // Request targeted hellos in return when this end needs the
        // adjacency to stay up on its own.
        if self.configured || self.pw_count > 0 {
            flags |= HelloFlags::REQ_TARGETED;
        }

        HelloMsg {
            // The message ID will be overwritten later.
            msg_id: 0,
            params: TlvCommonHelloParams {
                holdtime: self.hello_holdtime,
                flags,
            },
            ipv4_addr: Some(TlvIpv4TransAddr(state.trans_addr)),
            ipv6_addr: None,
        }
    }

    pub(crate) async fn send_hello(
        edisc_socket: Arc<UdpSocket>,
        addr: Ipv4Addr,
        router_id: Ipv4Addr,
        msg_id: Arc<AtomicU32>,
        mut hello: HelloMsg,
    ) {
        // Update hello message ID.
        hello.msg_id = LdpeState::get_next_msg_id(&msg_id);

        // Prepare hello PDU.
        let mut pdu = Pdu::new(router_id, 0);
        pdu.messages.push_back(hello.into());

        // Send unicast packet.
        if let Err(error) =
            network::udp::send_packet_unicast(&edisc_socket, pdu, &addr).await
        {
            IoError::UdpSendError(error).log();
        }
    }

    pub(crate) fn calculate_adj_holdtime(&self, hello_holdtime: u16) -> u16 {
        let mut hello_holdtime = hello_holdtime;
        if hello_holdtime == 0 {
            hello_holdtime = TARGETED_DFLT_HOLDTIME;
        }

        std::cmp::min(self.hello_holdtime, hello_holdtime)
    }
}

impl Drop for TargetedNbr {
    fn drop(&mut self) {
        Debug::TargetedNbrDelete(&self.addr).log();
    }
}

// ===== global functions =====

// Deletes the given adjacency, tearing down the neighbor when its adjacency
// list becomes empty.
pub(crate) fn adjacency_delete(
    state: &mut LdpeState,
    config: &Config,
    tx: &LdpeChannelsTx,
    adj_idx: AdjacencyIndex,
    status_code: StatusCode,
) {
    let adj = &state.adjacencies[adj_idx];
    let lsr_id = adj.lsr_id;

    state.adjacencies.delete(adj_idx);
    neighbor_delete_check(state, config, tx, &lsr_id, status_code);
}

// Deletes the neighbor if its last adjacency is gone.
pub(crate) fn neighbor_delete_check(
    state: &mut LdpeState,
    config: &Config,
    tx: &LdpeChannelsTx,
    lsr_id: &Ipv4Addr,
    status_code: StatusCode,
) {
    if state.adjacencies.get_by_lsr_id(lsr_id).is_some() {
        return;
    }

    let Some((nbr_idx, nbr)) = state.neighbors.get_mut_by_lsr_id(lsr_id)
    else {
        return;
    };

    // Close the session, notifying the peer first.
    if nbr.state.intersects(fsm::State::SESSION) {
        let msg_id = state.msg_id.clone();
        let nbr = &mut state.neighbors[nbr_idx];
        nbr.send_notification(&msg_id, status_code, 0, 0);
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
    }

    // Unset neighbor password (if any).
    let nbr = &state.neighbors[nbr_idx];
    nbr.set_listener_md5sig(&state.session_socket, None);

    // Delete neighbor.
    state.neighbors.delete(nbr_idx);
}
