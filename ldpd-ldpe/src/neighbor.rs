//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU32, AtomicU64};
use std::time::Instant;

use ldpd_packet::messages::{
    AddressMsg, InitMsg, KeepaliveMsg, LabelMsg, NotifMsg, TlvAddressList,
    TlvCommonSessParams, TlvFec, TlvLabel, TlvLabelRequestId, TlvPwStatus,
    TlvStatus,
};
use ldpd_packet::{
    AddressMessageType, FecElem, FecElemPwid, InitFlags, LabelMessageType,
    Message, MessageType, Pdu, StatusCode,
};
use ldpd_utils::Sender;
use ldpd_utils::config::Config;
use ldpd_utils::ibus::{LdpeToLdeMsg, Map, MapFec, Notify};
use ldpd_utils::socket::{TcpConnInfo, TcpListener, TcpStream};
use ldpd_utils::task::{IntervalTask, Task, TimeoutTask};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

use crate::collections::{NeighborId, NeighborIndex};
use crate::debug::Debug;
use crate::error::Error;
use crate::ldpe::{LdpeChannelsTx, LdpeState};
use crate::tasks;
use crate::tasks::messages::input::{NbrRxPduMsg, TcpConnectMsg};
use crate::tasks::messages::output::NbrTxPduMsg;

// A keepalive is sent this many times per negotiated keepalive period.
pub const KEEPALIVE_PER_PERIOD: u16 = 3;

#[derive(Debug)]
pub struct Neighbor {
    // Neighbor ID (used for inter-task communication, regenerated whenever
    // the session closes).
    pub id: NeighborId,
    // Stable peer-id identifying this neighbor on the LDE pipe.
    pub peerid: u32,
    pub lsr_id: Ipv4Addr,
    // Local and remote transport addresses.
    pub laddr: Ipv4Addr,
    pub addr: Ipv4Addr,
    pub state: fsm::State,
    pub conn_info: Option<TcpConnInfo>,
    pub max_pdu_len: u16,
    // Negotiated keepalive holdtime.
    pub keepalive: u16,
    pub kalive_rcvd: Option<u16>,
    pub idtimer_cnt: usize,
    // Label messages pending transmission, filled by the LDE and flushed by
    // the matching end-of-batch marker.
    pub mapping_list: Vec<Map>,
    pub withdraw_list: Vec<Map>,
    pub request_list: Vec<Map>,
    pub release_list: Vec<Map>,
    pub statistics: Statistics,
    pub uptime: Option<Instant>,
    pub pdu_txp: Option<UnboundedSender<NbrTxPduMsg>>,
    pub tasks: NeighborTasks,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub connect: Option<Task<()>>,
    pub initdelay_timeout: Option<TimeoutTask>,
    pub tcp_rx: Option<Task<()>>,
    pub kalive_tx: Option<IntervalTask>,
    pub kalive_timeout: Option<TimeoutTask>,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct Statistics {
    pub msgs_rcvd: MessageStatistics,
    pub msgs_sent: MessageStatistics,
}

// Inbound and outbound statistic counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub address: u64,
    pub address_withdraw: u64,
    pub initialization: u64,
    pub keepalive: Arc<AtomicU64>,
    pub label_abort_request: u64,
    pub label_mapping: u64,
    pub label_release: u64,
    pub label_request: u64,
    pub label_withdraw: u64,
    pub notification: u64,
    pub total: u64,
}

// Session state machine.
//
// The transition table is flat: each row matches a set of states (a mask)
// and one event, and yields an action plus an optional new state. Events
// not matched by any row are ignored and logged.
pub mod fsm {
    use bitflags::bitflags;
    use serde::{Deserialize, Serialize};

    bitflags! {
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct State: u8 {
            const DOWN = 0x01;
            const PRESENT = 0x02;
            const INITIAL = 0x04;
            const OPENREC = 0x08;
            const OPENSENT = 0x10;
            const OPERATIONAL = 0x20;
            // All states with an attached TCP connection.
            const SESSION = Self::INITIAL.bits()
                | Self::OPENREC.bits()
                | Self::OPENSENT.bits()
                | Self::OPERATIONAL.bits();
            // Everything past initial discovery.
            const UP = Self::PRESENT.bits() | Self::SESSION.bits();
        }
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
    pub enum Event {
        MatchAdj,
        ConnectUp,
        CloseSession,
        InitRcvd,
        KeepaliveRcvd,
        PduRcvd,
        PduSent,
        InitSent,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Action {
        Nothing,
        ResetKTimeout,
        SessionEstablish,
        ResetKTimer,
        ConnectSetup,
        PassiveInit,
        KeepaliveSend,
        CloseSession,
    }

    struct Transition {
        state: State,
        event: Event,
        action: Action,
        new_state: Option<State>,
    }

    static TRANSITIONS: &[Transition] = &[
        // Discovery states.
        Transition {
            state: State::DOWN,
            event: Event::MatchAdj,
            action: Action::Nothing,
            new_state: Some(State::PRESENT),
        },
        Transition {
            state: State::UP,
            event: Event::MatchAdj,
            action: Action::Nothing,
            new_state: None,
        },
        Transition {
            state: State::PRESENT,
            event: Event::ConnectUp,
            action: Action::ConnectSetup,
            new_state: Some(State::INITIAL),
        },
        // Passive role.
        Transition {
            state: State::INITIAL,
            event: Event::InitRcvd,
            action: Action::PassiveInit,
            new_state: Some(State::OPENREC),
        },
        Transition {
            state: State::OPENREC,
            event: Event::KeepaliveRcvd,
            action: Action::SessionEstablish,
            new_state: Some(State::OPERATIONAL),
        },
        // Active role.
        Transition {
            state: State::INITIAL,
            event: Event::InitSent,
            action: Action::Nothing,
            new_state: Some(State::OPENSENT),
        },
        Transition {
            state: State::OPENSENT,
            event: Event::InitRcvd,
            action: Action::KeepaliveSend,
            new_state: Some(State::OPENREC),
        },
        // Session maintenance.
        Transition {
            state: State::OPERATIONAL,
            event: Event::PduRcvd,
            action: Action::ResetKTimeout,
            new_state: None,
        },
        Transition {
            state: State::OPERATIONAL,
            event: Event::PduSent,
            action: Action::ResetKTimer,
            new_state: None,
        },
        // Session close.
        Transition {
            state: State::SESSION,
            event: Event::CloseSession,
            action: Action::CloseSession,
            new_state: Some(State::PRESENT),
        },
    ];

    // Looks up the transition matching the given state and event.
    pub fn transition(
        state: State,
        event: Event,
    ) -> Option<(Action, Option<State>)> {
        TRANSITIONS
            .iter()
            .find(|row| row.state.intersects(state) && row.event == event)
            .map(|row| (row.action, row.new_state))
    }

    impl State {
        pub fn name(&self) -> &'static str {
            if *self == State::DOWN {
                "DOWN"
            } else if *self == State::PRESENT {
                "PRESENT"
            } else if *self == State::INITIAL {
                "INITIAL"
            } else if *self == State::OPENREC {
                "OPENREC"
            } else if *self == State::OPENSENT {
                "OPENSENT"
            } else if *self == State::OPERATIONAL {
                "OPERATIONAL"
            } else {
                "UNKNOWN"
            }
        }
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub fn new(
        id: NeighborId,
        peerid: u32,
        lsr_id: Ipv4Addr,
        laddr: Ipv4Addr,
        addr: Ipv4Addr,
        keepalive: u16,
    ) -> Neighbor {
        Debug::NbrCreate(&lsr_id).log();

        Neighbor {
            id,
            peerid,
            lsr_id,
            laddr,
            addr,
            state: fsm::State::DOWN,
            conn_info: None,
            max_pdu_len: Pdu::DFLT_MAX_LEN,
            keepalive,
            kalive_rcvd: None,
            idtimer_cnt: 0,
            mapping_list: Vec::new(),
            withdraw_list: Vec::new(),
            request_list: Vec::new(),
            release_list: Vec::new(),
            statistics: Default::default(),
            uptime: None,
            pdu_txp: None,
            tasks: Default::default(),
        }
    }

    // The endpoint with the numerically greater transport address plays the
    // active role of session establishment.
    pub fn is_session_active_role(&self) -> bool {
        u32::from(self.laddr) > u32::from(self.addr)
    }

    pub fn is_operational(&self) -> bool {
        self.state == fsm::State::OPERATIONAL
    }

    // Keepalive Tx interval derived from the negotiated holdtime.
    pub fn kalive_interval(&self) -> u16 {
        std::cmp::max(1, self.keepalive / KEEPALIVE_PER_PERIOD)
    }

    pub(crate) fn fsm(
        state: &mut LdpeState,
        config: &Config,
        tx: &LdpeChannelsTx,
        nbr_idx: NeighborIndex,
        event: fsm::Event,
    ) {
        let nbr = &mut state.neighbors[nbr_idx];
        let old_state = nbr.state;

        let Some((action, new_state)) = fsm::transition(old_state, event)
        else {
            Error::NbrFsmUnexpectedEvent(nbr.lsr_id, old_state, event).log();
            return;
        };

        if let Some(new_state) = new_state {
            if new_state != old_state {
                Debug::NbrFsmTransition(
                    &nbr.lsr_id,
                    &event,
                    &old_state,
                    &new_state,
                )
                .log();
                nbr.state = new_state;
                if new_state == fsm::State::OPERATIONAL {
                    nbr.uptime = Some(Instant::now());
                }
            }
        }

        Neighbor::fsm_action(state, config, tx, nbr_idx, action);
    }

    fn fsm_action(
        state: &mut LdpeState,
        config: &Config,
        tx: &LdpeChannelsTx,
        nbr_idx: NeighborIndex,
        action: fsm::Action,
    ) {
        let msg_id = state.msg_id.clone();
        let nbr = &mut state.neighbors[nbr_idx];
        match action {
            fsm::Action::Nothing => (),
            fsm::Action::ResetKTimeout => {
                if let Some(task) = nbr.tasks.kalive_timeout.as_mut() {
                    task.reset(None);
                }
            }
            fsm::Action::ResetKTimer => {
                if let Some(task) = nbr.tasks.kalive_tx.as_mut() {
                    task.reset(None);
                }
            }
            fsm::Action::ConnectSetup => {
                // The TCP connection was wired up by the caller. When
                // playing the active role, kick off the initialization
                // exchange.
                if nbr.is_session_active_role() {
                    nbr.send_init(config, &msg_id);
                    Neighbor::fsm(
                        state,
                        config,
                        tx,
                        nbr_idx,
                        fsm::Event::InitSent,
                    );
                }
            }
            fsm::Action::PassiveInit => {
                nbr.send_init(config, &msg_id);
                nbr.send_keepalive(&msg_id);
                nbr.start_kalive_timeout(&tx.proto.nbr_ka_timeout);
            }
            fsm::Action::KeepaliveSend => {
                nbr.send_keepalive(&msg_id);
                nbr.start_kalive_timeout(&tx.proto.nbr_ka_timeout);
            }
            fsm::Action::SessionEstablish => {
                // Reset the counter of initialization attempts.
                nbr.idtimer_cnt = 0;
                nbr.tasks.initdelay_timeout = None;

                // Start keepalive Tx/timeout tasks.
                nbr.start_kalive_interval(&msg_id);
                nbr.start_kalive_timeout(&tx.proto.nbr_ka_timeout);

                // Send the local address list.
                let addr_list = state.addr_list.clone();
                let nbr = &mut state.neighbors[nbr_idx];
                nbr.send_address(
                    &msg_id,
                    AddressMessageType::Address,
                    addr_list,
                );

                // Tell the LDE about the new operational session and request
                // a full label mapping dump.
                let peerid = nbr.peerid;
                let lsr_id = nbr.lsr_id;
                let _ = tx.lde.send(LdpeToLdeMsg::NeighborUp { peerid, lsr_id });
                let _ = tx.lde.send(LdpeToLdeMsg::MappingDump { peerid });
            }
            fsm::Action::CloseSession => {
                let peerid = nbr.peerid;
                let _ = tx.lde.send(LdpeToLdeMsg::NeighborDown { peerid });

                let active = nbr.is_session_active_role();
                nbr.close_session();

                // Delay the next session establishment attempt with
                // exponential backoff.
                if active {
                    nbr.start_initdelay_timeout(&tx.proto.nbr_initdelay);
                }

                // Update the neighbor ID to prevent events from the old
                // session from leaking into a new session.
                let id = state.neighbors.next_id();
                state.neighbors.update_id(nbr_idx, id);
            }
        }
    }

    pub(crate) fn start_initdelay_timeout(
        &mut self,
        nbr_initdelayp: &Sender<tasks::messages::input::NbrInitBackoffTimeoutMsg>,
    ) {
        let task = tasks::nbr_initdelay_timeout(self, nbr_initdelayp);
        self.tasks.initdelay_timeout = Some(task);
    }

    pub(crate) fn stop_initdelay_timeout(&mut self) {
        self.tasks.initdelay_timeout = None;
        self.idtimer_cnt = 0;
    }

    pub(crate) fn start_kalive_interval(&mut self, msg_id: &Arc<AtomicU32>) {
        let keepalive_counter = self.statistics.msgs_sent.keepalive.clone();
        let task = tasks::nbr_kalive_interval(self, msg_id, &keepalive_counter);
        self.tasks.kalive_tx = Some(task);
    }

    pub(crate) fn start_kalive_timeout(
        &mut self,
        nbr_ka_timeoutp: &Sender<tasks::messages::input::NbrKaTimeoutMsg>,
    ) {
        let task = tasks::nbr_kalive_timeout(self, nbr_ka_timeoutp);
        self.tasks.kalive_timeout = Some(task);
    }

    pub(crate) fn connect(
        &mut self,
        password: Option<&str>,
        tcp_connectp: &Sender<TcpConnectMsg>,
    ) {
        let task = tasks::tcp_connect(self, password, tcp_connectp);
        self.tasks.connect = Some(task);
    }

    pub(crate) fn setup_connection(
        &mut self,
        stream: TcpStream,
        conn_info: TcpConnInfo,
        local_lsr_id: Ipv4Addr,
        nbr_pdu_rxp: &Sender<NbrRxPduMsg>,
    ) {
        self.conn_info = Some(conn_info);

        // Split TCP stream into two halves.
        let (read_half, write_half) = stream.into_split();

        // Spawn neighbor TCP Tx/Rx tasks.
        let (pdu_txp, pdu_txc) = mpsc::unbounded_channel();
        let mut tx_task = tasks::nbr_tx(self, local_lsr_id, write_half, pdu_txc);
        let tcp_rx_task = tasks::nbr_rx(self, read_half, nbr_pdu_rxp);
        self.tasks.tcp_rx = Some(tcp_rx_task);
        self.pdu_txp = Some(pdu_txp);

        // The tx task isn't tracked because it exits gracefully as soon as
        // the tx end of its mpsc channel is dropped. This way messages sent
        // while the neighbor is being shut down are still delivered.
        tx_task.detach();
    }

    pub(crate) fn close_session(&mut self) {
        self.conn_info = None;
        self.kalive_rcvd = None;
        self.max_pdu_len = Pdu::DFLT_MAX_LEN;
        self.mapping_list.clear();
        self.withdraw_list.clear();
        self.request_list.clear();
        self.release_list.clear();
        self.statistics = Default::default();
        self.uptime = None;
        self.tasks = Default::default();
        self.pdu_txp = None;
    }

    pub(crate) fn set_listener_md5sig(
        &self,
        session_socket: &TcpListener,
        password: Option<&str>,
    ) {
        #[cfg(not(feature = "testing"))]
        {
            use ldpd_utils::socket::TcpSocketExt;

            use crate::error::IoError;

            if let Err(error) = session_socket
                .set_md5sig(&IpAddr::V4(self.addr), password)
            {
                IoError::TcpAuthError(error).log();
            }
        }
    }

    fn send_message<M: Into<Message>>(&mut self, msg: M, flush: bool) {
        let msg = msg.into();

        Debug::NbrMsgTx(&self.lsr_id, &msg).log();

        // Update statistics.
        self.statistics.msgs_sent.update(&msg);

        // Ignore any possible error as the connection might have gone down
        // already.
        let msg = NbrTxPduMsg { msg, flush };
        if let Some(pdu_txp) = &self.pdu_txp {
            let _ = pdu_txp.send(msg);
        }
    }

    pub(crate) fn send_init(
        &mut self,
        config: &Config,
        msg_id: &Arc<AtomicU32>,
    ) {
        let msg = InitMsg {
            msg_id: LdpeState::get_next_msg_id(msg_id),
            params: TlvCommonSessParams {
                version: Pdu::VERSION,
                keepalive_time: config.keepalive,
                flags: InitFlags::empty(),
                pvlim: 0,
                max_pdu_len: 0,
                lsr_id: self.lsr_id,
                lspace_id: 0,
            },
        };
        self.send_message(msg, true);
    }

    pub(crate) fn generate_keepalive(msg_id: &Arc<AtomicU32>) -> Message {
        KeepaliveMsg {
            msg_id: LdpeState::get_next_msg_id(msg_id),
        }
        .into()
    }

    pub(crate) fn send_keepalive(&mut self, msg_id: &Arc<AtomicU32>) {
        let msg = Neighbor::generate_keepalive(msg_id);
        self.send_message(msg, true);
    }

    pub(crate) fn send_notification(
        &mut self,
        msg_id: &Arc<AtomicU32>,
        status_code: StatusCode,
        pmsg_id: u32,
        pmsg_type: u16,
    ) {
        let msg = NotifMsg {
            msg_id: LdpeState::get_next_msg_id(msg_id),
            status: TlvStatus {
                status_code: status_code.encode(pmsg_type != 0),
                msg_id: pmsg_id,
                msg_type: pmsg_type,
            },
            pw_status: None,
            fec: None,
        };
        self.send_message(msg, true);
    }

    // Sends a notification built by the LDE, which may carry a PW status
    // word and a FEC TLV.
    pub(crate) fn send_notification_full(
        &mut self,
        msg_id: &Arc<AtomicU32>,
        notify: Notify,
    ) {
        let msg = NotifMsg {
            msg_id: LdpeState::get_next_msg_id(msg_id),
            status: TlvStatus {
                status_code: notify.status_code,
                msg_id: notify.msg_id,
                msg_type: notify.msg_type,
            },
            pw_status: notify.pw_status.map(TlvPwStatus),
            fec: notify.fec.map(|fec| {
                TlvFec(vec![Neighbor::map_fec_to_elem(&fec, false)])
            }),
        };
        self.send_message(msg, true);
    }

    pub(crate) fn send_shutdown(
        &mut self,
        msg_id: &Arc<AtomicU32>,
        pmsg_id: u32,
        pmsg_type: u16,
    ) {
        self.send_notification(
            msg_id,
            StatusCode::Shutdown,
            pmsg_id,
            pmsg_type,
        );
    }

    pub(crate) fn send_address(
        &mut self,
        msg_id: &Arc<AtomicU32>,
        msg_type: AddressMessageType,
        addr_list: BTreeSet<Ipv4Addr>,
    ) {
        if addr_list.is_empty() {
            return;
        }
        let msg = AddressMsg {
            msg_id: LdpeState::get_next_msg_id(msg_id),
            msg_type,
            addr_list: TlvAddressList(addr_list),
        };
        self.send_message(msg, true);
    }

    // Sends one batch of label messages, one FEC element per message.
    pub(crate) fn send_labelmessage(
        &mut self,
        msg_id: &Arc<AtomicU32>,
        msg_type: LabelMessageType,
        maps: Vec<Map>,
    ) {
        let count = maps.len();
        for (pos, map) in maps.into_iter().enumerate() {
            let fec_elem = Neighbor::map_fec_to_elem(&map.fec, map.cword);
            let msg = LabelMsg {
                msg_id: LdpeState::get_next_msg_id(msg_id),
                msg_type,
                fec: TlvFec(vec![fec_elem]),
                label: map.label.map(TlvLabel),
                request_id: map.request_id.map(TlvLabelRequestId),
                pw_status: map.pw_status.map(TlvPwStatus),
            };
            self.send_message(msg, pos + 1 == count);
        }
    }

    // Converts a process-neutral FEC into its wire form. The control-word
    // flag rides in the PWid element type field.
    pub(crate) fn map_fec_to_elem(fec: &MapFec, cword: bool) -> FecElem {
        match fec {
            MapFec::Wildcard => FecElem::Wildcard,
            MapFec::Prefix(prefix) => FecElem::Prefix(*prefix),
            MapFec::Pwid {
                pw_type,
                group_id,
                pwid,
                ifmtu,
            } => FecElem::Pwid(FecElemPwid {
                pw_type: *pw_type,
                cword,
                group_id: *group_id,
                pwid: *pwid,
                ifmtu: *ifmtu,
            }),
        }
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NbrDelete(&self.lsr_id).log();
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, msg: &Message) {
        self.total += 1;
        match msg.msg_type() {
            MessageType::Notification => {
                self.notification += 1;
            }
            MessageType::Initialization => {
                self.initialization += 1;
            }
            MessageType::Keepalive => {
                self.keepalive.fetch_add(1, atomic::Ordering::Relaxed);
            }
            MessageType::Address => {
                self.address += 1;
            }
            MessageType::AddressWithdraw => {
                self.address_withdraw += 1;
            }
            MessageType::LabelMapping => {
                self.label_mapping += 1;
            }
            MessageType::LabelRequest => {
                self.label_request += 1;
            }
            MessageType::LabelWithdraw => {
                self.label_withdraw += 1;
            }
            MessageType::LabelRelease => {
                self.label_release += 1;
            }
            MessageType::LabelAbortReq => {
                self.label_abort_request += 1;
            }
            _ => (),
        };
    }
}
