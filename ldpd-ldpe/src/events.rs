//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::net::Ipv4Addr;

use ldpd_packet::error::DecodeError;
use ldpd_packet::messages::{
    AddressMsg, HelloFlags, HelloMsg, InitMsg, KeepaliveMsg, LabelMsg,
    NotifMsg,
};
use ldpd_packet::{
    FecElem, LabelMessageType, Message, Pdu, StatusCode,
};
use ldpd_packet::MessageKind;
use ldpd_utils::config::{
    DEFAULT_HOLDTIME, MIN_HOLDTIME, MIN_KEEPALIVE, TARGETED_DFLT_HOLDTIME,
};
use ldpd_utils::ibus::{LdpeToLdeMsg, Map, MapFec, Notify};
use ldpd_utils::socket::{TcpConnInfo, TcpStream};

use crate::collections::{AdjacencyId, NeighborId, NeighborIndex};
use crate::debug::Debug;
use crate::discovery::{self, Adjacency, AdjacencySource, TargetedNbr};
use crate::error::Error;
use crate::ldpe::Ldpe;
use crate::neighbor::{Neighbor, fsm};

// ===== UDP packet receipt =====

pub(crate) fn process_udp_pdu(
    ldpe: &mut Ldpe,
    src_addr: IpAddr,
    multicast: bool,
    pdu: Result<Pdu, DecodeError>,
) {
    // Only IPv4 discovery is supported.
    let src_addr = match src_addr {
        IpAddr::V4(src_addr) => src_addr,
        IpAddr::V6(_) => return,
    };

    match multicast {
        true => process_udp_pdu_multicast(ldpe, src_addr, pdu),
        false => process_udp_pdu_unicast(ldpe, src_addr, pdu),
    }
}

fn process_udp_pdu_multicast(
    ldpe: &mut Ldpe,
    src_addr: Ipv4Addr,
    pdu: Result<Pdu, DecodeError>,
) {
    // Lookup interface.
    let Some((_, iface)) = ldpe.interfaces.get_by_addr(&src_addr) else {
        return;
    };
    let iface_id = iface.id;
    let local_holdtime = iface.hello_holdtime();

    let source = AdjacencySource::new(Some(iface_id), src_addr);

    // Handle decode error.
    let mut pdu = match pdu {
        Ok(pdu) => pdu,
        Err(error) => {
            process_udp_pdu_error(ldpe, source, error);
            return;
        }
    };

    // Process the first message only (if any), ignoring the others.
    if let Some(Message::Hello(hello)) = pdu.messages.pop_front() {
        if hello.params.flags.contains(HelloFlags::TARGETED) {
            return;
        }

        let holdtime_adjacent = hello.params.holdtime;
        let holdtime_negotiated = negotiate_holdtime(
            local_holdtime,
            holdtime_adjacent,
            DEFAULT_HOLDTIME,
        );
        process_hello(
            ldpe,
            source,
            pdu.lsr_id,
            hello,
            holdtime_adjacent,
            holdtime_negotiated,
        );
    }
}

fn process_udp_pdu_unicast(
    ldpe: &mut Ldpe,
    src_addr: Ipv4Addr,
    pdu: Result<Pdu, DecodeError>,
) {
    let source = AdjacencySource::new(None, src_addr);

    // Handle decode error.
    let mut pdu = match pdu {
        Ok(pdu) => pdu,
        Err(error) => {
            process_udp_pdu_error(ldpe, source, error);
            return;
        }
    };

    // Process the first message only (if any), ignoring the others.
    if let Some(Message::Hello(hello)) = pdu.messages.pop_front() {
        if !hello.params.flags.contains(HelloFlags::TARGETED) {
            return;
        }

        // Find targeted neighbor (or create a dynamic one if the remote
        // requested targeted hellos and the local policy accepts that).
        let (tnbr_idx, tnbr) =
            match ldpe.tneighbors.get_mut_by_addr(&src_addr) {
                Some(value) => value,
                None => {
                    if !hello.params.flags.contains(HelloFlags::REQ_TARGETED)
                        || !ldpe.config.targeted_hello_accept
                    {
                        return;
                    }
                    ldpe.tneighbors.insert(src_addr)
                }
            };
        tnbr.dynamic = hello.params.flags.contains(HelloFlags::REQ_TARGETED)
            && ldpe.config.targeted_hello_accept;

        // The targeted neighbor might need to be activated or deactivated
        // depending on whether the hello's 'R' bit changed.
        TargetedNbr::update(
            &mut ldpe.tneighbors,
            &mut ldpe.state,
            &ldpe.config,
            &ldpe.tx,
            tnbr_idx,
        );
        let Some((_, tnbr)) = ldpe.tneighbors.get_by_addr(&src_addr) else {
            return;
        };
        if !tnbr.is_active() {
            return;
        }
        let local_holdtime = tnbr.hello_holdtime;

        // Process hello message.
        let holdtime_adjacent = hello.params.holdtime;
        let holdtime_negotiated = negotiate_holdtime(
            local_holdtime,
            holdtime_adjacent,
            TARGETED_DFLT_HOLDTIME,
        );
        process_hello(
            ldpe,
            source,
            pdu.lsr_id,
            hello,
            holdtime_adjacent,
            holdtime_negotiated,
        );
    }
}

fn process_udp_pdu_error(
    ldpe: &mut Ldpe,
    source: AdjacencySource,
    error: DecodeError,
) {
    // Log the error first.
    Error::UdpPduDecodeError(error).log();

    // Update hello dropped counter.
    if let Some((_, adj)) =
        ldpe.state.adjacencies.get_mut_by_source(&source)
    {
        adj.hello_dropped += 1;
    }
}

fn process_hello(
    ldpe: &mut Ldpe,
    source: AdjacencySource,
    lsr_id: Ipv4Addr,
    hello: HelloMsg,
    holdtime_adjacent: u16,
    holdtime_negotiated: u16,
) {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;

    Debug::AdjacencyHelloRx(&source, &lsr_id, &hello).log();

    // Reject nonsensical hold times.
    if holdtime_adjacent != 0 && holdtime_adjacent < MIN_HOLDTIME {
        return;
    }

    // Use implicit transport address if necessary.
    let trans_addr = hello
        .ipv4_addr
        .map(|tlv| tlv.0)
        .unwrap_or(source.addr);

    // Create new adjacency or update the existing one.
    let mut shutdown_nbr = false;
    if let Some((_, adj)) = state.adjacencies.get_mut_by_source(&source) {
        // Ignore the hello message if the advertised LSR-ID has changed.
        if adj.lsr_id != lsr_id {
            return;
        }
        // Shutdown the associated neighbor if the advertised transport
        // address has changed.
        if adj.trans_addr != trans_addr {
            shutdown_nbr = true;
        }

        adj.trans_addr = trans_addr;
        adj.holdtime_adjacent = holdtime_adjacent;
        adj.holdtime_negotiated = holdtime_negotiated;
        adj.hello_rcvd += 1;
        adj.reset(holdtime_negotiated, &tx.proto.adj_timeout);
    } else {
        let id = state.adjacencies.next_id();
        let mut adj = Adjacency::new(
            id,
            source,
            trans_addr,
            lsr_id,
            holdtime_adjacent,
            holdtime_negotiated,
        );
        adj.reset(holdtime_negotiated, &tx.proto.adj_timeout);
        state.adjacencies.insert(adj);
    }

    if shutdown_nbr {
        if let Some((nbr_idx, nbr)) =
            state.neighbors.get_mut_by_lsr_id(&lsr_id)
        {
            if nbr.state.intersects(fsm::State::SESSION) {
                let msg_id = state.msg_id.clone();
                let nbr = &mut state.neighbors[nbr_idx];
                nbr.send_shutdown(&msg_id, 0, 0);
                Neighbor::fsm(
                    state,
                    config,
                    tx,
                    nbr_idx,
                    fsm::Event::CloseSession,
                );
            }
            let nbr = &state.neighbors[nbr_idx];
            nbr.set_listener_md5sig(&state.session_socket, None);
            state.neighbors.delete(nbr_idx);
        }
    }

    // Find the associated neighbor or create a new one, keyed by the
    // advertised LSR-ID.
    let nbr_idx = match state.neighbors.get_by_lsr_id(&lsr_id) {
        Some((nbr_idx, _)) => nbr_idx,
        None => {
            let id = state.neighbors.next_id();
            let peerid = state.neighbors.next_peerid();
            let nbr = Neighbor::new(
                id,
                peerid,
                lsr_id,
                state.trans_addr,
                trans_addr,
                config.keepalive,
            );
            // The neighbor password (if any) must be set on the TCP
            // listening socket, otherwise incoming SYNs will be rejected.
            if let Some(password) = config.nbr_password(&lsr_id) {
                nbr.set_listener_md5sig(
                    &state.session_socket,
                    Some(password),
                );
            }
            let (nbr_idx, _) = state.neighbors.insert(nbr);
            nbr_idx
        }
    };

    Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::MatchAdj);

    // Start the TCP connection when playing the active role of session
    // establishment and no attempt is pending or backed off.
    let nbr = &mut state.neighbors[nbr_idx];
    if nbr.state == fsm::State::PRESENT
        && nbr.is_session_active_role()
        && nbr.tasks.connect.is_none()
        && nbr.tasks.initdelay_timeout.is_none()
    {
        let password = config.nbr_password(&nbr.lsr_id);
        nbr.connect(password, &tx.proto.tcp_connect);
    }
}

// ===== hello adjacency timeout =====

pub(crate) fn process_adj_timeout(
    ldpe: &mut Ldpe,
    adj_id: AdjacencyId,
) -> Result<(), Error> {
    let Ldpe {
        config,
        tneighbors,
        state,
        tx,
        ..
    } = ldpe;

    // Lookup adjacency.
    let (adj_idx, adj) = state.adjacencies.get_by_id(adj_id)?;

    Debug::AdjacencyTimeout(&adj.source, &adj.lsr_id).log();

    let source = adj.source;

    // Delete adjacency.
    discovery::adjacency_delete(
        state,
        config,
        tx,
        adj_idx,
        StatusCode::HoldTimerExp,
    );

    // Remove the corresponding dynamic targeted neighbor, if any.
    if source.iface_id.is_none() {
        if let Some((tnbr_idx, tnbr)) =
            tneighbors.get_mut_by_addr(&source.addr)
        {
            tnbr.dynamic = false;
            TargetedNbr::update(tneighbors, state, config, tx, tnbr_idx);
        }
    }

    Ok(())
}

// ===== TCP connection request =====

pub(crate) fn process_tcp_accept(
    ldpe: &mut Ldpe,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;

    // Lookup neighbor.
    let source = match conn_info.remote_addr {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => return,
    };
    let Some((nbr_idx, nbr)) =
        state.neighbors.get_mut_by_trans_addr(&source)
    else {
        Debug::NoMatchingHelloAdjacency(&source).log();
        return;
    };

    // Sanity checks.
    if nbr.is_session_active_role() {
        Error::TcpInvalidConnRequest(nbr.lsr_id).log();
        return;
    }
    if nbr.state != fsm::State::PRESENT {
        Error::TcpAdditionalTransportConn(nbr.lsr_id).log();
        return;
    }

    // Setup connection and trigger FSM event.
    let router_id = state.router_id;
    let nbr = &mut state.neighbors[nbr_idx];
    nbr.setup_connection(
        stream,
        conn_info,
        router_id,
        &tx.proto.nbr_pdu_rx,
    );
    Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::ConnectUp);
}

// ===== TCP connection established =====

pub(crate) fn process_tcp_connect(
    ldpe: &mut Ldpe,
    nbr_id: NeighborId,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;

    // Lookup neighbor.
    let (nbr_idx, nbr) = state.neighbors.get_mut_by_id(nbr_id)?;

    nbr.tasks.connect = None;

    // Setup connection and trigger FSM event.
    let router_id = state.router_id;
    let nbr = &mut state.neighbors[nbr_idx];
    nbr.setup_connection(
        stream,
        conn_info,
        router_id,
        &tx.proto.nbr_pdu_rx,
    );
    Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::ConnectUp);

    Ok(())
}

// ===== neighbor PDU receipt =====

pub(crate) fn process_nbr_pdu(
    ldpe: &mut Ldpe,
    nbr_id: NeighborId,
    pdu: Result<Pdu, Error>,
) -> Result<(), Error> {
    // Lookup neighbor.
    let (nbr_idx, _) = ldpe.state.neighbors.get_mut_by_id(nbr_id)?;

    match pdu {
        Ok(pdu) => {
            process_nbr_msgs(ldpe, nbr_idx, pdu);
        }
        Err(error) => {
            // Log the error first.
            error.log();

            let Ldpe {
                config, state, tx, ..
            } = ldpe;
            match error {
                Error::NbrPduDecodeError(_, error) => {
                    process_nbr_pdu_decode_error(
                        state, config, tx, nbr_idx, error,
                    );
                }
                Error::TcpConnClosed(_) => {
                    Neighbor::fsm(
                        state,
                        config,
                        tx,
                        nbr_idx,
                        fsm::Event::CloseSession,
                    );
                }
                _ => unreachable!(),
            }
        }
    }

    Ok(())
}

fn process_nbr_pdu_decode_error(
    state: &mut crate::ldpe::LdpeState,
    config: &ldpd_utils::config::Config,
    tx: &crate::ldpe::LdpeChannelsTx,
    nbr_idx: NeighborIndex,
    error: DecodeError,
) {
    // Map decode error to an LDP status code.
    let status: StatusCode = error.into();

    // Send notification and possibly tear down the session.
    let msg_id = state.msg_id.clone();
    let nbr = &mut state.neighbors[nbr_idx];
    let lsr_id = nbr.lsr_id;
    nbr.send_notification(&msg_id, status, 0, 0);
    if status.is_fatal_error() {
        Error::NbrSentError(lsr_id, status).log();
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
    }
}

fn process_nbr_msgs(ldpe: &mut Ldpe, nbr_idx: NeighborIndex, pdu: Pdu) {
    for msg in pdu.messages {
        if let Err(error) = process_nbr_msg(ldpe, nbr_idx, msg) {
            // Log the error first.
            error.log();

            // Close the session.
            let Ldpe {
                config, state, tx, ..
            } = ldpe;
            Neighbor::fsm(
                state,
                config,
                tx,
                nbr_idx,
                fsm::Event::CloseSession,
            );
            return;
        }
    }

    // Restart the keepalive timeout upon receiving any LDP PDU.
    let Ldpe {
        config, state, tx, ..
    } = ldpe;
    if state.neighbors[nbr_idx].is_operational() {
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::PduRcvd);
    }
}

fn process_nbr_msg(
    ldpe: &mut Ldpe,
    nbr_idx: NeighborIndex,
    msg: Message,
) -> Result<(), Error> {
    let nbr = &mut ldpe.state.neighbors[nbr_idx];
    Debug::NbrMsgRx(&nbr.lsr_id, &msg).log();

    // Update statistics.
    nbr.statistics.msgs_rcvd.update(&msg);

    match msg {
        Message::Notification(msg) => {
            process_nbr_msg_notification(ldpe, nbr_idx, msg)
        }
        Message::Initialization(msg) => {
            process_nbr_msg_init(ldpe, nbr_idx, msg)
        }
        Message::Keepalive(msg) => {
            process_nbr_msg_keepalive(ldpe, nbr_idx, msg)
        }
        Message::Address(msg) => process_nbr_msg_address(ldpe, nbr_idx, msg),
        Message::Label(msg) => process_nbr_msg_label(ldpe, nbr_idx, msg),
        // Ignore unexpected Hello message.
        Message::Hello(_) => Ok(()),
    }
}

fn process_nbr_msg_notification(
    ldpe: &mut Ldpe,
    nbr_idx: NeighborIndex,
    msg: NotifMsg,
) -> Result<(), Error> {
    let Ldpe { state, tx, .. } = ldpe;
    let nbr = &mut state.neighbors[nbr_idx];
    let status_code = msg.status_code();

    // Pseudowire status notifications are relayed to the LDE and don't
    // affect the session.
    if status_code == Some(StatusCode::PwStatus) {
        if let (Some(pw_status), Some(fec)) = (&msg.pw_status, &msg.fec) {
            if let Some(fec_elem) = fec.0.first() {
                let (map_fec, _) = fec_elem_to_map_fec(fec_elem);
                let notify = Notify {
                    status_code: msg.status.status_code,
                    msg_id: msg.status.msg_id,
                    msg_type: msg.status.msg_type,
                    pw_status: Some(pw_status.0),
                    fec: Some(map_fec),
                };
                let peerid = nbr.peerid;
                let _ = tx
                    .lde
                    .send(LdpeToLdeMsg::Notification { peerid, notify });
            }
        }
        return Ok(());
    }

    if msg.is_fatal_error() {
        // A fatal NAK during session establishment arms the initialization
        // backoff timer.
        if nbr.state == fsm::State::OPENSENT {
            nbr.start_initdelay_timeout(&tx.proto.nbr_initdelay);
        }

        //
        // RFC 5036 - Section 3.5.1.1:
        // "When an LSR receives a Shutdown message during session
        // initialization, it SHOULD transmit a Shutdown message and then
        // close the transport connection".
        //
        if !nbr.is_operational() && status_code == Some(StatusCode::Shutdown)
        {
            let msg_id = state.msg_id.clone();
            let nbr = &mut state.neighbors[nbr_idx];
            nbr.send_shutdown(&msg_id, msg.msg_id, msg.msg_type() as u16);
        }

        let nbr = &state.neighbors[nbr_idx];
        return Err(Error::NbrRcvdError(
            nbr.lsr_id,
            status_code.unwrap_or(StatusCode::Shutdown),
        ));
    }

    Ok(())
}

fn process_nbr_msg_init(
    ldpe: &mut Ldpe,
    nbr_idx: NeighborIndex,
    msg: InitMsg,
) -> Result<(), Error> {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;
    let msg_id_ctr = state.msg_id.clone();
    let nbr = &mut state.neighbors[nbr_idx];

    // Check if the message is valid given the current neighbor's state.
    if !nbr
        .state
        .intersects(fsm::State::INITIAL | fsm::State::OPENSENT)
    {
        let lsr_id = nbr.lsr_id;
        nbr.send_shutdown(&msg_id_ctr, msg.msg_id, msg.msg_type() as u16);
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
        return Err(Error::NbrSentError(lsr_id, StatusCode::Shutdown));
    }

    // The receiver LDP identifier must match the local label space.
    if msg.params.lsr_id != state.router_id || msg.params.lspace_id != 0 {
        let lsr_id = nbr.lsr_id;
        let status = StatusCode::SessRejNoHello;
        nbr.send_notification(
            &msg_id_ctr,
            status,
            msg.msg_id,
            msg.msg_type() as u16,
        );
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
        return Err(Error::NbrSentError(lsr_id, status));
    }

    // Validate the proposed keepalive time.
    let kalive_rcvd = msg.params.keepalive_time;
    if kalive_rcvd < MIN_KEEPALIVE {
        let lsr_id = nbr.lsr_id;
        let status = StatusCode::SessRejKeepalive;
        nbr.send_notification(
            &msg_id_ctr,
            status,
            msg.msg_id,
            msg.msg_type() as u16,
        );
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
        return Err(Error::NbrSentError(lsr_id, status));
    }

    // Negotiate the session keepalive holdtime.
    nbr.kalive_rcvd = Some(kalive_rcvd);
    nbr.keepalive = std::cmp::min(config.keepalive, kalive_rcvd);

    //
    // Calculate the maximum PDU length: the minimum of the two advertised
    // maxima, floored at the default of 4096 octets.
    //
    // RFC 5036 - Section 3.5.3:
    // "A value of 255 or less specifies the default maximum length of
    // 4096 octets".
    //
    let mut max_pdu_len = msg.params.max_pdu_len;
    if max_pdu_len <= 255 {
        max_pdu_len = Pdu::DFLT_MAX_LEN;
    }
    nbr.max_pdu_len = std::cmp::min(max_pdu_len, Pdu::DFLT_MAX_LEN)
        .max(Pdu::DFLT_MAX_LEN);

    Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::InitRcvd);

    Ok(())
}

fn process_nbr_msg_keepalive(
    ldpe: &mut Ldpe,
    nbr_idx: NeighborIndex,
    msg: KeepaliveMsg,
) -> Result<(), Error> {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;
    let nbr = &mut state.neighbors[nbr_idx];

    if nbr.state == fsm::State::OPENREC {
        // Session initialization event.
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::KeepaliveRcvd);
    } else if nbr.state != fsm::State::OPERATIONAL {
        // Unexpected message given the current neighbor's state. When
        // operational, the keepalive timeout is reset once the whole PDU
        // was processed.
        let lsr_id = nbr.lsr_id;
        let msg_id_ctr = state.msg_id.clone();
        let nbr = &mut state.neighbors[nbr_idx];
        nbr.send_shutdown(&msg_id_ctr, msg.msg_id, msg.msg_type() as u16);
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
        return Err(Error::NbrSentError(lsr_id, StatusCode::Shutdown));
    }

    Ok(())
}

fn process_nbr_msg_address(
    ldpe: &mut Ldpe,
    nbr_idx: NeighborIndex,
    msg: AddressMsg,
) -> Result<(), Error> {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;
    let nbr = &mut state.neighbors[nbr_idx];

    // Check if the message is valid given the current neighbor's state.
    if !nbr.is_operational() {
        let lsr_id = nbr.lsr_id;
        let msg_id_ctr = state.msg_id.clone();
        let nbr = &mut state.neighbors[nbr_idx];
        nbr.send_shutdown(&msg_id_ctr, msg.msg_id, msg.msg_type() as u16);
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
        return Err(Error::NbrSentError(lsr_id, StatusCode::Shutdown));
    }

    // Relay the addresses to the LDE, which keeps the per-neighbor address
    // lists used for nexthop resolution.
    let peerid = nbr.peerid;
    for addr in msg.addr_list.0 {
        let relay = match msg.msg_type {
            ldpd_packet::AddressMessageType::Address => {
                LdpeToLdeMsg::AddressAdd { peerid, addr }
            }
            ldpd_packet::AddressMessageType::AddressWithdraw => {
                LdpeToLdeMsg::AddressDel { peerid, addr }
            }
        };
        let _ = tx.lde.send(relay);
    }

    Ok(())
}

fn process_nbr_msg_label(
    ldpe: &mut Ldpe,
    nbr_idx: NeighborIndex,
    msg: LabelMsg,
) -> Result<(), Error> {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;
    let nbr = &mut state.neighbors[nbr_idx];

    // Check if the message is valid given the current neighbor's state.
    if !nbr.is_operational() {
        let lsr_id = nbr.lsr_id;
        let msg_id_ctr = state.msg_id.clone();
        let nbr = &mut state.neighbors[nbr_idx];
        nbr.send_shutdown(&msg_id_ctr, msg.msg_id, msg.msg_type() as u16);
        Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);
        return Err(Error::NbrSentError(lsr_id, StatusCode::Shutdown));
    }

    // Relay each FEC element to the LDE separately.
    let peerid = nbr.peerid;
    for fec_elem in &msg.fec.0 {
        let (map_fec, cword) = fec_elem_to_map_fec(fec_elem);
        let map = Map {
            fec: map_fec,
            label: msg.get_label(),
            request_id: msg.request_id.as_ref().map(|tlv| tlv.0),
            pw_status: msg.pw_status.as_ref().map(|tlv| tlv.0),
            cword,
            msg_id: msg.msg_id,
        };

        let relay = match msg.msg_type {
            LabelMessageType::LabelMapping => {
                LdpeToLdeMsg::LabelMapping { peerid, map }
            }
            LabelMessageType::LabelRequest => {
                LdpeToLdeMsg::LabelRequest { peerid, map }
            }
            LabelMessageType::LabelWithdraw => {
                LdpeToLdeMsg::LabelWithdraw { peerid, map }
            }
            LabelMessageType::LabelRelease => {
                LdpeToLdeMsg::LabelRelease { peerid, map }
            }
            LabelMessageType::LabelAbortReq => {
                LdpeToLdeMsg::LabelAbort { peerid, map }
            }
        };
        let _ = tx.lde.send(relay);
    }

    Ok(())
}

// ===== neighbor keepalive timeout =====

pub(crate) fn process_nbr_ka_timeout(
    ldpe: &mut Ldpe,
    nbr_id: NeighborId,
) -> Result<(), Error> {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;

    // Lookup neighbor.
    let (nbr_idx, _) = state.neighbors.get_mut_by_id(nbr_id)?;

    // Send error notification and close the session.
    let msg_id_ctr = state.msg_id.clone();
    let nbr = &mut state.neighbors[nbr_idx];
    nbr.send_notification(&msg_id_ctr, StatusCode::KeepaliveExp, 0, 0);
    Neighbor::fsm(state, config, tx, nbr_idx, fsm::Event::CloseSession);

    Ok(())
}

// ===== neighbor initialization backoff timeout =====

pub(crate) fn process_nbr_initdelay_timeout(
    ldpe: &mut Ldpe,
    lsr_id: Ipv4Addr,
) {
    let Ldpe {
        config, state, tx, ..
    } = ldpe;

    // Lookup neighbor.
    let Some((_, nbr)) = state.neighbors.get_mut_by_lsr_id(&lsr_id) else {
        return;
    };

    Debug::NbrInitBackoffTimeout(&nbr.lsr_id).log();

    nbr.tasks.initdelay_timeout = None;
    if nbr.state == fsm::State::PRESENT
        && nbr.is_session_active_role()
        && nbr.tasks.connect.is_none()
    {
        let password = config.nbr_password(&nbr.lsr_id);
        nbr.connect(password, &tx.proto.tcp_connect);
    }
}

// ===== helper functions =====

// Negotiates the adjacency holdtime: the minimum of the local and adjacent
// values, with a zero adjacent holdtime standing for the default.
fn negotiate_holdtime(
    local_holdtime: u16,
    mut hello_holdtime: u16,
    dflt_holdtime: u16,
) -> u16 {
    if hello_holdtime == 0 {
        hello_holdtime = dflt_holdtime;
    }

    std::cmp::min(local_holdtime, hello_holdtime)
}

// Converts a wire FEC element into its process-neutral form.
pub(crate) fn fec_elem_to_map_fec(fec_elem: &FecElem) -> (MapFec, bool) {
    match fec_elem {
        FecElem::Wildcard => (MapFec::Wildcard, false),
        FecElem::Prefix(prefix) => (MapFec::Prefix(*prefix), false),
        FecElem::Pwid(pwid) => (
            MapFec::Pwid {
                pw_type: pwid.pw_type,
                group_id: pwid.group_id,
                pwid: pwid.pwid,
                ifmtu: pwid.ifmtu,
            },
            pwid.cword,
        ),
    }
}
