//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::Ipv4Network;
use ldpd_ldpe::discovery::AdjacencySource;
use ldpd_ldpe::ldpe::{
    Ldpe, LdpeChannelsTx, LdpeState, protocol_input_channels,
};
use ldpd_ldpe::neighbor::fsm;
use ldpd_ldpe::tasks::messages::ProtocolInputMsg;
use ldpd_ldpe::tasks::messages::input::UdpRxPduMsg;
use ldpd_packet::messages::{
    HelloFlags, HelloMsg, TlvCommonHelloParams, TlvIpv4TransAddr,
};
use ldpd_packet::Pdu;
use ldpd_utils::config::{Config, IfaceCfg};
use ldpd_utils::ibus::{Kaddr, KifUpdate, LdpeToLdeMsg, MainToLdpeMsg};
use tokio::sync::mpsc;

fn router_id() -> Ipv4Addr {
    Ipv4Addr::new(1, 1, 1, 1)
}

fn peer_lsr_id() -> Ipv4Addr {
    Ipv4Addr::new(2, 2, 2, 2)
}

fn new_ldpe(
    config: Config,
) -> (Ldpe, mpsc::UnboundedReceiver<LdpeToLdeMsg>) {
    let (proto_tx, _proto_rx) = protocol_input_channels();
    let (lde_tx, lde_rx) = mpsc::unbounded_channel();
    let (main_tx, _main_rx) = mpsc::unbounded_channel();

    let state =
        LdpeState::new(config.router_id, config.trans_addr(), &proto_tx)
            .unwrap();
    let tx = LdpeChannelsTx {
        proto: proto_tx,
        lde: lde_tx,
        main: main_tx,
    };

    // Keep the protocol input receivers alive for the duration of the test.
    std::mem::forget(_proto_rx);

    (Ldpe::new(config, tx, state), lde_rx)
}

fn link_config() -> Config {
    let mut config = Config::new(router_id());
    config.interfaces.push(IfaceCfg {
        name: "eth0".to_owned(),
        hello_holdtime: 15,
        hello_interval: 5,
    });
    config
}

fn bring_iface_up(ldpe: &mut Ldpe) {
    ldpe.process_main_msg(MainToLdpeMsg::IfStatus(KifUpdate {
        ifname: "eth0".to_owned(),
        ifindex: 2,
        operative: true,
        loopback: false,
        mtu: 1500,
    }));
    ldpe.process_main_msg(MainToLdpeMsg::NewAddr(Kaddr {
        ifindex: 2,
        addr: Ipv4Network::new(Ipv4Addr::new(10, 1, 1, 0), 31).unwrap(),
    }));
}

fn link_hello(
    lsr_id: Ipv4Addr,
    src_addr: Ipv4Addr,
    trans_addr: Ipv4Addr,
    holdtime: u16,
) -> UdpRxPduMsg {
    let hello = HelloMsg {
        msg_id: 1,
        params: TlvCommonHelloParams {
            holdtime,
            flags: HelloFlags::empty(),
        },
        ipv4_addr: Some(TlvIpv4TransAddr(trans_addr)),
        ipv6_addr: None,
    };
    let mut pdu = Pdu::new(lsr_id, 0);
    pdu.messages.push_back(hello.into());

    UdpRxPduMsg {
        src_addr: IpAddr::V4(src_addr),
        multicast: true,
        pdu: Ok(pdu),
    }
}

fn targeted_hello(
    lsr_id: Ipv4Addr,
    src_addr: Ipv4Addr,
    req_targeted: bool,
) -> UdpRxPduMsg {
    let mut flags = HelloFlags::TARGETED;
    if req_targeted {
        flags |= HelloFlags::REQ_TARGETED;
    }
    let hello = HelloMsg {
        msg_id: 1,
        params: TlvCommonHelloParams { holdtime: 45, flags },
        ipv4_addr: Some(TlvIpv4TransAddr(src_addr)),
        ipv6_addr: None,
    };
    let mut pdu = Pdu::new(lsr_id, 0);
    pdu.messages.push_back(hello.into());

    UdpRxPduMsg {
        src_addr: IpAddr::V4(src_addr),
        multicast: false,
        pdu: Ok(pdu),
    }
}

// A link hello creates an adjacency and its neighbor, negotiating the
// holdtime down to the local value.
#[tokio::test]
async fn test_link_hello_creates_adjacency() {
    let (mut ldpe, _lde_rx) = new_ldpe(link_config());
    bring_iface_up(&mut ldpe);

    let src_addr = Ipv4Addr::new(10, 1, 1, 1);
    ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(link_hello(
        peer_lsr_id(),
        src_addr,
        Ipv4Addr::new(10, 0, 0, 2),
        30,
    )));

    let iface_id = ldpe.interfaces.get_by_name("eth0").unwrap().1.id;
    let source = AdjacencySource::new(Some(iface_id), src_addr);
    let (_, adj) = ldpe.state.adjacencies.get_by_source(&source).unwrap();
    assert_eq!(adj.lsr_id, peer_lsr_id());
    assert_eq!(adj.holdtime_adjacent, 30);
    assert_eq!(adj.holdtime_negotiated, 15);
    assert_eq!(adj.trans_addr, Ipv4Addr::new(10, 0, 0, 2));

    // The neighbor reached PRESENT; the peer's transport address is larger,
    // so the peer plays the active role and this end waits.
    let (_, nbr) =
        ldpe.state.neighbors.get_by_lsr_id(&peer_lsr_id()).unwrap();
    assert_eq!(nbr.state, fsm::State::PRESENT);
    assert!(!nbr.is_session_active_role());
}

// No two adjacencies share the same source, and adjacencies of one LSR
// share a single neighbor.
#[tokio::test]
async fn test_adjacency_uniqueness() {
    let (mut ldpe, _lde_rx) = new_ldpe(link_config());
    bring_iface_up(&mut ldpe);

    let src_addr = Ipv4Addr::new(10, 1, 1, 1);
    for _ in 0..3 {
        ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(link_hello(
            peer_lsr_id(),
            src_addr,
            Ipv4Addr::new(10, 0, 0, 2),
            15,
        )));
    }

    assert_eq!(ldpe.state.adjacencies.iter().count(), 1);
    assert_eq!(ldpe.state.neighbors.iter().count(), 1);

    // A hello with a different LSR-ID over the same source is ignored.
    ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(link_hello(
        Ipv4Addr::new(3, 3, 3, 3),
        src_addr,
        Ipv4Addr::new(10, 0, 0, 3),
        15,
    )));
    assert_eq!(ldpe.state.adjacencies.iter().count(), 1);
    assert_eq!(ldpe.state.neighbors.iter().count(), 1);
}

// Non-zero holdtimes below the minimum are rejected.
#[tokio::test]
async fn test_hello_holdtime_too_small() {
    let (mut ldpe, _lde_rx) = new_ldpe(link_config());
    bring_iface_up(&mut ldpe);

    ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(link_hello(
        peer_lsr_id(),
        Ipv4Addr::new(10, 1, 1, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        2,
    )));

    assert_eq!(ldpe.state.adjacencies.iter().count(), 0);
}

// A zero holdtime stands for the link default.
#[tokio::test]
async fn test_hello_default_holdtime() {
    let (mut ldpe, _lde_rx) = new_ldpe(link_config());
    bring_iface_up(&mut ldpe);

    ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(link_hello(
        peer_lsr_id(),
        Ipv4Addr::new(10, 1, 1, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        0,
    )));

    let iface_id = ldpe.interfaces.get_by_name("eth0").unwrap().1.id;
    let source =
        AdjacencySource::new(Some(iface_id), Ipv4Addr::new(10, 1, 1, 1));
    let (_, adj) = ldpe.state.adjacencies.get_by_source(&source).unwrap();
    assert_eq!(adj.holdtime_adjacent, 0);
    assert_eq!(adj.holdtime_negotiated, 15);
}

// Targeted hellos carrying the R-bit create a dynamic targeted neighbor,
// but only when the acceptance policy allows it.
#[tokio::test]
async fn test_dynamic_targeted_neighbor() {
    let src_addr = Ipv4Addr::new(7, 7, 7, 7);

    // Policy disabled: the hello is dropped.
    let (mut ldpe, _lde_rx) = new_ldpe(link_config());
    ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(targeted_hello(
        peer_lsr_id(),
        src_addr,
        true,
    )));
    assert!(ldpe.tneighbors.get_by_addr(&src_addr).is_none());

    // Policy enabled: a dynamic targeted neighbor appears.
    let mut config = link_config();
    config.targeted_hello_accept = true;
    let (mut ldpe, _lde_rx) = new_ldpe(config);
    ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(targeted_hello(
        peer_lsr_id(),
        src_addr,
        true,
    )));
    let (_, tnbr) = ldpe.tneighbors.get_by_addr(&src_addr).unwrap();
    assert!(tnbr.dynamic);
    assert!(!tnbr.configured);

    // Without the R-bit no dynamic targeted neighbor is created.
    let mut config = link_config();
    config.targeted_hello_accept = true;
    let (mut ldpe, _lde_rx) = new_ldpe(config);
    ldpe.process_protocol_msg(ProtocolInputMsg::UdpRxPdu(targeted_hello(
        peer_lsr_id(),
        src_addr,
        false,
    )));
    assert!(ldpe.tneighbors.get_by_addr(&src_addr).is_none());
}

// Local addresses are advertised to operational neighbors and withdrawn
// when they go away.
#[tokio::test]
async fn test_address_tracking() {
    let (mut ldpe, _lde_rx) = new_ldpe(link_config());
    bring_iface_up(&mut ldpe);

    assert!(
        ldpe.state
            .addr_list
            .contains(&Ipv4Addr::new(10, 1, 1, 0))
    );

    ldpe.process_main_msg(MainToLdpeMsg::DelAddr(Kaddr {
        ifindex: 2,
        addr: Ipv4Network::new(Ipv4Addr::new(10, 1, 1, 0), 31).unwrap(),
    }));
    assert!(ldpe.state.addr_list.is_empty());

    // Losing the last address deactivates the interface.
    let (_, iface) = ldpe.interfaces.get_by_name("eth0").unwrap();
    assert!(!iface.is_active());
}
