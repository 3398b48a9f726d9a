//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ldpd_lde::fec::Fec;
use ldpd_lde::lde::{Lde, LdeChannelsTx};
use ldpd_packet::StatusCode;
use ldpd_utils::config::{Config, L2vpnCfg, L2vpnPwCfg};
use ldpd_utils::ibus::{
    IbusReceiver, Kroute, KrouteFlags, LdeToLdpeMsg, LdeToMainMsg,
    LdpeToLdeMsg, Map, MapFec, Notify,
};
use ldpd_utils::l2vpn::{PwStatus, PwType};
use ldpd_utils::mpls::Label;
use tokio::sync::mpsc;

const PEERID: u32 = 1;

fn peer_lsr_id() -> Ipv4Addr {
    Ipv4Addr::new(2, 2, 2, 2)
}

fn peer_addr() -> Ipv4Addr {
    Ipv4Addr::new(10, 1, 1, 1)
}

fn prefix() -> Ipv4Network {
    Ipv4Network::new(Ipv4Addr::new(192, 0, 2, 0), 24).unwrap()
}

fn new_lde(
    config: Config,
) -> (Lde, IbusReceiver<LdeToLdpeMsg>, IbusReceiver<LdeToMainMsg>) {
    let (ldpe_tx, ldpe_rx) = mpsc::unbounded_channel();
    let (main_tx, main_rx) = mpsc::unbounded_channel();
    let lde = Lde::new(
        config,
        LdeChannelsTx {
            ldpe: ldpe_tx,
            main: main_tx,
        },
    );
    (lde, ldpe_rx, main_rx)
}

fn nbr_up(lde: &mut Lde) {
    lde.process_ldpe_msg(LdpeToLdeMsg::NeighborUp {
        peerid: PEERID,
        lsr_id: peer_lsr_id(),
    });
    lde.process_ldpe_msg(LdpeToLdeMsg::AddressAdd {
        peerid: PEERID,
        addr: peer_addr(),
    });
}

fn kroute(prefix: Ipv4Network, nexthop: Ipv4Addr, connected: bool) -> Kroute {
    Kroute {
        prefix,
        nexthop,
        local_label: None,
        remote_label: None,
        ifindex: 2,
        priority: if connected { 4 } else { 32 },
        flags: if connected {
            KrouteFlags::CONNECTED
        } else {
            KrouteFlags::empty()
        },
    }
}

fn prefix_map(prefix: Ipv4Network, label: u32) -> Map {
    let mut map = Map::new(MapFec::Prefix(prefix));
    map.label = Some(Label::new(label));
    map
}

fn drain_ldpe(rx: &mut IbusReceiver<LdeToLdpeMsg>) -> Vec<LdeToLdpeMsg> {
    let mut msgs = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

fn drain_main(rx: &mut IbusReceiver<LdeToMainMsg>) -> Vec<LdeToMainMsg> {
    let mut msgs = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

// The LIB invariant: a local label is assigned iff the entry carries
// nexthops, downstream bindings or upstream advertisements.
fn assert_lib_invariant(lde: &Lde) {
    for (fec, fn_) in &lde.fecs {
        let has_state = !fn_.nexthops.is_empty()
            || !fn_.downstream.is_empty()
            || !fn_.upstream.is_empty();
        assert_eq!(
            fn_.local_label.is_some(),
            has_state,
            "LIB invariant violated for {}",
            fec
        );
    }
}

#[test]
fn test_network_add_advertises_label() {
    let (mut lde, mut ldpe_rx, _main_rx) =
        new_lde(Config::new(Ipv4Addr::new(1, 1, 1, 1)));
    nbr_up(&mut lde);
    drain_ldpe(&mut ldpe_rx);

    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        prefix(),
        peer_addr(),
        false,
    )));

    // The FEC got a label from the unreserved range.
    let fn_ = &lde.fecs[&Fec::Ipv4(prefix())];
    let local_label = fn_.local_label.unwrap();
    assert!(!local_label.is_reserved());
    assert_lib_invariant(&lde);

    // FEC.1: the mapping was advertised to the established neighbor.
    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::MappingAdd { peerid: PEERID, map }
            if map.label == Some(local_label)
                && map.fec == MapFec::Prefix(prefix()))));
    assert!(
        msgs.iter()
            .any(|msg| matches!(msg, LdeToLdpeMsg::MappingAddEnd { .. }))
    );
}

#[test]
fn test_connected_prefix_egress_label() {
    let (mut lde, _ldpe_rx, _main_rx) =
        new_lde(Config::new(Ipv4Addr::new(1, 1, 1, 1)));

    let connected =
        Ipv4Network::new(Ipv4Addr::new(10, 1, 1, 0), 31).unwrap();
    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        connected,
        Ipv4Addr::UNSPECIFIED,
        true,
    )));

    let fn_ = &lde.fecs[&Fec::Ipv4(connected)];
    assert_eq!(fn_.local_label, Some(Label::new(Label::IMPLICIT_NULL)));
}

#[test]
fn test_explicit_null_egress_label() {
    let mut config = Config::new(Ipv4Addr::new(1, 1, 1, 1));
    config.explicit_null = true;
    let (mut lde, _ldpe_rx, _main_rx) = new_lde(config);

    let connected =
        Ipv4Network::new(Ipv4Addr::new(10, 1, 1, 0), 31).unwrap();
    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        connected,
        Ipv4Addr::UNSPECIFIED,
        true,
    )));

    let fn_ = &lde.fecs[&Fec::Ipv4(connected)];
    assert_eq!(
        fn_.local_label,
        Some(Label::new(Label::IPV4_EXPLICIT_NULL))
    );
}

// A received mapping whose nexthop belongs to the advertising peer is
// installed in the FIB.
#[test]
fn test_mapping_installs_label() {
    let (mut lde, mut ldpe_rx, mut main_rx) =
        new_lde(Config::new(Ipv4Addr::new(1, 1, 1, 1)));
    nbr_up(&mut lde);

    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        prefix(),
        peer_addr(),
        false,
    )));
    drain_ldpe(&mut ldpe_rx);
    drain_main(&mut main_rx);

    lde.process_ldpe_msg(LdpeToLdeMsg::LabelMapping {
        peerid: PEERID,
        map: prefix_map(prefix(), 100),
    });

    let msgs = drain_main(&mut main_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToMainMsg::KLabelChange(kr)
            if kr.prefix == prefix()
                && kr.nexthop == peer_addr()
                && kr.remote_label == Some(Label::new(100)))));
    assert_lib_invariant(&lde);

    // Liberal retention: the mapping is recorded.
    assert!(lde.nbrs[&PEERID].recv_map.contains_key(&Fec::Ipv4(prefix())));
}

// Scenario: label request handling with no route and with a looping
// nexthop.
#[test]
fn test_request_no_route_and_loop() {
    let (mut lde, mut ldpe_rx, _main_rx) =
        new_lde(Config::new(Ipv4Addr::new(1, 1, 1, 1)));
    nbr_up(&mut lde);
    drain_ldpe(&mut ldpe_rx);

    // No route at all: No Route notification.
    let mut map = Map::new(MapFec::Prefix(prefix()));
    map.msg_id = 42;
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelRequest {
        peerid: PEERID,
        map: map.clone(),
    });

    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::NotificationSend { peerid: PEERID, notify }
            if StatusCode::decode(notify.status_code)
                == Some(StatusCode::NoRoute)
                && notify.msg_id == 42)));

    // The requester is the nexthop: Loop Detected notification.
    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        prefix(),
        peer_addr(),
        false,
    )));
    drain_ldpe(&mut ldpe_rx);
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelRequest {
        peerid: PEERID,
        map,
    });

    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::NotificationSend { peerid: PEERID, notify }
            if StatusCode::decode(notify.status_code)
                == Some(StatusCode::LoopDetected))));
}

// A request from a non-nexthop peer is answered with a mapping carrying
// the request's message ID.
#[test]
fn test_request_answered_with_mapping() {
    let (mut lde, mut ldpe_rx, _main_rx) =
        new_lde(Config::new(Ipv4Addr::new(1, 1, 1, 1)));
    nbr_up(&mut lde);

    // A second neighbor owns the nexthop.
    lde.process_ldpe_msg(LdpeToLdeMsg::NeighborUp {
        peerid: 2,
        lsr_id: Ipv4Addr::new(3, 3, 3, 3),
    });
    lde.process_ldpe_msg(LdpeToLdeMsg::AddressAdd {
        peerid: 2,
        addr: Ipv4Addr::new(10, 2, 2, 1),
    });
    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        prefix(),
        Ipv4Addr::new(10, 2, 2, 1),
        false,
    )));
    drain_ldpe(&mut ldpe_rx);

    let mut map = Map::new(MapFec::Prefix(prefix()));
    map.msg_id = 77;
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelRequest {
        peerid: PEERID,
        map,
    });

    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::MappingAdd { peerid: PEERID, map }
            if map.request_id == Some(77))));
}

// Scenario: withdraw propagation. Losing the last nexthop withdraws the
// label; the peer's release then frees it, and the collector reclaims the
// orphan entry.
#[test]
fn test_withdraw_release_flow() {
    let (mut lde, mut ldpe_rx, mut main_rx) =
        new_lde(Config::new(Ipv4Addr::new(1, 1, 1, 1)));
    nbr_up(&mut lde);

    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        prefix(),
        peer_addr(),
        false,
    )));
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelMapping {
        peerid: PEERID,
        map: prefix_map(prefix(), 100),
    });
    drain_ldpe(&mut ldpe_rx);
    drain_main(&mut main_rx);

    let fec = Fec::Ipv4(prefix());
    let local_label = lde.fecs[&fec].local_label.unwrap();

    // Route loss: uninstall and withdraw.
    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkDel(kroute(
        prefix(),
        peer_addr(),
        false,
    )));

    let msgs = drain_main(&mut main_rx);
    assert!(
        msgs.iter()
            .any(|msg| matches!(msg, LdeToMainMsg::KLabelDelete(..)))
    );
    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::WithdrawAdd { peerid: PEERID, map }
            if map.label == Some(local_label))));
    assert!(lde.nbrs[&PEERID].sent_wdraw.contains_key(&fec));

    // The peer's release clears the withdraw and upstream records.
    let mut map = Map::new(MapFec::Prefix(prefix()));
    map.label = Some(local_label);
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelRelease {
        peerid: PEERID,
        map,
    });
    assert!(!lde.nbrs[&PEERID].sent_wdraw.contains_key(&fec));
    assert!(lde.fecs[&fec].upstream.is_empty());

    // The downstream binding is still retained; a withdraw from the peer
    // clears it and the entry becomes an orphan.
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelWithdraw {
        peerid: PEERID,
        map: prefix_map(prefix(), 100),
    });
    assert_lib_invariant(&lde);
    assert_eq!(lde.fecs[&fec].local_label, None);

    lde.process_gc_timer();
    assert!(!lde.fecs.contains_key(&fec));
}

// A neighbor going down uninstalls its labels and drops its bindings.
#[test]
fn test_neighbor_down_cleanup() {
    let (mut lde, mut ldpe_rx, mut main_rx) =
        new_lde(Config::new(Ipv4Addr::new(1, 1, 1, 1)));
    nbr_up(&mut lde);

    lde.process_main_msg(ldpd_utils::ibus::MainToLdeMsg::NetworkAdd(kroute(
        prefix(),
        peer_addr(),
        false,
    )));
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelMapping {
        peerid: PEERID,
        map: prefix_map(prefix(), 100),
    });
    drain_ldpe(&mut ldpe_rx);
    drain_main(&mut main_rx);

    lde.process_ldpe_msg(LdpeToLdeMsg::NeighborDown { peerid: PEERID });

    let msgs = drain_main(&mut main_rx);
    assert!(
        msgs.iter()
            .any(|msg| matches!(msg, LdeToMainMsg::KLabelDelete(..)))
    );
    let fn_ = &lde.fecs[&Fec::Ipv4(prefix())];
    assert!(fn_.downstream.is_empty());
    assert!(fn_.upstream.is_empty());
    assert_lib_invariant(&lde);
}

// ===== pseudowires =====

fn pw_config() -> Config {
    let mut config = Config::new(Ipv4Addr::new(1, 1, 1, 1));
    config.l2vpns.push(L2vpnCfg {
        name: "customer-a".to_owned(),
        pw_type: PwType::Ethernet,
        mtu: 1500,
        bridge: None,
        interfaces: vec![],
        pseudowires: vec![L2vpnPwCfg {
            name: "mpw0".to_owned(),
            lsr_id: peer_lsr_id(),
            pwid: 100,
            control_word: true,
            status_tlv: true,
        }],
    });
    config
}

fn pw_fec() -> Fec {
    Fec::Pwid {
        pw_type: PwType::Ethernet,
        pwid: 100,
        lsr_id: peer_lsr_id(),
    }
}

fn pw_map(label: u32, cword: bool, ifmtu: u16) -> Map {
    let mut map = Map::new(MapFec::Pwid {
        pw_type: PwType::Ethernet,
        group_id: 0,
        pwid: Some(100),
        ifmtu: Some(ifmtu),
    });
    map.label = Some(Label::new(label));
    map.cword = cword;
    map.pw_status = Some(PwStatus::forwarding());
    map
}

// Scenario: pseudowire negotiation and status signaling.
#[test]
fn test_pw_up_and_status() {
    let (mut lde, mut ldpe_rx, mut main_rx) = new_lde(pw_config());

    // The pseudowire FEC exists with a local label before any session.
    assert!(lde.fecs[&pw_fec()].local_label.is_some());

    nbr_up(&mut lde);
    lde.process_ldpe_msg(LdpeToLdeMsg::MappingDump { peerid: PEERID });

    // The dump advertises the pseudowire with control word, interface MTU
    // and a forwarding status word.
    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::MappingAdd { peerid: PEERID, map }
            if map.cword
                && map.pw_status == Some(PwStatus::forwarding())
                && matches!(map.fec, MapFec::Pwid { pwid: Some(100), ifmtu: Some(1500), .. }))));

    // The remote mapping brings the pseudowire up.
    lde.process_ldpe_msg(LdpeToLdeMsg::LabelMapping {
        peerid: PEERID,
        map: pw_map(300, true, 1500),
    });

    let msgs = drain_main(&mut main_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToMainMsg::KPwLabelChange(kpw)
            if kpw.remote_label == Some(Label::new(300)) && kpw.cword)));

    // A not-forwarding status notification tears the LSP down without
    // touching the session.
    lde.process_ldpe_msg(LdpeToLdeMsg::Notification {
        peerid: PEERID,
        notify: Notify {
            status_code: StatusCode::PwStatus as u32,
            msg_id: 0,
            msg_type: 0,
            pw_status: Some(PwStatus(PwStatus::NOT_FORWARDING)),
            fec: Some(MapFec::Pwid {
                pw_type: PwType::Ethernet,
                group_id: 0,
                pwid: Some(100),
                ifmtu: None,
            }),
        },
    });

    let msgs = drain_main(&mut main_rx);
    assert!(
        msgs.iter()
            .any(|msg| matches!(msg, LdeToMainMsg::KPwLabelDelete(..)))
    );
}

// An interface-MTU mismatch releases the label instead of bringing the
// pseudowire up.
#[test]
fn test_pw_mtu_mismatch() {
    let (mut lde, mut ldpe_rx, mut main_rx) = new_lde(pw_config());
    nbr_up(&mut lde);
    drain_ldpe(&mut ldpe_rx);

    lde.process_ldpe_msg(LdpeToLdeMsg::LabelMapping {
        peerid: PEERID,
        map: pw_map(300, true, 1400),
    });

    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::ReleaseAdd { peerid: PEERID, map }
            if map.label == Some(Label::new(300)))));
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::NotificationSend { peerid: PEERID, notify }
            if StatusCode::decode(notify.status_code)
                == Some(StatusCode::GenericMisconfig))));
    assert!(drain_main(&mut main_rx).is_empty());
}

// A peer refusing the control word gets a release, and the pseudowire is
// re-advertised without it.
#[test]
fn test_pw_cword_mismatch() {
    let (mut lde, mut ldpe_rx, _main_rx) = new_lde(pw_config());
    nbr_up(&mut lde);
    drain_ldpe(&mut ldpe_rx);

    lde.process_ldpe_msg(LdpeToLdeMsg::LabelMapping {
        peerid: PEERID,
        map: pw_map(300, false, 1500),
    });

    let msgs = drain_ldpe(&mut ldpe_rx);
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::NotificationSend { peerid: PEERID, notify }
            if StatusCode::decode(notify.status_code)
                == Some(StatusCode::WrongCBit))));
    // Re-advertised without the control word.
    assert!(msgs.iter().any(|msg| matches!(msg,
        LdeToLdpeMsg::MappingAdd { peerid: PEERID, map }
            if !map.cword
                && matches!(map.fec, MapFec::Pwid { pwid: Some(100), .. }))));
}
