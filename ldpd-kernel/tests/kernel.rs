//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ldpd_kernel::fib::{Fib, FibOp, KernelEvent};
use ldpd_kernel::kernel::{Kernel, KernelChannelsTx};
use ldpd_kernel::kroute::{
    KrouteTable, RTP_BGP, RTP_CONNECTED, RTP_OSPF, RedistChange,
};
use ldpd_utils::config::Config;
use ldpd_utils::ibus::{
    IbusReceiver, Kroute, KrouteFlags, LdeToMainMsg, MainToLdeMsg,
    MainToLdpeMsg,
};
use ldpd_utils::mpls::Label;
use tokio::sync::mpsc;

fn prefix() -> Ipv4Network {
    Ipv4Network::new(Ipv4Addr::new(192, 0, 2, 0), 24).unwrap()
}

fn kroute(nexthop: Ipv4Addr, priority: u8) -> Kroute {
    Kroute {
        prefix: prefix(),
        nexthop,
        local_label: None,
        remote_label: None,
        ifindex: 2,
        priority,
        flags: KrouteFlags::empty(),
    }
}

fn new_kernel() -> (
    Kernel,
    IbusReceiver<MainToLdpeMsg>,
    IbusReceiver<MainToLdeMsg>,
) {
    let (fib, _event_tx, _event_rx) = Fib::init_test();
    let (ldpe_tx, ldpe_rx) = mpsc::unbounded_channel();
    let (lde_tx, lde_rx) = mpsc::unbounded_channel();
    let kernel = Kernel::new(
        Config::new(Ipv4Addr::new(1, 1, 1, 1)),
        fib,
        KernelChannelsTx {
            ldpe: ldpe_tx,
            lde: lde_tx,
        },
    );
    (kernel, ldpe_rx, lde_rx)
}

fn drain_lde(rx: &mut IbusReceiver<MainToLdeMsg>) -> Vec<MainToLdeMsg> {
    let mut msgs = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

// Only the best priority of a prefix is redistributed; BGP routes never
// are.
#[test]
fn test_kroute_redistribution() {
    let mut krt = KrouteTable::default();

    // First route at the OSPF priority.
    let ospf = kroute(Ipv4Addr::new(10, 1, 1, 1), RTP_OSPF);
    assert_eq!(krt.insert(ospf), RedistChange::Add(vec![ospf]));

    // An ECMP nexthop at the same priority.
    let ospf2 = kroute(Ipv4Addr::new(10, 1, 2, 1), RTP_OSPF);
    assert_eq!(krt.insert(ospf2), RedistChange::Add(vec![ospf2]));

    // A better (connected) priority displaces the OSPF set.
    let conn = kroute(Ipv4Addr::new(10, 1, 3, 1), RTP_CONNECTED);
    assert_eq!(
        krt.insert(conn),
        RedistChange::Replace {
            del: vec![ospf, ospf2],
            add: vec![conn],
        }
    );

    // Removing it promotes the OSPF set back.
    assert_eq!(
        krt.remove(&conn),
        RedistChange::Replace {
            del: vec![conn],
            add: vec![ospf, ospf2],
        }
    );

    // BGP routes are not acceptable at all.
    let bgp = kroute(Ipv4Addr::new(10, 1, 4, 1), RTP_BGP);
    assert!(!KrouteTable::acceptable(&bgp));

    // Reject and blackhole routes neither.
    let mut reject = kroute(Ipv4Addr::new(10, 1, 5, 1), RTP_OSPF);
    reject.flags.insert(KrouteFlags::REJECT);
    assert!(!KrouteTable::acceptable(&reject));
}

// Label changes program the MPLS LSP and the labeled IPv4 route; label
// deletes revert both.
#[tokio::test]
async fn test_label_programming() {
    let (mut kernel, _ldpe_rx, mut lde_rx) = new_kernel();

    let nexthop = Ipv4Addr::new(10, 1, 1, 1);
    kernel
        .process_event(KernelEvent::RouteAdd(kroute(nexthop, RTP_OSPF)))
        .await;
    let msgs = drain_lde(&mut lde_rx);
    assert!(
        msgs.iter()
            .any(|msg| matches!(msg, MainToLdeMsg::NetworkAdd(..)))
    );

    // Install local and remote labels.
    let mut kr = kroute(nexthop, RTP_OSPF);
    kr.local_label = Some(Label::new(100));
    kr.remote_label = Some(Label::new(200));
    kernel
        .process_lde_msg(LdeToMainMsg::KLabelChange(kr))
        .await;

    let ops = kernel.fib.take_ops();
    assert!(ops.iter().any(|op| matches!(op,
        FibOp::MplsRouteAdd { local_label, remote_label, nexthop: nh }
            if *local_label == Label::new(100)
                && *remote_label == Some(Label::new(200))
                && *nh == nexthop)));
    assert!(ops.iter().any(|op| matches!(op,
        FibOp::IpRouteSet { encap, .. }
            if *encap == Some(Label::new(200)))));

    // Deleting the labels reverts to the plain IPv4 route.
    kernel
        .process_lde_msg(LdeToMainMsg::KLabelDelete(kr))
        .await;
    let ops = kernel.fib.take_ops();
    assert!(ops.iter().any(|op| matches!(op,
        FibOp::MplsRouteDel { local_label }
            if *local_label == Label::new(100))));
    assert!(ops.iter().any(|op| {
        matches!(op, FibOp::IpRouteSet { encap: None, .. })
    }));
}

// Implicit-null local labels are never installed as MPLS routes.
#[tokio::test]
async fn test_label_programming_implicit_null() {
    let (mut kernel, _ldpe_rx, mut lde_rx) = new_kernel();

    let nexthop = Ipv4Addr::new(10, 1, 1, 1);
    kernel
        .process_event(KernelEvent::RouteAdd(kroute(nexthop, RTP_OSPF)))
        .await;
    drain_lde(&mut lde_rx);

    let mut kr = kroute(nexthop, RTP_OSPF);
    kr.local_label = Some(Label::new(Label::IMPLICIT_NULL));
    kr.remote_label = Some(Label::new(200));
    kernel
        .process_lde_msg(LdeToMainMsg::KLabelChange(kr))
        .await;

    let ops = kernel.fib.take_ops();
    assert!(
        !ops.iter()
            .any(|op| matches!(op, FibOp::MplsRouteAdd { .. }))
    );
    assert!(
        ops.iter()
            .any(|op| matches!(op, FibOp::IpRouteSet { .. }))
    );
}

// Decoupling removes all LDP-inserted routes; recoupling reinstalls them.
#[tokio::test]
async fn test_fib_coupling() {
    let (mut kernel, _ldpe_rx, mut lde_rx) = new_kernel();

    let nexthop = Ipv4Addr::new(10, 1, 1, 1);
    kernel
        .process_event(KernelEvent::RouteAdd(kroute(nexthop, RTP_OSPF)))
        .await;
    drain_lde(&mut lde_rx);

    let mut kr = kroute(nexthop, RTP_OSPF);
    kr.local_label = Some(Label::new(100));
    kr.remote_label = Some(Label::new(200));
    kernel
        .process_lde_msg(LdeToMainMsg::KLabelChange(kr))
        .await;
    kernel.fib.take_ops();

    kernel.fib_decouple().await;
    let ops = kernel.fib.take_ops();
    assert!(
        ops.iter()
            .any(|op| matches!(op, FibOp::MplsRouteDel { .. }))
    );

    kernel.fib_couple().await;
    let ops = kernel.fib.take_ops();
    assert!(
        ops.iter()
            .any(|op| matches!(op, FibOp::MplsRouteAdd { .. }))
    );
}
