//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ldpd_utils::config::*;
use ldpd_utils::l2vpn::PwType;
use ldpd_utils::socket::{McastMemberships, UdpSocket};

fn base_config() -> Config {
    let mut config = Config::new(Ipv4Addr::new(1, 1, 1, 1));
    config.interfaces.push(IfaceCfg {
        name: "eth0".to_owned(),
        hello_holdtime: 15,
        hello_interval: 5,
    });
    config.tnbrs.push(TnbrCfg {
        address: Ipv4Addr::new(3, 3, 3, 3),
        hello_holdtime: 45,
        hello_interval: 5,
    });
    config.neighbors.push(NbrParams {
        lsr_id: Ipv4Addr::new(2, 2, 2, 2),
        password: Some("sesame".to_owned()),
    });
    config.l2vpns.push(L2vpnCfg {
        name: "customer-a".to_owned(),
        pw_type: PwType::Ethernet,
        mtu: 1500,
        bridge: None,
        interfaces: vec![],
        pseudowires: vec![L2vpnPwCfg {
            name: "mpw0".to_owned(),
            lsr_id: Ipv4Addr::new(2, 2, 2, 2),
            pwid: 100,
            control_word: true,
            status_tlv: true,
        }],
    });
    config
}

#[test]
fn test_merge_global() {
    let mut running = base_config();
    let mut new = base_config();
    new.keepalive = 60;
    new.explicit_null = true;
    new.transport_address = Some(Ipv4Addr::new(9, 9, 9, 9));

    let changes = running.merge(new);
    assert!(changes.keepalive_changed);
    assert!(changes.egress_label_changed);
    assert!(changes.trans_addr_changed);
    assert_eq!(running.keepalive, 60);
    assert_eq!(running.trans_addr(), Ipv4Addr::new(9, 9, 9, 9));
}

#[test]
fn test_merge_entities() {
    let mut running = base_config();
    let mut new = base_config();
    new.interfaces[0].hello_interval = 2;
    new.interfaces.push(IfaceCfg {
        name: "eth1".to_owned(),
        hello_holdtime: 15,
        hello_interval: 5,
    });
    new.tnbrs.clear();
    new.neighbors[0].password = None;

    let changes = running.merge(new);
    assert_eq!(changes.updated_ifaces, vec!["eth0".to_owned()]);
    assert_eq!(changes.new_ifaces, vec!["eth1".to_owned()]);
    assert_eq!(changes.deleted_tnbrs, vec![Ipv4Addr::new(3, 3, 3, 3)]);
    assert_eq!(changes.updated_nbrps, vec![Ipv4Addr::new(2, 2, 2, 2)]);
    assert_eq!(running.interfaces.len(), 2);
    assert!(running.tnbrs.is_empty());
}

// Changing a pseudowire's control-word flag, PWid or peer LSR-ID forces it
// to be torn down and reinitialized.
#[test]
fn test_merge_pw_reset() {
    let mut running = base_config();
    let mut new = base_config();
    new.l2vpns[0].pseudowires[0].control_word = false;

    let changes = running.merge(new);
    assert_eq!(
        changes.reset_pws,
        vec![("customer-a".to_owned(), "mpw0".to_owned())]
    );

    // Deleting the whole l2vpn also reports its pseudowires as deleted.
    let mut new = base_config();
    new.l2vpns.clear();
    let changes = running.merge(new);
    assert_eq!(changes.deleted_l2vpns, vec!["customer-a".to_owned()]);
    assert_eq!(
        changes.deleted_pws,
        vec![("customer-a".to_owned(), "mpw0".to_owned())]
    );
}

// The reload stream must reassemble into the original tree.
#[test]
fn test_reconf_stream() {
    let config = base_config();

    let mut pending = None;
    let mut rebuilt = None;
    for msg in config.reconf_messages() {
        if let Some(done) = Config::reconf_accumulate(&mut pending, msg) {
            rebuilt = Some(done);
        }
    }

    assert_eq!(rebuilt, Some(config));
}

// Multicast group memberships are reference counted per (interface, group).
#[test]
fn test_mcast_membership_refcount() {
    let socket = UdpSocket::default();
    let group = Ipv4Addr::new(224, 0, 0, 2);
    let mut memberships = McastMemberships::default();

    memberships.join(&socket, group, 1).unwrap();
    memberships.join(&socket, group, 1).unwrap();
    assert!(memberships.is_member(group, 1));

    memberships.leave(&socket, group, 1).unwrap();
    assert!(memberships.is_member(group, 1));
    memberships.leave(&socket, group, 1).unwrap();
    assert!(!memberships.is_member(group, 1));
}
