//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ldpd_ldpe::neighbor::Neighbor;
use ldpd_ldpe::neighbor::fsm::{Action, Event, State, transition};

// Every transition of the session state machine, row by row.
#[test]
fn test_fsm_transitions() {
    // Discovery states.
    assert_eq!(
        transition(State::DOWN, Event::MatchAdj),
        Some((Action::Nothing, Some(State::PRESENT)))
    );
    assert_eq!(
        transition(State::OPERATIONAL, Event::MatchAdj),
        Some((Action::Nothing, None))
    );
    assert_eq!(
        transition(State::PRESENT, Event::ConnectUp),
        Some((Action::ConnectSetup, Some(State::INITIAL)))
    );

    // Passive role.
    assert_eq!(
        transition(State::INITIAL, Event::InitRcvd),
        Some((Action::PassiveInit, Some(State::OPENREC)))
    );
    assert_eq!(
        transition(State::OPENREC, Event::KeepaliveRcvd),
        Some((Action::SessionEstablish, Some(State::OPERATIONAL)))
    );

    // Active role.
    assert_eq!(
        transition(State::INITIAL, Event::InitSent),
        Some((Action::Nothing, Some(State::OPENSENT)))
    );
    assert_eq!(
        transition(State::OPENSENT, Event::InitRcvd),
        Some((Action::KeepaliveSend, Some(State::OPENREC)))
    );

    // Session maintenance.
    assert_eq!(
        transition(State::OPERATIONAL, Event::PduRcvd),
        Some((Action::ResetKTimeout, None))
    );
    assert_eq!(
        transition(State::OPERATIONAL, Event::PduSent),
        Some((Action::ResetKTimer, None))
    );

    // Session close applies to every state with a TCP connection.
    for state in [
        State::INITIAL,
        State::OPENREC,
        State::OPENSENT,
        State::OPERATIONAL,
    ] {
        assert_eq!(
            transition(state, Event::CloseSession),
            Some((Action::CloseSession, Some(State::PRESENT)))
        );
    }
}

// Events outside of the defined machine are ignored.
#[test]
fn test_fsm_unexpected_events() {
    assert_eq!(transition(State::DOWN, Event::ConnectUp), None);
    assert_eq!(transition(State::DOWN, Event::CloseSession), None);
    assert_eq!(transition(State::OPERATIONAL, Event::InitRcvd), None);
    assert_eq!(transition(State::OPERATIONAL, Event::KeepaliveRcvd), None);
    assert_eq!(transition(State::PRESENT, Event::PduRcvd), None);
    assert_eq!(transition(State::OPENSENT, Event::KeepaliveRcvd), None);
}

// The endpoint with the numerically greater transport address plays the
// active role; exactly one side of any pair does.
#[test]
fn test_session_role_selection() {
    let a = Neighbor::new(
        1,
        1,
        Ipv4Addr::new(2, 2, 2, 2),
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        180,
    );
    let b = Neighbor::new(
        2,
        2,
        Ipv4Addr::new(1, 1, 1, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        Ipv4Addr::new(10, 0, 0, 1),
        180,
    );

    assert!(!a.is_session_active_role());
    assert!(b.is_session_active_role());

    // Network byte order comparison, not per-octet string order.
    let c = Neighbor::new(
        3,
        3,
        Ipv4Addr::new(1, 1, 1, 1),
        Ipv4Addr::new(9, 200, 0, 1),
        Ipv4Addr::new(10, 0, 0, 1),
        180,
    );
    assert!(!c.is_session_active_role());
}

#[test]
fn test_fsm_state_names() {
    assert_eq!(State::DOWN.name(), "DOWN");
    assert_eq!(State::PRESENT.name(), "PRESENT");
    assert_eq!(State::OPERATIONAL.name(), "OPERATIONAL");
}

// The keepalive Tx interval is a third of the negotiated holdtime.
#[test]
fn test_kalive_interval() {
    let mut nbr = Neighbor::new(
        1,
        1,
        Ipv4Addr::new(2, 2, 2, 2),
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        180,
    );
    assert_eq!(nbr.kalive_interval(), 60);

    nbr.keepalive = 3;
    assert_eq!(nbr.kalive_interval(), 1);

    nbr.keepalive = 2;
    assert_eq!(nbr.kalive_interval(), 1);
}
