//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ldpd_packet::Message;
use ldpd_packet::messages::HelloMsg;
use tracing::{debug, debug_span};

use crate::discovery::AdjacencySource;
use crate::neighbor;

// LDP engine debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InterfaceCreate(&'a str),
    InterfaceDelete(&'a str),
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    TargetedNbrCreate(&'a Ipv4Addr),
    TargetedNbrDelete(&'a Ipv4Addr),
    TargetedNbrStart(&'a Ipv4Addr),
    TargetedNbrStop(&'a Ipv4Addr),
    AdjacencyCreate(&'a AdjacencySource, &'a Ipv4Addr),
    AdjacencyDelete(&'a AdjacencySource, &'a Ipv4Addr),
    AdjacencyTimeout(&'a AdjacencySource, &'a Ipv4Addr),
    AdjacencyHelloRx(&'a AdjacencySource, &'a Ipv4Addr, &'a HelloMsg),
    NoMatchingHelloAdjacency(&'a Ipv4Addr),
    NbrCreate(&'a Ipv4Addr),
    NbrDelete(&'a Ipv4Addr),
    NbrFsmTransition(
        &'a Ipv4Addr,
        &'a neighbor::fsm::Event,
        &'a neighbor::fsm::State,
        &'a neighbor::fsm::State,
    ),
    NbrMsgRx(&'a Ipv4Addr, &'a Message),
    NbrMsgTx(&'a Ipv4Addr, &'a Message),
    NbrInitBackoffTimeout(&'a Ipv4Addr),
}

// Reason why LDP is inactive on an interface.
#[derive(Clone, Copy, Debug)]
pub enum InterfaceInactiveReason {
    AdminDown,
    OperationalDown,
    MissingIfindex,
    MissingIpAddress,
}

// ===== impl Debug =====

impl<'a> Debug<'a> {
    // Log debug message using the tracing API.
    pub fn log(&self) {
        match self {
            Debug::InterfaceCreate(name)
            | Debug::InterfaceDelete(name)
            | Debug::InterfaceStart(name) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::InterfaceStop(name, reason) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(%reason, "{}", self);
                });
            }
            Debug::TargetedNbrCreate(addr)
            | Debug::TargetedNbrDelete(addr)
            | Debug::TargetedNbrStart(addr)
            | Debug::TargetedNbrStop(addr) => {
                debug_span!("targeted-nbr", address = %addr).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::AdjacencyCreate(source, lsr_id)
            | Debug::AdjacencyDelete(source, lsr_id)
            | Debug::AdjacencyTimeout(source, lsr_id) => {
                debug!(%source, %lsr_id, "{}", self);
            }
            Debug::AdjacencyHelloRx(source, lsr_id, msg) => {
                debug_span!("discovery").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%source, %lsr_id, %data, "{}", self);
                    })
                });
            }
            Debug::NoMatchingHelloAdjacency(source) => {
                debug!(%source, "{}", self);
            }
            Debug::NbrCreate(lsr_id) | Debug::NbrDelete(lsr_id) => {
                debug_span!("neighbor", %lsr_id).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::NbrFsmTransition(lsr_id, event, old_state, new_state) => {
                debug_span!("neighbor", %lsr_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, ?old_state, ?new_state, "{}", self);
                    })
                });
            }
            Debug::NbrMsgRx(lsr_id, msg) => {
                debug_span!("neighbor", %lsr_id).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(r#type = %msg.msg_type(), %data, "{}", self);
                    })
                });
            }
            Debug::NbrMsgTx(lsr_id, msg) => {
                debug_span!("neighbor", %lsr_id).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(r#type = %msg.msg_type(), %data, "{}", self);
                    })
                });
            }
            Debug::NbrInitBackoffTimeout(lsr_id) => {
                debug_span!("neighbor", %lsr_id).in_scope(|| {
                    debug!("{}", self);
                });
            }
        }
    }
}

impl<'a> std::fmt::Display for Debug<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceDelete(..) => {
                write!(f, "interface deleted")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::TargetedNbrCreate(..) => {
                write!(f, "targeted neighbor created")
            }
            Debug::TargetedNbrDelete(..) => {
                write!(f, "targeted neighbor deleted")
            }
            Debug::TargetedNbrStart(..) => {
                write!(f, "starting targeted neighbor")
            }
            Debug::TargetedNbrStop(..) => {
                write!(f, "stopping targeted neighbor")
            }
            Debug::AdjacencyCreate(..) => {
                write!(f, "adjacency created")
            }
            Debug::AdjacencyDelete(..) => {
                write!(f, "adjacency deleted")
            }
            Debug::AdjacencyTimeout(..) => {
                write!(f, "adjacency timed out")
            }
            Debug::AdjacencyHelloRx(..) => {
                write!(f, "hello message")
            }
            Debug::NoMatchingHelloAdjacency(..) => {
                write!(f, "no matching hello adjacency")
            }
            Debug::NbrCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NbrDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NbrMsgRx(..) | Debug::NbrMsgTx(..) => {
                write!(f, "message")
            }
            Debug::NbrInitBackoffTimeout(..) => {
                write!(f, "initialization backoff timer expired")
            }
        }
    }
}

// ===== impl InterfaceInactiveReason =====

impl std::fmt::Display for InterfaceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceInactiveReason::AdminDown => {
                write!(f, "administrative status down")
            }
            InterfaceInactiveReason::OperationalDown => {
                write!(f, "operational status down")
            }
            InterfaceInactiveReason::MissingIfindex => {
                write!(f, "missing ifindex")
            }
            InterfaceInactiveReason::MissingIpAddress => {
                write!(f, "missing IP address")
            }
        }
    }
}
