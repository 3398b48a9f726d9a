//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ldpd_utils::mpls::Label;
use tracing::{debug, debug_span};

use crate::fec::Fec;

// LDE debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    NbrCreate(u32, &'a Ipv4Addr),
    NbrDelete(u32, &'a Ipv4Addr),
    FecCreate(&'a Fec),
    FecDelete(&'a Fec),
    FecLabelUpdate(&'a Fec, &'a Option<Label>, &'a Option<Label>),
    NexthopLabelUpdate(&'a Fec, &'a Ipv4Addr, &'a Option<Label>),
    PwStatusUpdate(&'a str, u32),
    GcCollected(usize),
}

// ===== impl Debug =====

impl<'a> Debug<'a> {
    // Log debug message using the tracing API.
    pub fn log(&self) {
        match self {
            Debug::NbrCreate(peerid, lsr_id)
            | Debug::NbrDelete(peerid, lsr_id) => {
                debug_span!("neighbor", %lsr_id).in_scope(|| {
                    debug!(%peerid, "{}", self);
                });
            }
            Debug::FecCreate(fec) | Debug::FecDelete(fec) => {
                debug_span!("lib", %fec).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::FecLabelUpdate(fec, old_label, new_label) => {
                let old_label = old_label
                    .map(|label| label.to_string())
                    .unwrap_or_else(|| "none".to_string());
                let new_label = new_label
                    .map(|label| label.to_string())
                    .unwrap_or_else(|| "none".to_string());

                debug_span!("lib", %fec).in_scope(|| {
                    debug!(%old_label, %new_label, "{}", self);
                });
            }
            Debug::NexthopLabelUpdate(fec, nexthop, new_label) => {
                let new_label = new_label
                    .map(|label| label.to_string())
                    .unwrap_or_else(|| "none".to_string());

                debug_span!("lib", %fec).in_scope(|| {
                    debug!(address = %nexthop, %new_label, "{}", self);
                });
            }
            Debug::PwStatusUpdate(pw, status) => {
                debug_span!("l2vpn", %pw).in_scope(|| {
                    debug!(status = format!("0x{:08x}", status), "{}", self);
                });
            }
            Debug::GcCollected(count) => {
                debug!(%count, "{}", self);
            }
        }
    }
}

impl<'a> std::fmt::Display for Debug<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::NbrCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NbrDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::FecCreate(..) => {
                write!(f, "FEC created")
            }
            Debug::FecDelete(..) => {
                write!(f, "FEC deleted")
            }
            Debug::FecLabelUpdate(..) => {
                write!(f, "FEC label updated")
            }
            Debug::NexthopLabelUpdate(..) => {
                write!(f, "nexthop label updated")
            }
            Debug::PwStatusUpdate(..) => {
                write!(f, "pseudowire status updated")
            }
            Debug::GcCollected(..) => {
                write!(f, "garbage-collected orphan FEC entries")
            }
        }
    }
}
