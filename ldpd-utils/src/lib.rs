//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod bytes;
pub mod capabilities;
pub mod config;
pub mod ibus;
pub mod ip;
pub mod l2vpn;
pub mod mpls;
pub mod socket;
pub mod task;

pub use tokio::sync::mpsc::{Sender, UnboundedReceiver, UnboundedSender};
