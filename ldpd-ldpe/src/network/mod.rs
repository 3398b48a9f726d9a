//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod tcp;
pub mod udp;

// LDP discovery and session port.
pub const LDP_PORT: u16 = 646;
