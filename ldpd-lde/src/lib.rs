//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod debug;
pub mod fec;
pub mod l2vpn;
pub mod lde;
pub mod neighbor;
