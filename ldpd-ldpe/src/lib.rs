//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod collections;
pub mod control;
pub mod debug;
pub mod discovery;
pub mod error;
pub mod events;
pub mod interface;
pub mod ldpe;
pub mod neighbor;
pub mod network;
pub mod tasks;
