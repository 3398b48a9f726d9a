//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Instant;

use ipnetwork::Ipv4Network;
use ldpd_packet::messages::{
    HelloFlags, HelloMsg, TlvCommonHelloParams, TlvIpv4TransAddr,
};
use ldpd_packet::{Pdu, StatusCode};
use ldpd_utils::config::{Config, DEFAULT_HOLDTIME, IfaceCfg};
use ldpd_utils::socket::UdpSocket;
use ldpd_utils::task::IntervalTask;

use crate::collections::{AdjacencyIndex, InterfaceId};
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::discovery;
use crate::error::{Error, IoError};
use crate::ldpe::{LdpeChannelsTx, LdpeState};
use crate::network;
use crate::tasks;

#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub system: InterfaceSys,
    // Present iff the interface is in the configuration.
    pub config: Option<IfaceCfg>,
    pub state: Option<InterfaceState>,
}

#[derive(Debug, Default)]
pub struct InterfaceSys {
    pub ifindex: Option<u32>,
    pub operative: bool,
    pub loopback: bool,
    pub mtu: u32,
    pub addr_list: BTreeSet<Ipv4Network>,
}

#[derive(Debug)]
pub struct InterfaceState {
    // UDP discovery socket bound to this interface.
    pub disc_socket: Arc<UdpSocket>,
    // Hello Tx interval task.
    pub hello_interval_task: IntervalTask,
    // Activation time.
    pub uptime: Instant,
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(id: InterfaceId, name: String) -> Interface {
        Debug::InterfaceCreate(&name).log();

        Interface {
            id,
            name,
            system: InterfaceSys::default(),
            config: None,
            state: None,
        }
    }

    fn start(&mut self, state: &mut LdpeState) -> Result<(), Error> {
        Debug::InterfaceStart(&self.name).log();

        let disc_socket = network::udp::interface_discovery_socket(self)
            .map(Arc::new)
            .map_err(IoError::UdpSocketError)?;

        // Join the all-routers group on this interface, going through the
        // shared membership table so the group is joined exactly once.
        let ifindex = self.system.ifindex.unwrap();
        if let Err(error) = state.mcast_memberships.join(
            &state.disc_socket,
            network::udp::LDP_MCAST_ADDR_V4,
            ifindex,
        ) {
            IoError::UdpMulticastJoinError(error).log();
        }

        let hello_interval_task =
            tasks::iface_hello_interval(self, &disc_socket, state);

        self.state = Some(InterfaceState {
            disc_socket,
            hello_interval_task,
            uptime: Instant::now(),
        });

        Ok(())
    }

    pub(crate) fn stop(
        &mut self,
        state: &mut LdpeState,
        config: &Config,
        tx: &LdpeChannelsTx,
        reason: InterfaceInactiveReason,
    ) {
        Debug::InterfaceStop(&self.name, reason).log();

        if let Some(ifindex) = self.system.ifindex {
            if let Err(error) = state.mcast_memberships.leave(
                &state.disc_socket,
                network::udp::LDP_MCAST_ADDR_V4,
                ifindex,
            ) {
                IoError::UdpMulticastLeaveError(error).log();
            }
        }
        self.state = None;

        // Delete adjacencies.
        for adj_idx in state
            .adjacencies
            .get_by_iface(self.id)
            .iter()
            .flat_map(|adjs| adjs.values().cloned())
            .collect::<Vec<AdjacencyIndex>>()
        {
            discovery::adjacency_delete(
                state,
                config,
                tx,
                adj_idx,
                StatusCode::Shutdown,
            );
        }
    }

    // Enables or disables the interface if necessary.
    pub(crate) fn update(
        &mut self,
        state: &mut LdpeState,
        config: &Config,
        tx: &LdpeChannelsTx,
    ) {
        match self.is_ready() {
            Ok(()) if !self.is_active() => {
                // Attempt to activate interface.
                if let Err(error) = self.start(state) {
                    Error::InterfaceStartError(
                        self.name.clone(),
                        Box::new(error),
                    )
                    .log();
                }
            }
            Err(reason) if self.is_active() => {
                // Deactivate interface.
                self.stop(state, config, tx, reason);
            }
            _ => (),
        }
    }

    pub(crate) fn sync_hello_tx(&mut self, state: &LdpeState) {
        if let Some(iface_state) = &self.state {
            let hello_interval_task = tasks::iface_hello_interval(
                self,
                &iface_state.disc_socket,
                state,
            );

            let iface_state = self.state.as_mut().unwrap();
            iface_state.hello_interval_task = hello_interval_task;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    // An interface is ready for LDP operation when it is configured, its
    // link is up and it has at least one usable address.
    fn is_ready(&self) -> Result<(), InterfaceInactiveReason> {
        if self.config.is_none() {
            return Err(InterfaceInactiveReason::AdminDown);
        }

        if !self.system.operative {
            return Err(InterfaceInactiveReason::OperationalDown);
        }

        if self.system.ifindex.is_none() {
            return Err(InterfaceInactiveReason::MissingIfindex);
        }

        if self.system.addr_list.is_empty() {
            return Err(InterfaceInactiveReason::MissingIpAddress);
        }

        Ok(())
    }

    pub(crate) fn hello_holdtime(&self) -> u16 {
        self.config
            .as_ref()
            .map(|cfg| cfg.hello_holdtime)
            .unwrap_or(DEFAULT_HOLDTIME)
    }

    pub(crate) fn generate_hello(&self, state: &LdpeState) -> HelloMsg {
        HelloMsg {
            // The message ID will be overwritten later.
            msg_id: 0,
            params: TlvCommonHelloParams {
                holdtime: self.hello_holdtime(),
                flags: HelloFlags::empty(),
            },
            ipv4_addr: Some(TlvIpv4TransAddr(state.trans_addr)),
            ipv6_addr: None,
        }
    }

    pub(crate) async fn send_hello(
        disc_socket: Arc<UdpSocket>,
        router_id: Ipv4Addr,
        msg_id: Arc<AtomicU32>,
        mut hello: HelloMsg,
    ) {
        // Update hello message ID.
        hello.msg_id = LdpeState::get_next_msg_id(&msg_id);

        // Prepare hello PDU.
        let mut pdu = Pdu::new(router_id, 0);
        pdu.messages.push_back(hello.into());

        // Send multicast packet.
        if let Err(error) =
            network::udp::send_packet_multicast(&disc_socket, pdu).await
        {
            IoError::UdpSendError(error).log();
        }
    }

    pub(crate) fn calculate_adj_holdtime(&self, hello_holdtime: u16) -> u16 {
        let mut hello_holdtime = hello_holdtime;
        if hello_holdtime == 0 {
            hello_holdtime = DEFAULT_HOLDTIME;
        }

        std::cmp::min(self.hello_holdtime(), hello_holdtime)
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        Debug::InterfaceDelete(&self.name).log();
    }
}

// ===== impl InterfaceSys =====

impl InterfaceSys {
    // Checks if the interface shares a subnet with the given IP address.
    pub(crate) fn contains_addr(&self, addr: &Ipv4Addr) -> bool {
        self.addr_list.iter().any(|local| local.contains(*addr))
    }
}
