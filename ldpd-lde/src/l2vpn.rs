//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use ldpd_utils::config::{L2vpnCfg, L2vpnPwCfg};
use ldpd_utils::l2vpn::PwType;

// A Layer-2 VPN instance (VPLS or VPWS) and its pseudowires.
#[derive(Debug)]
pub struct L2vpn {
    pub name: String,
    pub pw_type: PwType,
    pub mtu: u16,
    pub br_ifname: Option<String>,
    // Attachment-circuit member interfaces.
    pub interfaces: BTreeMap<String, L2vpnIf>,
    pub pws: BTreeMap<String, L2vpnPw>,
}

#[derive(Debug)]
pub struct L2vpnIf {
    pub ifname: String,
    pub ifindex: Option<u32>,
    pub operative: bool,
}

// A point-to-point L2 circuit identified by (peer LSR-ID, PWid, PW type).
#[derive(Debug)]
pub struct L2vpnPw {
    pub name: String,
    pub lsr_id: Ipv4Addr,
    // Remote endpoint address of the pseudowire (the peer's LSR-ID doubles
    // as its address).
    pub addr: Ipv4Addr,
    pub pwid: u32,
    // Local pseudowire interface.
    pub ifname: String,
    pub ifindex: Option<u32>,
    // Remote-advertised parameters.
    pub remote_group: u32,
    pub remote_mtu: Option<u16>,
    pub remote_status: u32,
    pub flags: PwFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PwFlags: u8 {
        // Status TLV configured locally.
        const STATUSTLV_CONF = 0x01;
        // Status TLV negotiated with the peer.
        const STATUSTLV = 0x02;
        // Control word configured locally.
        const CWORD_CONF = 0x04;
        // Control word negotiated with the peer.
        const CWORD = 0x08;
        // Pseudowire installed in the kernel.
        const STATUS_UP = 0x10;
    }
}

// ===== impl L2vpn =====

impl L2vpn {
    pub(crate) fn from_config(cfg: &L2vpnCfg) -> L2vpn {
        let mut l2vpn = L2vpn {
            name: cfg.name.clone(),
            pw_type: cfg.pw_type,
            mtu: cfg.mtu,
            br_ifname: cfg.bridge.clone(),
            interfaces: Default::default(),
            pws: Default::default(),
        };
        for lif in &cfg.interfaces {
            l2vpn.interfaces.insert(
                lif.name.clone(),
                L2vpnIf {
                    ifname: lif.name.clone(),
                    ifindex: None,
                    operative: false,
                },
            );
        }
        for pw in &cfg.pseudowires {
            l2vpn.pws.insert(pw.name.clone(), L2vpnPw::from_config(pw));
        }
        l2vpn
    }
}

// ===== impl L2vpnPw =====

impl L2vpnPw {
    pub(crate) fn from_config(cfg: &L2vpnPwCfg) -> L2vpnPw {
        let mut flags = PwFlags::empty();
        if cfg.control_word {
            flags.insert(PwFlags::CWORD_CONF | PwFlags::CWORD);
        }
        if cfg.status_tlv {
            flags.insert(PwFlags::STATUSTLV_CONF);
        }

        L2vpnPw {
            name: cfg.name.clone(),
            lsr_id: cfg.lsr_id,
            addr: cfg.lsr_id,
            pwid: cfg.pwid,
            ifname: cfg.name.clone(),
            ifindex: None,
            remote_group: 0,
            remote_mtu: None,
            remote_status: 0,
            flags,
        }
    }

    pub(crate) fn is_status_up(&self) -> bool {
        self.flags.contains(PwFlags::STATUS_UP)
    }

    // Whether the remote end reported itself as forwarding. Without status
    // TLV support the pseudowire state is inferred from the labels alone.
    pub(crate) fn remote_forwarding(&self) -> bool {
        !self.flags.contains(PwFlags::STATUSTLV) || self.remote_status == 0
    }
}
