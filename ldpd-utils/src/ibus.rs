//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ReconfMsg;
use crate::l2vpn::{PwStatus, PwType};
use crate::mpls::Label;

// Useful type definitions.
pub type IbusSender<T> = mpsc::UnboundedSender<T>;
pub type IbusReceiver<T> = mpsc::UnboundedReceiver<T>;

//
// FEC/label transfer record exchanged between the LDPE and the LDE.
//
// This is the process-neutral form of a single FEC element plus the optional
// parameters that ride along with it in label messages.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Map {
    pub fec: MapFec,
    pub label: Option<Label>,
    pub request_id: Option<u32>,
    pub pw_status: Option<PwStatus>,
    pub cword: bool,
    // Wire message ID of the originating message (receive direction only).
    pub msg_id: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MapFec {
    Wildcard,
    Prefix(Ipv4Network),
    Pwid {
        pw_type: PwType,
        group_id: u32,
        pwid: Option<u32>,
        ifmtu: Option<u16>,
    },
}

// Notification transfer record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Notify {
    pub status_code: u32,
    pub msg_id: u32,
    pub msg_type: u16,
    pub pw_status: Option<PwStatus>,
    pub fec: Option<MapFec>,
}

// Kernel route record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Kroute {
    pub prefix: Ipv4Network,
    pub nexthop: Ipv4Addr,
    pub local_label: Option<Label>,
    pub remote_label: Option<Label>,
    pub ifindex: u32,
    pub priority: u8,
    pub flags: KrouteFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct KrouteFlags: u16 {
        const CONNECTED = 0x0001;
        const STATIC = 0x0002;
        const LDPD_INSERTED = 0x0004;
        const REJECT = 0x0008;
        const BLACKHOLE = 0x0010;
        const REDISTRIBUTED = 0x0020;
    }
}

// Kernel pseudowire record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Kpw {
    pub ifindex: u32,
    pub pw_type: PwType,
    pub nexthop: Ipv4Addr,
    pub local_label: Option<Label>,
    pub remote_label: Option<Label>,
    pub cword: bool,
}

// Kernel interface address record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Kaddr {
    pub ifindex: u32,
    pub addr: Ipv4Network,
}

// Kernel interface status record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KifUpdate {
    pub ifname: String,
    pub ifindex: u32,
    pub operative: bool,
    pub loopback: bool,
    pub mtu: u32,
}

// ===== messages =====

// Messages from the parent to the LDP engine.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum MainToLdpeMsg {
    IfStatus(KifUpdate),
    NewAddr(Kaddr),
    DelAddr(Kaddr),
    Reconf(ReconfMsg),
}

// Messages from the parent to the label decision engine.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum MainToLdeMsg {
    NetworkAdd(Kroute),
    NetworkDel(Kroute),
    IfStatus(KifUpdate),
    Reconf(ReconfMsg),
}

// Messages from the LDP engine to the label decision engine.
//
// A `NeighborUp` always precedes, and a `NeighborDown` always follows, every
// label and address message for that peer on this channel.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum LdpeToLdeMsg {
    LabelMapping { peerid: u32, map: Map },
    LabelRequest { peerid: u32, map: Map },
    LabelWithdraw { peerid: u32, map: Map },
    LabelRelease { peerid: u32, map: Map },
    LabelAbort { peerid: u32, map: Map },
    // Request a full LIB snapshot for a newly operational session.
    MappingDump { peerid: u32 },
    AddressAdd { peerid: u32, addr: Ipv4Addr },
    AddressDel { peerid: u32, addr: Ipv4Addr },
    Notification { peerid: u32, notify: Notify },
    NeighborUp { peerid: u32, lsr_id: Ipv4Addr },
    NeighborDown { peerid: u32 },
    ShowLib { client_id: u64 },
    ShowL2vpnPw { client_id: u64 },
}

// Messages from the label decision engine to the LDP engine.
//
// Label advertisements are batched: a sequence of `*Add` messages followed by
// the matching `*AddEnd` marker, which triggers the actual PDU transmission.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum LdeToLdpeMsg {
    MappingAdd { peerid: u32, map: Map },
    MappingAddEnd { peerid: u32 },
    RequestAdd { peerid: u32, map: Map },
    RequestAddEnd { peerid: u32 },
    ReleaseAdd { peerid: u32, map: Map },
    ReleaseAddEnd { peerid: u32 },
    WithdrawAdd { peerid: u32, map: Map },
    WithdrawAddEnd { peerid: u32 },
    NotificationSend { peerid: u32, notify: Notify },
    CtlLibEntry { client_id: u64, entry: CtlRt },
    CtlPw { client_id: u64, entry: CtlPw },
    CtlEnd { client_id: u64 },
}

// Messages from the label decision engine to the parent.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum LdeToMainMsg {
    KLabelChange(Kroute),
    KLabelDelete(Kroute),
    KPwLabelChange(Kpw),
    KPwLabelDelete(Kpw),
}

// Messages from the LDP engine to the parent.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum LdpeToMainMsg {
    FibCouple,
    FibDecouple,
    Reload,
    LogVerbose(bool),
}

// ===== control socket =====

// Control socket messages.
//
// The control socket carries 4-byte length-prefixed JSON frames of this
// enumeration, requests and replies alike.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum CtlMsg {
    // Requests.
    ShowInterfaces,
    ShowDiscovery,
    ShowNeighbors,
    ShowLib,
    ShowL2vpnPw,
    FibCouple,
    FibDecouple,
    Reload,
    LogVerbose(bool),
    // Replies.
    Iface(CtlIface),
    Adjacency(CtlAdj),
    Neighbor(CtlNbr),
    LibEntry(CtlRt),
    Pw(CtlPw),
    End,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct CtlIface {
    pub name: String,
    pub ifindex: u32,
    pub state: String,
    pub uptime: u64,
    pub adj_count: u16,
    pub hello_holdtime: u16,
    pub hello_interval: u16,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct CtlAdj {
    pub lsr_id: Ipv4Addr,
    pub targeted: bool,
    pub ifname: Option<String>,
    pub src_addr: Ipv4Addr,
    pub holdtime: u16,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct CtlNbr {
    pub lsr_id: Ipv4Addr,
    pub addr: Ipv4Addr,
    pub state: String,
    pub uptime: Option<u64>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct CtlRt {
    pub fec: String,
    pub nexthop: Option<Ipv4Addr>,
    pub local_label: Option<Label>,
    pub remote_label: Option<Label>,
    pub in_use: bool,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct CtlPw {
    pub l2vpn: String,
    pub ifname: String,
    pub pwid: u32,
    pub lsr_id: Ipv4Addr,
    pub local_label: Option<Label>,
    pub remote_label: Option<Label>,
    pub remote_mtu: Option<u16>,
    pub status_up: bool,
}

// ===== channel bundles =====

// The parent's ends of the message pipes.
#[derive(Debug)]
pub struct MainPipes {
    pub to_ldpe: IbusSender<MainToLdpeMsg>,
    pub to_lde: IbusSender<MainToLdeMsg>,
    pub from_ldpe: IbusReceiver<LdpeToMainMsg>,
    pub from_lde: IbusReceiver<LdeToMainMsg>,
}

// The LDP engine's ends of the message pipes.
#[derive(Debug)]
pub struct LdpePipes {
    pub from_main: IbusReceiver<MainToLdpeMsg>,
    pub from_lde: IbusReceiver<LdeToLdpeMsg>,
    pub to_lde: IbusSender<LdpeToLdeMsg>,
    pub to_main: IbusSender<LdpeToMainMsg>,
}

// The label decision engine's ends of the message pipes.
#[derive(Debug)]
pub struct LdePipes {
    pub from_main: IbusReceiver<MainToLdeMsg>,
    pub from_ldpe: IbusReceiver<LdpeToLdeMsg>,
    pub to_ldpe: IbusSender<LdeToLdpeMsg>,
    pub to_main: IbusSender<LdeToMainMsg>,
}

// Creates the three pairs of bidirectional pipes binding the processes
// together.
pub fn pipes() -> (MainPipes, LdpePipes, LdePipes) {
    let (main_ldpe_tx, main_ldpe_rx) = mpsc::unbounded_channel();
    let (main_lde_tx, main_lde_rx) = mpsc::unbounded_channel();
    let (ldpe_main_tx, ldpe_main_rx) = mpsc::unbounded_channel();
    let (lde_main_tx, lde_main_rx) = mpsc::unbounded_channel();
    let (ldpe_lde_tx, ldpe_lde_rx) = mpsc::unbounded_channel();
    let (lde_ldpe_tx, lde_ldpe_rx) = mpsc::unbounded_channel();

    let main = MainPipes {
        to_ldpe: main_ldpe_tx,
        to_lde: main_lde_tx,
        from_ldpe: ldpe_main_rx,
        from_lde: lde_main_rx,
    };
    let ldpe = LdpePipes {
        from_main: main_ldpe_rx,
        from_lde: lde_ldpe_rx,
        to_lde: ldpe_lde_tx,
        to_main: ldpe_main_tx,
    };
    let lde = LdePipes {
        from_main: main_lde_rx,
        from_ldpe: ldpe_lde_rx,
        to_ldpe: lde_ldpe_tx,
        to_main: lde_main_tx,
    };

    (main, ldpe, lde)
}

// ===== impl Map =====

impl Map {
    pub fn new(fec: MapFec) -> Map {
        Map {
            fec,
            label: None,
            request_id: None,
            pw_status: None,
            cword: false,
            msg_id: 0,
        }
    }
}

impl std::fmt::Display for MapFec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapFec::Wildcard => write!(f, "wildcard"),
            MapFec::Prefix(prefix) => write!(f, "{}", prefix),
            MapFec::Pwid { pw_type, pwid, .. } => match pwid {
                Some(pwid) => write!(f, "pwid {} ({})", pwid, pw_type),
                None => write!(f, "pwid (0) ({})", pw_type),
            },
        }
    }
}
