//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::l2vpn::PwType;

pub const CONF_FILE: &str = "/etc/ldpd.conf";
pub const LDPD_SOCKET: &str = "/var/run/ldpd.sock";
pub const LDPD_USER: &str = "_ldpd";

pub const DEFAULT_KEEPALIVE: u16 = 180;
pub const MIN_KEEPALIVE: u16 = 3;
pub const DEFAULT_HOLDTIME: u16 = 15;
pub const MIN_HOLDTIME: u16 = 3;
pub const INFINITE_HOLDTIME: u16 = 0xffff;
pub const DEFAULT_HELLO_INTERVAL: u16 = 5;
pub const MIN_HELLO_INTERVAL: u16 = 1;
pub const TARGETED_DFLT_HOLDTIME: u16 = 45;
pub const DEFAULT_L2VPN_MTU: u16 = 1500;

// Daemon configuration tree.
//
// The parent process owns the authoritative copy; reloads stream a freshly
// parsed tree to the children as `ReconfMsg` sequences, after which all three
// processes run the same in-place merge.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    pub router_id: Ipv4Addr,
    pub transport_address: Option<Ipv4Addr>,
    #[serde(default = "dflt_keepalive")]
    pub keepalive: u16,
    #[serde(default = "dflt_thello_holdtime")]
    pub targeted_hello_holdtime: u16,
    #[serde(default = "dflt_thello_interval")]
    pub targeted_hello_interval: u16,
    #[serde(default)]
    pub explicit_null: bool,
    #[serde(default)]
    pub targeted_hello_accept: bool,
    #[serde(default)]
    pub no_fib_update: bool,
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<IfaceCfg>,
    #[serde(default, rename = "targeted-neighbor")]
    pub tnbrs: Vec<TnbrCfg>,
    #[serde(default, rename = "neighbor")]
    pub neighbors: Vec<NbrParams>,
    #[serde(default, rename = "l2vpn")]
    pub l2vpns: Vec<L2vpnCfg>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct IfaceCfg {
    pub name: String,
    #[serde(default = "dflt_link_holdtime")]
    pub hello_holdtime: u16,
    #[serde(default = "dflt_hello_interval")]
    pub hello_interval: u16,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct TnbrCfg {
    pub address: Ipv4Addr,
    #[serde(default = "dflt_thello_holdtime")]
    pub hello_holdtime: u16,
    #[serde(default = "dflt_thello_interval")]
    pub hello_interval: u16,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct NbrParams {
    pub lsr_id: Ipv4Addr,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct L2vpnCfg {
    pub name: String,
    #[serde(default = "dflt_pw_type")]
    pub pw_type: PwType,
    #[serde(default = "dflt_l2vpn_mtu")]
    pub mtu: u16,
    #[serde(default)]
    pub bridge: Option<String>,
    #[serde(default, rename = "member")]
    pub interfaces: Vec<L2vpnIfCfg>,
    #[serde(default, rename = "pseudowire")]
    pub pseudowires: Vec<L2vpnPwCfg>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct L2vpnIfCfg {
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct L2vpnPwCfg {
    pub name: String,
    pub lsr_id: Ipv4Addr,
    pub pwid: u32,
    #[serde(default = "dflt_true")]
    pub control_word: bool,
    #[serde(default = "dflt_true")]
    pub status_tlv: bool,
}

// Configuration reload stream.
//
// The parent re-parses the file and replays the new tree to both children,
// entity by entity, terminated by `End`. Each receiver accumulates the
// entities into a pending tree and runs the merge when the end marker
// arrives.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum ReconfMsg {
    Conf(Box<Config>),
    Iface(IfaceCfg),
    Tnbr(TnbrCfg),
    Nbrp(NbrParams),
    L2vpn(L2vpnCfg),
    L2vpnIf { l2vpn: String, cfg: L2vpnIfCfg },
    L2vpnPw { l2vpn: String, cfg: L2vpnPwCfg },
    End,
}

// Report of what an in-place configuration merge changed.
//
// Each process walks the relevant fields and applies its own side effects
// (session teardown, hello resync, pseudowire reinitialization, and so on).
#[derive(Debug, Default)]
pub struct ConfigChanges {
    pub keepalive_changed: bool,
    pub trans_addr_changed: bool,
    pub egress_label_changed: bool,
    pub th_accept_disabled: bool,
    pub new_ifaces: Vec<String>,
    pub deleted_ifaces: Vec<String>,
    pub updated_ifaces: Vec<String>,
    pub new_tnbrs: Vec<Ipv4Addr>,
    pub deleted_tnbrs: Vec<Ipv4Addr>,
    pub updated_tnbrs: Vec<Ipv4Addr>,
    pub new_nbrps: Vec<Ipv4Addr>,
    pub deleted_nbrps: Vec<Ipv4Addr>,
    pub updated_nbrps: Vec<Ipv4Addr>,
    pub new_l2vpns: Vec<String>,
    pub deleted_l2vpns: Vec<String>,
    pub new_pws: Vec<(String, String)>,
    pub deleted_pws: Vec<(String, String)>,
    pub reset_pws: Vec<(String, String)>,
}

// ===== impl Config =====

impl Config {
    // Creates a minimal configuration tree with default parameters.
    pub fn new(router_id: Ipv4Addr) -> Config {
        Config {
            router_id,
            transport_address: None,
            keepalive: DEFAULT_KEEPALIVE,
            targeted_hello_holdtime: TARGETED_DFLT_HOLDTIME,
            targeted_hello_interval: DEFAULT_HELLO_INTERVAL,
            explicit_null: false,
            targeted_hello_accept: false,
            no_fib_update: false,
            interfaces: Vec::new(),
            tnbrs: Vec::new(),
            neighbors: Vec::new(),
            l2vpns: Vec::new(),
        }
    }

    // Effective transport address.
    pub fn trans_addr(&self) -> Ipv4Addr {
        self.transport_address.unwrap_or(self.router_id)
    }

    pub fn iface(&self, name: &str) -> Option<&IfaceCfg> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }

    pub fn tnbr(&self, addr: &Ipv4Addr) -> Option<&TnbrCfg> {
        self.tnbrs.iter().find(|tnbr| tnbr.address == *addr)
    }

    pub fn nbr_params(&self, lsr_id: &Ipv4Addr) -> Option<&NbrParams> {
        self.neighbors.iter().find(|nbrp| nbrp.lsr_id == *lsr_id)
    }

    pub fn nbr_password(&self, lsr_id: &Ipv4Addr) -> Option<&str> {
        self.nbr_params(lsr_id)
            .and_then(|nbrp| nbrp.password.as_deref())
    }

    pub fn l2vpn(&self, name: &str) -> Option<&L2vpnCfg> {
        self.l2vpns.iter().find(|l2vpn| l2vpn.name == name)
    }

    // Sanity-checks the parsed configuration tree.
    pub fn validate(&self) -> Result<(), String> {
        if self.router_id.is_unspecified() {
            return Err("invalid router-id".to_owned());
        }
        if self.keepalive < MIN_KEEPALIVE {
            return Err(format!(
                "keepalive must be at least {} seconds",
                MIN_KEEPALIVE
            ));
        }
        for iface in &self.interfaces {
            if iface.hello_interval < MIN_HELLO_INTERVAL {
                return Err(format!(
                    "interface {}: hello-interval too small",
                    iface.name
                ));
            }
            if iface.hello_holdtime != INFINITE_HOLDTIME
                && iface.hello_holdtime < MIN_HOLDTIME
            {
                return Err(format!(
                    "interface {}: hello-holdtime too small",
                    iface.name
                ));
            }
        }
        for tnbr in &self.tnbrs {
            if tnbr.hello_interval < MIN_HELLO_INTERVAL {
                return Err(format!(
                    "targeted neighbor {}: hello-interval too small",
                    tnbr.address
                ));
            }
        }
        for l2vpn in &self.l2vpns {
            for pw in &l2vpn.pseudowires {
                if pw.pwid == 0 {
                    return Err(format!(
                        "l2vpn {}: pseudowire {} has no pwid",
                        l2vpn.name, pw.name
                    ));
                }
            }
        }
        Ok(())
    }

    // Splits the tree into the reload stream.
    pub fn reconf_messages(&self) -> Vec<ReconfMsg> {
        let mut global = self.clone();
        global.interfaces = Vec::new();
        global.tnbrs = Vec::new();
        global.neighbors = Vec::new();
        global.l2vpns = Vec::new();

        let mut msgs = vec![ReconfMsg::Conf(Box::new(global))];
        for iface in &self.interfaces {
            msgs.push(ReconfMsg::Iface(iface.clone()));
        }
        for tnbr in &self.tnbrs {
            msgs.push(ReconfMsg::Tnbr(tnbr.clone()));
        }
        for nbrp in &self.neighbors {
            msgs.push(ReconfMsg::Nbrp(nbrp.clone()));
        }
        for l2vpn in &self.l2vpns {
            let mut hdr = l2vpn.clone();
            hdr.interfaces = Vec::new();
            hdr.pseudowires = Vec::new();
            msgs.push(ReconfMsg::L2vpn(hdr));
            for lif in &l2vpn.interfaces {
                msgs.push(ReconfMsg::L2vpnIf {
                    l2vpn: l2vpn.name.clone(),
                    cfg: lif.clone(),
                });
            }
            for pw in &l2vpn.pseudowires {
                msgs.push(ReconfMsg::L2vpnPw {
                    l2vpn: l2vpn.name.clone(),
                    cfg: pw.clone(),
                });
            }
        }
        msgs.push(ReconfMsg::End);
        msgs
    }

    // Accumulates one reload-stream message into the pending tree; returns
    // the completed tree when the end marker arrives.
    pub fn reconf_accumulate(
        pending: &mut Option<Config>,
        msg: ReconfMsg,
    ) -> Option<Config> {
        match msg {
            ReconfMsg::Conf(conf) => {
                *pending = Some(*conf);
            }
            ReconfMsg::Iface(iface) => {
                if let Some(pending) = pending {
                    pending.interfaces.push(iface);
                }
            }
            ReconfMsg::Tnbr(tnbr) => {
                if let Some(pending) = pending {
                    pending.tnbrs.push(tnbr);
                }
            }
            ReconfMsg::Nbrp(nbrp) => {
                if let Some(pending) = pending {
                    pending.neighbors.push(nbrp);
                }
            }
            ReconfMsg::L2vpn(l2vpn) => {
                if let Some(pending) = pending {
                    pending.l2vpns.push(l2vpn);
                }
            }
            ReconfMsg::L2vpnIf { l2vpn, cfg } => {
                if let Some(pending) = pending {
                    if let Some(l2vpn) = pending
                        .l2vpns
                        .iter_mut()
                        .find(|entry| entry.name == l2vpn)
                    {
                        l2vpn.interfaces.push(cfg);
                    }
                }
            }
            ReconfMsg::L2vpnPw { l2vpn, cfg } => {
                if let Some(pending) = pending {
                    if let Some(l2vpn) = pending
                        .l2vpns
                        .iter_mut()
                        .find(|entry| entry.name == l2vpn)
                    {
                        l2vpn.pseudowires.push(cfg);
                    }
                }
            }
            ReconfMsg::End => {
                return pending.take();
            }
        }
        None
    }

    // Performs the in-place three-way merge: entities present only in the old
    // tree are deleted, entities present only in the new tree are inserted,
    // entities present in both are updated. A change of router-id requires a
    // full restart and is not merged.
    pub fn merge(&mut self, new: Config) -> ConfigChanges {
        let mut changes = ConfigChanges::default();

        // Global parameters.
        if self.keepalive != new.keepalive {
            self.keepalive = new.keepalive;
            changes.keepalive_changed = true;
        }
        if self.trans_addr() != new.trans_addr() {
            changes.trans_addr_changed = true;
        }
        self.transport_address = new.transport_address;
        self.targeted_hello_holdtime = new.targeted_hello_holdtime;
        self.targeted_hello_interval = new.targeted_hello_interval;
        if self.explicit_null != new.explicit_null {
            self.explicit_null = new.explicit_null;
            changes.egress_label_changed = true;
        }
        if self.targeted_hello_accept && !new.targeted_hello_accept {
            changes.th_accept_disabled = true;
        }
        self.targeted_hello_accept = new.targeted_hello_accept;
        self.no_fib_update = new.no_fib_update;

        // Interfaces.
        for iface in &self.interfaces {
            if new.iface(&iface.name).is_none() {
                changes.deleted_ifaces.push(iface.name.clone());
            }
        }
        for new_iface in &new.interfaces {
            match self.iface(&new_iface.name) {
                None => changes.new_ifaces.push(new_iface.name.clone()),
                Some(iface) if iface != new_iface => {
                    changes.updated_ifaces.push(new_iface.name.clone());
                }
                Some(_) => (),
            }
        }

        // Targeted neighbors.
        for tnbr in &self.tnbrs {
            if new.tnbr(&tnbr.address).is_none() {
                changes.deleted_tnbrs.push(tnbr.address);
            }
        }
        for new_tnbr in &new.tnbrs {
            match self.tnbr(&new_tnbr.address) {
                None => changes.new_tnbrs.push(new_tnbr.address),
                Some(tnbr) if tnbr != new_tnbr => {
                    changes.updated_tnbrs.push(new_tnbr.address);
                }
                Some(_) => (),
            }
        }

        // Neighbor parameters.
        for nbrp in &self.neighbors {
            if new.nbr_params(&nbrp.lsr_id).is_none() {
                changes.deleted_nbrps.push(nbrp.lsr_id);
            }
        }
        for new_nbrp in &new.neighbors {
            match self.nbr_params(&new_nbrp.lsr_id) {
                None => changes.new_nbrps.push(new_nbrp.lsr_id),
                Some(nbrp) if nbrp != new_nbrp => {
                    changes.updated_nbrps.push(new_nbrp.lsr_id);
                }
                Some(_) => (),
            }
        }

        // L2VPNs.
        for l2vpn in &self.l2vpns {
            if new.l2vpn(&l2vpn.name).is_none() {
                changes.deleted_l2vpns.push(l2vpn.name.clone());
                for pw in &l2vpn.pseudowires {
                    changes
                        .deleted_pws
                        .push((l2vpn.name.clone(), pw.name.clone()));
                }
            }
        }
        for new_l2vpn in &new.l2vpns {
            match self.l2vpn(&new_l2vpn.name) {
                None => {
                    changes.new_l2vpns.push(new_l2vpn.name.clone());
                    for pw in &new_l2vpn.pseudowires {
                        changes
                            .new_pws
                            .push((new_l2vpn.name.clone(), pw.name.clone()));
                    }
                }
                Some(l2vpn) => {
                    Config::merge_l2vpn(&mut changes, l2vpn, new_l2vpn);
                }
            }
        }

        self.interfaces = new.interfaces;
        self.tnbrs = new.tnbrs;
        self.neighbors = new.neighbors;
        self.l2vpns = new.l2vpns;

        changes
    }

    fn merge_l2vpn(
        changes: &mut ConfigChanges,
        old: &L2vpnCfg,
        new: &L2vpnCfg,
    ) {
        // A change of encapsulation parameters forces every pseudowire of
        // this l2vpn to be torn down and renegotiated.
        let reset_all = old.pw_type != new.pw_type || old.mtu != new.mtu;

        for pw in &old.pseudowires {
            if !new.pseudowires.iter().any(|new_pw| new_pw.name == pw.name) {
                changes
                    .deleted_pws
                    .push((old.name.clone(), pw.name.clone()));
            }
        }
        for new_pw in &new.pseudowires {
            match old.pseudowires.iter().find(|pw| pw.name == new_pw.name) {
                None => {
                    changes.new_pws.push((new.name.clone(), new_pw.name.clone()))
                }
                Some(pw) if reset_all || pw != new_pw => {
                    changes
                        .reset_pws
                        .push((new.name.clone(), new_pw.name.clone()));
                }
                Some(_) => (),
            }
        }
    }
}

// ===== helper functions =====

fn dflt_keepalive() -> u16 {
    DEFAULT_KEEPALIVE
}

fn dflt_link_holdtime() -> u16 {
    DEFAULT_HOLDTIME
}

fn dflt_hello_interval() -> u16 {
    DEFAULT_HELLO_INTERVAL
}

fn dflt_thello_holdtime() -> u16 {
    TARGETED_DFLT_HOLDTIME
}

fn dflt_thello_interval() -> u16 {
    DEFAULT_HELLO_INTERVAL
}

fn dflt_pw_type() -> PwType {
    PwType::Ethernet
}

fn dflt_l2vpn_mtu() -> u16 {
    DEFAULT_L2VPN_MTU
}

fn dflt_true() -> bool {
    true
}
