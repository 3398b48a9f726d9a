//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ldpd_utils::ibus::{Kaddr, KifUpdate, Kroute};
use tokio::sync::mpsc::UnboundedReceiver;

// Kernel events reported by the routing-socket driver.
#[derive(Clone, Debug)]
pub enum KernelEvent {
    Link(KifUpdate),
    AddrAdd(Kaddr),
    AddrDel(Kaddr),
    RouteAdd(Kroute),
    RouteDel(Kroute),
}

pub type KernelEventReceiver = UnboundedReceiver<KernelEvent>;

#[cfg(not(feature = "testing"))]
pub use real::Fib;
#[cfg(feature = "testing")]
pub use stub::{Fib, FibOp};

// ===== real driver (rtnetlink) =====

#[cfg(not(feature = "testing"))]
mod real {
    use std::net::Ipv4Addr;
    use std::ops::BitOr;

    use capctl::caps::CapState;
    use futures::TryStreamExt;
    use netlink_sys::AsyncSocket;
    use futures::channel::mpsc::UnboundedReceiver as NlReceiver;
    use ipnetwork::Ipv4Network;
    use ldpd_utils::ibus::{
        Kaddr, KifUpdate, Kpw, Kroute, KrouteFlags,
    };
    use ldpd_utils::mpls::Label;
    use netlink_packet_core::{
        NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST, NetlinkMessage,
        NetlinkPayload,
    };
    use netlink_packet_route::constants::{
        AF_INET, ARPHRD_LOOPBACK, IFF_RUNNING, RTNLGRP_IPV4_IFADDR,
        RTNLGRP_IPV4_ROUTE, RTNLGRP_LINK, RTN_UNICAST, RT_TABLE_MAIN,
    };
    use netlink_packet_route::rtnl::RtnlMessage;
    use netlink_packet_route::{
        AddressMessage, LinkMessage, RouteHeader, RouteMessage,
    };
    use netlink_packet_utils::nla::DefaultNla;
    use netlink_sys::SocketAddr;
    use rtnetlink::{Handle, new_connection};
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedSender;
    use tracing::{error, trace};

    use super::{KernelEvent, KernelEventReceiver};
    use crate::kroute;

    // Address family of MPLS routes, as defined by the kernel headers.
    const AF_MPLS: u8 = 28;

    // Route protocol values of interest (rtnetlink.h).
    const RTPROT_KERNEL: u8 = 2;
    const RTPROT_BOOT: u8 = 3;
    const RTPROT_STATIC: u8 = 4;
    const RTPROT_BGP: u8 = 186;
    const RTPROT_OSPF: u8 = 188;
    const RTPROT_RIP: u8 = 189;
    const RTPROT_LDP: u8 = 193;

    // Route attribute types used for MPLS label imposition.
    const RTA_ENCAP_TYPE: u16 = 21;
    const RTA_ENCAP: u16 = 22;
    const LWTUNNEL_ENCAP_MPLS: u16 = 1;
    const MPLS_IPTUNNEL_DST: u16 = 1;

    // The kernel FIB driver, programming routes and MPLS cross-connects
    // through rtnetlink.
    #[derive(Clone, Debug)]
    pub struct Fib {
        handle: Handle,
    }

    impl Fib {
        // Opens the netlink sockets, spawns the monitor and replays the
        // current kernel state as events.
        pub async fn init()
        -> Result<(Fib, KernelEventReceiver), std::io::Error> {
            // Create the request socket.
            let (conn, handle, _) = new_connection()?;

            // Serve requests on a separate thread with permanent elevated
            // capabilities.
            std::thread::spawn(|| {
                let mut caps = CapState::get_current().unwrap();
                caps.effective = caps.permitted;
                if let Err(error) = caps.set_current() {
                    error!(%error, "failed to update current capabilities");
                }
                futures::executor::block_on(conn)
            });

            // Start the netlink monitor.
            let (mut conn, _, monitor) = new_connection()?;
            let groups =
                [RTNLGRP_LINK, RTNLGRP_IPV4_IFADDR, RTNLGRP_IPV4_ROUTE]
                    .iter()
                    .map(|group| 1 << (group - 1))
                    .fold(0, BitOr::bitor);
            let addr = SocketAddr::new(0, groups);
            conn.socket_mut().socket_mut().bind(&addr)?;
            tokio::spawn(conn);

            let (event_tx, event_rx) = mpsc::unbounded_channel();
            tokio::spawn(monitor_loop(monitor, event_tx.clone()));

            let fib = Fib { handle };
            fib.replay(&event_tx).await;

            Ok((fib, event_rx))
        }

        // Replays the current interface, address and route state.
        async fn replay(&self, event_tx: &UnboundedSender<KernelEvent>) {
            let mut links = self.handle.link().get().execute();
            while let Ok(Some(msg)) = links.try_next().await {
                if let Some(kif) = parse_link(msg) {
                    let _ = event_tx.send(KernelEvent::Link(kif));
                }
            }

            let mut addresses = self.handle.address().get().execute();
            while let Ok(Some(msg)) = addresses.try_next().await {
                if let Some(kaddr) = parse_addr(msg) {
                    let _ = event_tx.send(KernelEvent::AddrAdd(kaddr));
                }
            }

            let mut routes = self
                .handle
                .route()
                .get(rtnetlink::IpVersion::V4)
                .execute();
            while let Ok(Some(msg)) = routes.try_next().await {
                if let Some(kr) = parse_route(msg) {
                    let _ = event_tx.send(KernelEvent::RouteAdd(kr));
                }
            }
        }

        // Installs an MPLS cross-connect: incoming label to (nexthop,
        // outgoing label). No outgoing label means pop.
        pub async fn mpls_route_add(
            &self,
            local_label: Label,
            remote_label: Option<Label>,
            nexthop: Ipv4Addr,
            ifindex: u32,
        ) {
            use netlink_packet_route::route::nlas::Nla;

            let mut msg = RouteMessage::default();
            msg.header = mpls_route_header();
            msg.nlas.push(Nla::Destination(mpls_label_bytes(local_label)));
            if let Some(remote_label) = remote_label {
                if !remote_label.is_implicit_null() {
                    msg.nlas.push(Nla::NewDestination(mpls_label_bytes(
                        remote_label,
                    )));
                }
            }
            msg.nlas.push(Nla::Via(rtvia_inet_bytes(nexthop)));
            if ifindex != 0 {
                msg.nlas.push(Nla::Oif(ifindex));
            }

            // Try to update the existing route first; retry as an addition
            // when the kernel doesn't know it yet.
            let change = self
                .route_request(
                    RtnlMessage::NewRoute(msg.clone()),
                    NLM_F_REQUEST | NLM_F_ACK | NLM_F_REPLACE,
                )
                .await;
            if change.is_err() {
                if let Err(error) = self
                    .route_request(
                        RtnlMessage::NewRoute(msg),
                        NLM_F_REQUEST
                            | NLM_F_ACK
                            | NLM_F_CREATE
                            | NLM_F_REPLACE,
                    )
                    .await
                {
                    error!(%local_label, %error, "failed to install MPLS route");
                }
            }
        }

        // Removes an MPLS cross-connect. A missing route is not an error.
        pub async fn mpls_route_del(&self, local_label: Label) {
            use netlink_packet_route::route::nlas::Nla;

            let mut msg = RouteMessage::default();
            msg.header = mpls_route_header();
            msg.nlas.push(Nla::Destination(mpls_label_bytes(local_label)));

            if let Err(error) = self
                .route_request(
                    RtnlMessage::DelRoute(msg),
                    NLM_F_REQUEST | NLM_F_ACK,
                )
                .await
            {
                trace!(%local_label, %error, "MPLS route removal failed");
            }
        }

        // (Re)installs the IPv4 route for the prefix, optionally imposing
        // an MPLS label on it.
        pub async fn ip_route_set(
            &self,
            prefix: Ipv4Network,
            nexthop: Ipv4Addr,
            ifindex: u32,
            encap: Option<Label>,
        ) {
            use netlink_packet_route::route::nlas::Nla;

            let mut request = self
                .handle
                .route()
                .add()
                .protocol(RTPROT_LDP)
                .v4()
                .replace()
                .destination_prefix(prefix.ip(), prefix.prefix())
                .gateway(nexthop);
            if ifindex != 0 {
                request = request.output_interface(ifindex);
            }

            // Attach the MPLS lwtunnel encapsulation, unless the peer
            // advertised implicit-null.
            if let Some(label) = encap {
                if !label.is_implicit_null() {
                    let message = request.message_mut();
                    message.nlas.push(Nla::Other(DefaultNla::new(
                        RTA_ENCAP_TYPE,
                        LWTUNNEL_ENCAP_MPLS.to_ne_bytes().to_vec(),
                    )));
                    message.nlas.push(Nla::Other(DefaultNla::new(
                        RTA_ENCAP,
                        mpls_encap_bytes(label),
                    )));
                }
            }

            if let Err(error) = request.execute().await {
                error!(%prefix, %error, "failed to install route");
            }
        }

        // Programs the pseudowire label cross-connect. The attachment
        // circuit binding is platform-specific and out of the core's hands.
        pub async fn kmpw_set(&self, kpw: &Kpw) {
            if let (Some(local_label), Some(remote_label)) =
                (kpw.local_label, kpw.remote_label)
            {
                self.mpls_route_add(
                    local_label,
                    Some(remote_label),
                    kpw.nexthop,
                    0,
                )
                .await;
            }
        }

        pub async fn kmpw_unset(&self, kpw: &Kpw) {
            if let Some(local_label) = kpw.local_label {
                self.mpls_route_del(local_label).await;
            }
        }

        async fn route_request(
            &self,
            msg: RtnlMessage,
            flags: u16,
        ) -> Result<(), rtnetlink::Error> {
            let mut req = NetlinkMessage::from(msg);
            req.header.flags = flags;
            req.finalize();

            let mut handle = self.handle.clone();
            let mut response = handle.request(req)?;
            while let Some(msg) = futures::StreamExt::next(&mut response).await
            {
                if let NetlinkPayload::Error(err) = msg.payload {
                    return Err(rtnetlink::Error::NetlinkError(err));
                }
            }
            Ok(())
        }
    }

    // ===== monitor =====

    async fn monitor_loop(
        mut monitor: NlReceiver<(NetlinkMessage<RtnlMessage>, SocketAddr)>,
        event_tx: UnboundedSender<KernelEvent>,
    ) {
        use futures::StreamExt;

        while let Some((msg, _)) = monitor.next().await {
            let NetlinkPayload::InnerMessage(msg) = msg.payload else {
                continue;
            };
            let event = match msg {
                RtnlMessage::NewLink(msg) => {
                    parse_link(msg).map(KernelEvent::Link)
                }
                RtnlMessage::DelLink(msg) => parse_link(msg).map(|mut kif| {
                    kif.operative = false;
                    KernelEvent::Link(kif)
                }),
                RtnlMessage::NewAddress(msg) => {
                    parse_addr(msg).map(KernelEvent::AddrAdd)
                }
                RtnlMessage::DelAddress(msg) => {
                    parse_addr(msg).map(KernelEvent::AddrDel)
                }
                RtnlMessage::NewRoute(msg) => {
                    parse_route(msg).map(KernelEvent::RouteAdd)
                }
                RtnlMessage::DelRoute(msg) => {
                    parse_route(msg).map(KernelEvent::RouteDel)
                }
                _ => None,
            };
            if let Some(event) = event {
                if event_tx.send(event).is_err() {
                    return;
                }
            }
        }
    }

    fn parse_link(msg: LinkMessage) -> Option<KifUpdate> {
        use netlink_packet_route::link::nlas::Nla;

        let ifindex = msg.header.index;
        let loopback = msg.header.link_layer_type == ARPHRD_LOOPBACK;
        let operative = msg.header.flags & IFF_RUNNING != 0;

        let mut ifname = None;
        let mut mtu = 0;
        for nla in msg.nlas.into_iter() {
            match nla {
                Nla::IfName(nla_ifname) => ifname = Some(nla_ifname),
                Nla::Mtu(nla_mtu) => mtu = nla_mtu,
                _ => (),
            }
        }

        Some(KifUpdate {
            ifname: ifname?,
            ifindex,
            operative,
            loopback,
            mtu,
        })
    }

    fn parse_addr(msg: AddressMessage) -> Option<Kaddr> {
        use netlink_packet_route::address::nlas::Nla;

        if msg.header.family as u16 != AF_INET {
            return None;
        }

        let ifindex = msg.header.index;
        let prefix_len = msg.header.prefix_len;
        let mut addr = None;
        for nla in msg.nlas.into_iter() {
            if let Nla::Address(bytes) = nla {
                let octets: [u8; 4] = bytes.try_into().ok()?;
                addr = Some(Ipv4Addr::from(octets));
            }
        }

        let addr = Ipv4Network::new(addr?, prefix_len).ok()?;
        Some(Kaddr { ifindex, addr })
    }

    fn parse_route(msg: RouteMessage) -> Option<Kroute> {
        use netlink_packet_route::route::nlas::Nla;

        if msg.header.address_family as u16 != AF_INET
            || msg.header.table != RT_TABLE_MAIN
            || msg.header.kind != RTN_UNICAST
        {
            return None;
        }

        let plen = msg.header.destination_prefix_length;
        let priority = netlink_priority(msg.header.protocol);

        let mut dst = Ipv4Addr::UNSPECIFIED;
        let mut gateway = None;
        let mut ifindex = 0;
        for nla in msg.nlas.into_iter() {
            match nla {
                Nla::Destination(bytes) => {
                    let octets: [u8; 4] = bytes.try_into().ok()?;
                    dst = Ipv4Addr::from(octets);
                }
                Nla::Gateway(bytes) => {
                    let octets: [u8; 4] = bytes.try_into().ok()?;
                    gateway = Some(Ipv4Addr::from(octets));
                }
                Nla::Oif(oif) => ifindex = oif,
                _ => (),
            }
        }

        let prefix = Ipv4Network::new(dst, plen).ok()?;
        let mut flags = KrouteFlags::empty();
        if gateway.is_none() {
            flags.insert(KrouteFlags::CONNECTED);
        }

        Some(Kroute {
            prefix,
            nexthop: gateway.unwrap_or(Ipv4Addr::UNSPECIFIED),
            local_label: None,
            remote_label: None,
            ifindex,
            priority,
            flags,
        })
    }

    // Maps the netlink route protocol onto the mirror's priority space.
    fn netlink_priority(protocol: u8) -> u8 {
        match protocol {
            RTPROT_KERNEL => kroute::RTP_CONNECTED,
            RTPROT_BOOT | RTPROT_STATIC => kroute::RTP_STATIC,
            RTPROT_OSPF => kroute::RTP_OSPF,
            RTPROT_RIP => kroute::RTP_RIP,
            RTPROT_BGP => kroute::RTP_BGP,
            _ => kroute::RTP_DEFAULT,
        }
    }

    fn mpls_route_header() -> RouteHeader {
        let mut header = RouteHeader::default();
        header.address_family = AF_MPLS;
        header.destination_prefix_length = 20;
        header.table = RT_TABLE_MAIN;
        header.protocol = RTPROT_LDP;
        header.kind = RTN_UNICAST;
        header
    }

    // One MPLS label stack entry with the bottom-of-stack bit set.
    fn mpls_label_bytes(label: Label) -> Vec<u8> {
        let value = (label.get() << 12) | (1 << 8);
        value.to_be_bytes().to_vec()
    }

    // RTA_VIA payload: address family followed by the gateway address.
    fn rtvia_inet_bytes(nexthop: Ipv4Addr) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(6);
        bytes.extend_from_slice(&AF_INET.to_ne_bytes());
        bytes.extend_from_slice(&nexthop.octets());
        bytes
    }

    // Nested RTA_ENCAP payload carrying a single MPLS_IPTUNNEL_DST label.
    fn mpls_encap_bytes(label: Label) -> Vec<u8> {
        let value = mpls_label_bytes(label);
        let len = (4 + value.len()) as u16;
        let mut bytes = Vec::with_capacity(len as usize);
        bytes.extend_from_slice(&len.to_ne_bytes());
        bytes.extend_from_slice(&MPLS_IPTUNNEL_DST.to_ne_bytes());
        bytes.extend_from_slice(&value);
        bytes
    }
}

// ===== testing stub =====

#[cfg(feature = "testing")]
mod stub {
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use ipnetwork::Ipv4Network;
    use ldpd_utils::ibus::Kpw;
    use ldpd_utils::mpls::Label;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedSender;

    use super::{KernelEvent, KernelEventReceiver};

    // Recorded FIB operations, for assertions in unit tests.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum FibOp {
        MplsRouteAdd {
            local_label: Label,
            remote_label: Option<Label>,
            nexthop: Ipv4Addr,
        },
        MplsRouteDel {
            local_label: Label,
        },
        IpRouteSet {
            prefix: Ipv4Network,
            nexthop: Ipv4Addr,
            encap: Option<Label>,
        },
        KmpwSet(Kpw),
        KmpwUnset(Kpw),
    }

    #[derive(Debug, Default)]
    pub struct Fib {
        pub ops: Mutex<Vec<FibOp>>,
    }

    impl Fib {
        pub async fn init()
        -> Result<(Fib, KernelEventReceiver), std::io::Error> {
            let (fib, event_tx, event_rx) = Fib::init_test();
            std::mem::forget(event_tx);
            Ok((fib, event_rx))
        }

        pub fn init_test()
        -> (Fib, UnboundedSender<KernelEvent>, KernelEventReceiver) {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            (Fib::default(), event_tx, event_rx)
        }

        pub fn take_ops(&self) -> Vec<FibOp> {
            std::mem::take(&mut *self.ops.lock().unwrap())
        }

        pub async fn mpls_route_add(
            &self,
            local_label: Label,
            remote_label: Option<Label>,
            nexthop: Ipv4Addr,
            _ifindex: u32,
        ) {
            self.ops.lock().unwrap().push(FibOp::MplsRouteAdd {
                local_label,
                remote_label,
                nexthop,
            });
        }

        pub async fn mpls_route_del(&self, local_label: Label) {
            self.ops
                .lock()
                .unwrap()
                .push(FibOp::MplsRouteDel { local_label });
        }

        pub async fn ip_route_set(
            &self,
            prefix: Ipv4Network,
            nexthop: Ipv4Addr,
            _ifindex: u32,
            encap: Option<Label>,
        ) {
            self.ops.lock().unwrap().push(FibOp::IpRouteSet {
                prefix,
                nexthop,
                encap,
            });
        }

        pub async fn kmpw_set(&self, kpw: &Kpw) {
            self.ops.lock().unwrap().push(FibOp::KmpwSet(*kpw));
        }

        pub async fn kmpw_unset(&self, kpw: &Kpw) {
            self.ops.lock().unwrap().push(FibOp::KmpwUnset(*kpw));
        }
    }
}
