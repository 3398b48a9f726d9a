//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use ldpd_packet::error::DecodeError;
use ldpd_packet::{DecodeCxt, PacketInfo, Pdu};
use ldpd_utils::Sender;
use ldpd_utils::capabilities;
use ldpd_utils::ip::IpAddrExt;
use ldpd_utils::socket::{SocketExt, UdpSocket, UdpSocketExt};
use tokio::sync::mpsc::error::SendError;

use crate::error::{Error, IoError};
use crate::interface::Interface;
use crate::network;
use crate::tasks::messages::input::UdpRxPduMsg;

// All-routers multicast group.
pub const LDP_MCAST_ADDR_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

// ===== global functions =====

pub(crate) fn discovery_socket(
    addr: Ipv4Addr,
) -> Result<UdpSocket, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        // Create and bind socket.
        let sockaddr =
            SocketAddr::V4(SocketAddrV4::new(addr, network::LDP_PORT));
        let socket =
            capabilities::raise(|| UdpSocket::bind_reuseaddr(sockaddr))?;

        // Set socket options.
        socket.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL)?;

        Ok(socket)
    }
    #[cfg(feature = "testing")]
    {
        Ok(UdpSocket::default())
    }
}

pub(crate) fn interface_discovery_socket(
    iface: &Interface,
) -> Result<UdpSocket, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        use ldpd_utils::ip::AddressFamily;

        // Create and bind socket.
        let socket = UdpSocket::new(AddressFamily::Ipv4)?;
        capabilities::raise(|| SocketExt::bind_device(&socket, &iface.name))?;

        // Set socket options.
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL)?;
        if let Some(ifindex) = iface.system.ifindex {
            socket.set_multicast_ifindex_v4(ifindex)?;
        }

        Ok(socket)
    }
    #[cfg(feature = "testing")]
    {
        Ok(UdpSocket::default())
    }
}

pub(crate) async fn send_packet_multicast(
    socket: &UdpSocket,
    pdu: Pdu,
) -> Result<(), std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        // Encode hello message.
        let buf = pdu.encode(Pdu::DFLT_MAX_LEN);

        // Send packet.
        let sockaddr = SocketAddr::V4(SocketAddrV4::new(
            LDP_MCAST_ADDR_V4,
            network::LDP_PORT,
        ));
        socket.send_to(&buf, sockaddr).await?;
    }

    Ok(())
}

pub(crate) async fn send_packet_unicast(
    socket: &UdpSocket,
    pdu: Pdu,
    addr: &Ipv4Addr,
) -> Result<(), std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        // Encode hello message.
        let buf = pdu.encode(Pdu::DFLT_MAX_LEN);

        // Send packet.
        let sockaddr =
            SocketAddr::V4(SocketAddrV4::new(*addr, network::LDP_PORT));
        socket.send_to(&buf, sockaddr).await?;
    }

    Ok(())
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn read_loop(
    socket: Arc<UdpSocket>,
    multicast: bool,
    udp_pdu_rxp: Sender<UdpRxPduMsg>,
) -> Result<(), SendError<UdpRxPduMsg>> {
    let mut buf = [0; 4096];

    // PDU header validation closure.
    let validate_pdu_hdr = |_lsr_id, label_space| {
        if label_space != 0 {
            return Err(DecodeError::InvalidLabelSpace(label_space));
        }
        Ok(())
    };

    // Decode context.
    let mut cxt = DecodeCxt {
        pkt_info: PacketInfo {
            // The source address will be overwritten later.
            src_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            multicast: Some(multicast),
        },
        pdu_max_len: Pdu::DFLT_MAX_LEN,
        validate_pdu_hdr: Some(Box::new(validate_pdu_hdr)),
    };

    loop {
        // Receive data from the network.
        let src = match socket.recv_from(&mut buf).await {
            Ok((_, src)) => src,
            Err(error) => {
                IoError::UdpRecvError(error).log();
                continue;
            }
        };

        // Validate packet source address.
        let src_addr = src.ip();
        if !src_addr.is_usable() {
            Error::UdpInvalidSourceAddr(src_addr).log();
            continue;
        }

        // Decode packet.
        cxt.pkt_info.src_addr = src_addr;
        let pdu = Pdu::get_pdu_size(&buf, &cxt)
            .and_then(|pdu_size| Pdu::decode(&buf[0..pdu_size], &cxt));
        let msg = UdpRxPduMsg {
            src_addr,
            multicast,
            pdu,
        };
        udp_pdu_rxp.send(msg).await?;
    }
}
