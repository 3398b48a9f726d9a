//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

use libc::ip_mreqn;
use serde::{Deserialize, Serialize};
// Normal build: re-export standard socket types.
#[cfg(not(feature = "testing"))]
pub use {
    socket2::Socket,
    tokio::net::{
        TcpListener, TcpSocket, TcpStream, UdpSocket, tcp::OwnedReadHalf,
        tcp::OwnedWriteHalf,
    },
};

// Test build: export mock sockets.
#[cfg(feature = "testing")]
pub use crate::socket::mock::{
    OwnedReadHalf, OwnedWriteHalf, Socket, TcpListener, TcpSocket, TcpStream,
    UdpSocket,
};
use crate::ip::AddressFamily;

// Maximum TTL.
pub const TTL_MAX: u8 = 255;

// Useful type definition.
type Result<T> = std::io::Result<T>;

// TCP connection information.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// FFI struct used to set the TCP_MD5SIG socket option.
#[repr(C)]
struct TcpMd5Sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    tcpm_pad: u32,
    tcpm_key: [u8; 108],
}

// Reference-counted multicast group membership table.
//
// The discovery socket is shared by all interfaces, so each (ifindex, group)
// pair must be joined exactly once no matter how many times the interface
// flaps or the configuration is reloaded.
#[derive(Debug, Default)]
pub struct McastMemberships {
    counts: HashMap<(u32, Ipv4Addr), usize>,
}

// Extension methods for all socket types.
pub trait SocketExt: Sized + AsRawFd {
    // Sets the value of the IP_TOS option for this socket.
    fn set_ipv4_tos(&self, tos: u8) -> Result<()> {
        let optval = tos as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TOS,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TTL,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_MINTTL option for this socket.
    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MINTTL,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_MULTICAST_IF option for this socket.
    fn set_multicast_ifindex_v4(&self, ifindex: u32) -> Result<()> {
        let optval = ip_mreqn {
            imr_multiaddr: libc::in_addr { s_addr: 0 },
            imr_address: libc::in_addr { s_addr: 0 },
            imr_ifindex: ifindex as i32,
        };

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<ip_mreqn>() as libc::socklen_t,
        )
    }

    // Binds this socket to a specific network device.
    fn bind_device(&self, ifname: &str) -> Result<()> {
        setsockopt(
            self,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            ifname.as_ptr() as *const c_void,
            ifname.len() as libc::socklen_t,
        )
    }

    // Executes an operation of the IP_ADD_MEMBERSHIP type.
    fn join_multicast_ifindex_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifindex: u32,
    ) -> Result<()> {
        let multiaddr: u32 = (*multiaddr).into();

        let optval = ip_mreqn {
            imr_multiaddr: libc::in_addr {
                s_addr: multiaddr.to_be(),
            },
            imr_address: libc::in_addr { s_addr: 0 },
            imr_ifindex: ifindex as c_int,
        };

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_ADD_MEMBERSHIP,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<ip_mreqn>() as libc::socklen_t,
        )
    }

    // Executes an operation of the IP_DROP_MEMBERSHIP type.
    fn leave_multicast_ifindex_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifindex: u32,
    ) -> Result<()> {
        let multiaddr: u32 = (*multiaddr).into();

        let optval = ip_mreqn {
            imr_multiaddr: libc::in_addr {
                s_addr: multiaddr.to_be(),
            },
            imr_address: libc::in_addr { s_addr: 0 },
            imr_ifindex: ifindex as c_int,
        };

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_DROP_MEMBERSHIP,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<ip_mreqn>() as libc::socklen_t,
        )
    }
}

// Extension methods for UdpSocket.
pub trait UdpSocketExt: SocketExt {
    // Creates a UDP socket not bound to any address.
    #[allow(clippy::new_ret_no_self)]
    fn new(af: AddressFamily) -> Result<UdpSocket>;

    // Creates a UDP socket from the given address.
    //
    // This is the same as `UdpSocket::bind`, except that the `SO_REUSEADDR`
    // option is set before binding.
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket>;
}

// Extension methods for TcpSocket, TcpListener and TcpStream.
pub trait TcpSocketExt: SocketExt {
    // Sets the value of the TCP_MD5SIG option for this socket.
    //
    // The key must be in place before the first SYN is sent or accepted,
    // which is why callers install it on the listening socket and on the
    // connecting socket prior to connect().
    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()> {
        let mut optval = TcpMd5Sig {
            tcpm_addr: unsafe { std::mem::zeroed() },
            tcpm_flags: 0,
            tcpm_prefixlen: 0,
            tcpm_keylen: 0,
            tcpm_pad: 0,
            tcpm_key: [0; 108],
        };
        let sockaddr: socket2::SockAddr = SocketAddr::from((*dst, 0)).into();
        unsafe {
            std::ptr::copy_nonoverlapping(
                sockaddr.as_ptr() as *const u8,
                &mut optval.tcpm_addr as *mut _ as *mut u8,
                sockaddr.len() as usize,
            );
        }
        if let Some(password) = password {
            optval.tcpm_keylen = password.len() as u16;
            optval.tcpm_key[..password.len()]
                .copy_from_slice(password.as_bytes());
        }

        setsockopt(
            self,
            libc::IPPROTO_TCP,
            libc::TCP_MD5SIG,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<TcpMd5Sig>() as libc::socklen_t,
        )
    }
}

// Extension methods for TcpStream.
pub trait TcpStreamExt: TcpSocketExt {
    // Returns address and port information about the TCP connection.
    fn conn_info(&self) -> Result<TcpConnInfo>;
}

// ===== impl McastMemberships =====

impl McastMemberships {
    // Joins the given multicast group on the given interface, unless it is
    // already a member.
    pub fn join(
        &mut self,
        socket: &UdpSocket,
        group: Ipv4Addr,
        ifindex: u32,
    ) -> Result<()> {
        let count = self.counts.entry((ifindex, group)).or_insert(0);
        *count += 1;
        if *count == 1 {
            #[cfg(not(feature = "testing"))]
            return socket.join_multicast_ifindex_v4(&group, ifindex);
        }
        Ok(())
    }

    // Releases one reference to the given membership, leaving the group when
    // the last reference is dropped.
    pub fn leave(
        &mut self,
        socket: &UdpSocket,
        group: Ipv4Addr,
        ifindex: u32,
    ) -> Result<()> {
        if let Some(count) = self.counts.get_mut(&(ifindex, group)) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&(ifindex, group));
                #[cfg(not(feature = "testing"))]
                return socket.leave_multicast_ifindex_v4(&group, ifindex);
            }
        }
        Ok(())
    }

    pub fn is_member(&self, group: Ipv4Addr, ifindex: u32) -> bool {
        self.counts.contains_key(&(ifindex, group))
    }
}

// ===== impl UdpSocket =====

#[cfg(not(feature = "testing"))]
impl SocketExt for UdpSocket {}

#[cfg(not(feature = "testing"))]
impl UdpSocketExt for UdpSocket {
    fn new(af: AddressFamily) -> Result<UdpSocket> {
        use socket2::{Domain, Type};

        let domain = match af {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        UdpSocket::from_std(socket.into())
    }

    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket> {
        use socket2::{Domain, Type};

        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        UdpSocket::from_std(socket.into())
    }
}

// ===== impl TcpSocket =====

#[cfg(not(feature = "testing"))]
impl SocketExt for TcpSocket {}

#[cfg(not(feature = "testing"))]
impl TcpSocketExt for TcpSocket {}

// ===== impl TcpStream =====

#[cfg(not(feature = "testing"))]
impl SocketExt for TcpStream {}

#[cfg(not(feature = "testing"))]
impl TcpSocketExt for TcpStream {}

#[cfg(not(feature = "testing"))]
impl TcpStreamExt for TcpStream {
    fn conn_info(&self) -> Result<TcpConnInfo> {
        let local_addr = self.local_addr()?;
        let remote_addr = self.peer_addr()?;

        Ok(TcpConnInfo {
            local_addr: local_addr.ip(),
            local_port: local_addr.port(),
            remote_addr: remote_addr.ip(),
            remote_port: remote_addr.port(),
        })
    }
}

// ===== impl TcpListener =====

#[cfg(not(feature = "testing"))]
impl SocketExt for TcpListener {}

#[cfg(not(feature = "testing"))]
impl TcpSocketExt for TcpListener {}

// ===== Mock sockets for unit testing =====

pub mod mock {
    #[derive(Debug, Default)]
    pub struct Socket();

    #[derive(Debug, Default)]
    pub struct UdpSocket();

    #[derive(Debug, Default)]
    pub struct TcpSocket();

    #[derive(Debug, Default)]
    pub struct TcpListener();

    #[derive(Debug, Default)]
    pub struct TcpStream();

    #[derive(Debug, Default)]
    pub struct OwnedReadHalf();

    #[derive(Debug, Default)]
    pub struct OwnedWriteHalf();

    impl TcpStream {
        pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
            (OwnedReadHalf(), OwnedWriteHalf())
        }
    }
}

// ===== global functions =====

fn setsockopt<F: AsRawFd>(
    sock: &F,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(sock.as_raw_fd(), level, optname, optval, optlen)
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}
