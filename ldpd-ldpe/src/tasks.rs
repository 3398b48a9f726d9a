//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU32, AtomicU64};
use std::time::Duration;

use ldpd_utils::Sender;
use ldpd_utils::socket::{
    OwnedReadHalf, OwnedWriteHalf, TcpListener, UdpSocket,
};
use ldpd_utils::task::{IntervalTask, Task, TimeoutTask};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;
use tracing::{Instrument, debug_span};

use crate::collections::AdjacencyId;
use crate::debug::Debug;
use crate::discovery::TargetedNbr;
use crate::error::Error;
use crate::interface::Interface;
use crate::ldpe::LdpeState;
use crate::neighbor::Neighbor;
use crate::network;

//
// LDPE tasks diagram:
//                                 +--------------+
//      basic_discovery_rx (1x) -> |              | -> (Nx) iface_hello_interval
//   extended_discovery_rx (1x) -> |              | -> (Nx) tnbr_hello_interval
//             adj_timeout (Nx) -> |              |
//                                 |              |
//            tcp_listener (1x) -> |     ldpe     |
//             tcp_connect (Nx) -> |              |
//                  nbr_rx (Nx) -> |              | -> (Nx) nbr_tx
//      nbr_kalive_timeout (Nx) -> |              | -> (Nx) nbr_kalive_interval
//    nbr_initdelay_timeout (Nx) -> |             |
//         control_listener (1x) -> |             |
//                                 +--------------+
//                          parent pipe | ^ | lde pipe
//

// LDPE inter-task message types.
pub mod messages {
    use ldpd_packet::{DecodeError, Message, Pdu};
    use ldpd_utils::ibus::CtlMsg;
    use ldpd_utils::socket::{TcpConnInfo, TcpStream};
    use serde::{Deserialize, Serialize};
    use tokio::sync::mpsc::UnboundedSender;

    use crate::collections::{AdjacencyId, NeighborId};
    use crate::error::Error;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use std::net::{IpAddr, Ipv4Addr};

        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            UdpRxPdu(UdpRxPduMsg),
            AdjTimeout(AdjTimeoutMsg),
            TcpAccept(TcpAcceptMsg),
            TcpConnect(TcpConnectMsg),
            NbrRxPdu(NbrRxPduMsg),
            NbrKaTimeout(NbrKaTimeoutMsg),
            NbrInitBackoffTimeout(NbrInitBackoffTimeoutMsg),
            Control(ControlMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UdpRxPduMsg {
            pub src_addr: IpAddr,
            pub multicast: bool,
            pub pdu: Result<Pdu, DecodeError>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct AdjTimeoutMsg {
            pub adj_id: AdjacencyId,
        }

        #[derive(Debug)]
        pub struct TcpAcceptMsg {
            pub stream: Option<TcpStream>,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct TcpConnectMsg {
            pub nbr_id: NeighborId,
            pub stream: Option<TcpStream>,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct NbrRxPduMsg {
            pub nbr_id: NeighborId,
            pub pdu: Result<Pdu, Error>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NbrKaTimeoutMsg {
            pub nbr_id: NeighborId,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NbrInitBackoffTimeoutMsg {
            pub lsr_id: Ipv4Addr,
        }

        #[derive(Debug)]
        pub enum ControlMsg {
            Connected {
                client_id: u64,
                replies: UnboundedSender<CtlMsg>,
            },
            Request {
                client_id: u64,
                msg: CtlMsg,
            },
            Disconnected {
                client_id: u64,
            },
        }

        impl TcpAcceptMsg {
            pub(crate) fn stream(&mut self) -> TcpStream {
                #[cfg(not(feature = "testing"))]
                {
                    self.stream.take().unwrap()
                }
                #[cfg(feature = "testing")]
                {
                    Default::default()
                }
            }
        }

        impl TcpConnectMsg {
            pub(crate) fn stream(&mut self) -> TcpStream {
                #[cfg(not(feature = "testing"))]
                {
                    self.stream.take().unwrap()
                }
                #[cfg(feature = "testing")]
                {
                    Default::default()
                }
            }
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use super::*;

        #[derive(Debug, Serialize)]
        pub struct NbrTxPduMsg {
            pub msg: Message,
            pub flush: bool,
        }
    }
}

// ===== LDPE tasks =====

// UDP basic discovery Rx task.
pub(crate) fn basic_discovery_rx(
    disc_socket: &Arc<UdpSocket>,
    udp_pdu_rxp: &Sender<messages::input::UdpRxPduMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("discovery");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let disc_socket = disc_socket.clone();
        let udp_pdu_rxp = udp_pdu_rxp.clone();

        Task::spawn(
            async move {
                let _ = network::udp::read_loop(disc_socket, true, udp_pdu_rxp)
                    .await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// UDP extended discovery Rx task.
pub(crate) fn extended_discovery_rx(
    edisc_socket: &Arc<UdpSocket>,
    udp_pdu_rxp: &Sender<messages::input::UdpRxPduMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("discovery");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let edisc_socket = edisc_socket.clone();
        let udp_pdu_rxp = udp_pdu_rxp.clone();

        Task::spawn(
            async move {
                let _ =
                    network::udp::read_loop(edisc_socket, false, udp_pdu_rxp)
                        .await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// Send periodic LDP link hello messages.
pub(crate) fn iface_hello_interval(
    iface: &Interface,
    disc_socket: &Arc<UdpSocket>,
    state: &LdpeState,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("interface", name = %iface.name);
        let _span1_guard = span1.enter();
        let span2 = debug_span!("discovery");
        let _span2_guard = span2.enter();
        let span3 = debug_span!("output");
        let _span3_guard = span3.enter();

        let disc_socket = disc_socket.clone();
        let router_id = state.router_id;
        let msg_id = state.msg_id.clone();
        let hello = iface.generate_hello(state);
        let hello_interval =
            iface.config.as_ref().map(|cfg| cfg.hello_interval).unwrap_or(5);

        IntervalTask::new(
            Duration::from_secs(hello_interval.into()),
            true,
            move || {
                let disc_socket = disc_socket.clone();
                let msg_id = msg_id.clone();
                let hello = hello.clone();

                Interface::send_hello(disc_socket, router_id, msg_id, hello)
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask::stub()
    }
}

// Send periodic LDP targeted hello messages.
pub(crate) fn tnbr_hello_interval(
    tnbr: &TargetedNbr,
    state: &LdpeState,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("targeted-nbr", address = %tnbr.addr);
        let _span1_guard = span1.enter();
        let span2 = debug_span!("discovery");
        let _span2_guard = span2.enter();
        let span3 = debug_span!("output");
        let _span3_guard = span3.enter();

        let edisc_socket = state.edisc_socket.clone();
        let addr = tnbr.addr;
        let router_id = state.router_id;
        let msg_id = state.msg_id.clone();
        let hello = tnbr.generate_hello(state);

        IntervalTask::new(
            Duration::from_secs(tnbr.hello_interval.into()),
            true,
            move || {
                let edisc_socket = edisc_socket.clone();
                let msg_id = msg_id.clone();
                let hello = hello.clone();

                TargetedNbr::send_hello(
                    edisc_socket,
                    addr,
                    router_id,
                    msg_id,
                    hello,
                )
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask::stub()
    }
}

// Hello adjacency timeout task.
pub(crate) fn adj_timeout(
    adj_id: AdjacencyId,
    holdtime: Duration,
    adj_timeoutp: &Sender<messages::input::AdjTimeoutMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let adj_timeoutp = adj_timeoutp.clone();
        TimeoutTask::new(holdtime, move || async move {
            let msg = messages::input::AdjTimeoutMsg { adj_id };
            let _ = adj_timeoutp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask::stub()
    }
}

// TCP listening task.
pub(crate) fn tcp_listener(
    session_socket: &Arc<TcpListener>,
    tcp_acceptp: &Sender<messages::input::TcpAcceptMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("session");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let session_socket = session_socket.clone();
        let tcp_acceptp = tcp_acceptp.clone();
        Task::spawn(
            async move {
                let _ = network::tcp::listen_loop(session_socket, tcp_acceptp)
                    .await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// TCP connect task.
pub(crate) fn tcp_connect(
    nbr: &Neighbor,
    password: Option<&str>,
    tcp_connectp: &Sender<messages::input::TcpConnectMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span = debug_span!("neighbor", lsr_id = %nbr.lsr_id);
        let _span_guard = span.enter();

        let nbr_id = nbr.id;
        let local_addr = nbr.laddr;
        let remote_addr = nbr.addr;
        let password = password.map(String::from);
        let tcp_connectp = tcp_connectp.clone();
        Task::spawn(
            async move {
                loop {
                    let result = network::tcp::connect(
                        local_addr,
                        remote_addr,
                        &password,
                    )
                    .await;

                    match result {
                        Ok((stream, conn_info)) => {
                            // Send message to the main LDPE task.
                            let msg = messages::input::TcpConnectMsg {
                                nbr_id,
                                stream: Some(stream),
                                conn_info,
                            };
                            let _ = tcp_connectp.send(msg).await;
                            return;
                        }
                        Err(error) => {
                            error.log();
                            // Wait one second before trying again.
                            sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// Neighbor TCP Rx task.
pub(crate) fn nbr_rx(
    nbr: &Neighbor,
    read_half: OwnedReadHalf,
    nbr_pdu_rxp: &Sender<messages::input::NbrRxPduMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("neighbor", lsr_id = %nbr.lsr_id);
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let nbr_id = nbr.id;
        let nbr_lsr_id = nbr.lsr_id;
        let max_pdu_len = nbr.max_pdu_len;
        let nbr_pdu_rxp = nbr_pdu_rxp.clone();

        Task::spawn(
            async move {
                let _ = network::tcp::nbr_read_loop(
                    read_half,
                    nbr_id,
                    nbr_lsr_id,
                    max_pdu_len,
                    nbr_pdu_rxp,
                )
                .await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// Neighbor TCP Tx task.
pub(crate) fn nbr_tx(
    nbr: &Neighbor,
    local_lsr_id: Ipv4Addr,
    write_half: OwnedWriteHalf,
    pdu_txc: UnboundedReceiver<messages::output::NbrTxPduMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("neighbor", lsr_id = %nbr.lsr_id);
        let _span1_guard = span1.enter();
        let span2 = debug_span!("output");
        let _span2_guard = span2.enter();

        let max_pdu_len = nbr.max_pdu_len;
        Task::spawn(
            async move {
                network::tcp::nbr_write_loop(
                    write_half,
                    local_lsr_id,
                    max_pdu_len,
                    pdu_txc,
                )
                .await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        let mut pdu_txc = pdu_txc;
        Task::spawn(async move {
            // Drain messages to keep senders alive during unit tests.
            while pdu_txc.recv().await.is_some() {}
        })
    }
}

// Send periodic keepalive messages.
pub(crate) fn nbr_kalive_interval(
    nbr: &Neighbor,
    msg_id: &Arc<AtomicU32>,
    keepalive_counter: &Arc<AtomicU64>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let lsr_id = nbr.lsr_id;
        let msg_id = msg_id.clone();
        let pdu_txp = nbr.pdu_txp.as_ref().unwrap().clone();
        let keepalive_counter = keepalive_counter.clone();

        IntervalTask::new(
            Duration::from_secs(nbr.kalive_interval().into()),
            false,
            move || {
                let msg_id = msg_id.clone();
                let pdu_txp = pdu_txp.clone();
                let keepalive_counter = keepalive_counter.clone();

                async move {
                    let msg = Neighbor::generate_keepalive(&msg_id);
                    Debug::NbrMsgTx(&lsr_id, &msg).log();

                    let flush = true;
                    let msg = messages::output::NbrTxPduMsg { msg, flush };
                    let _ = pdu_txp.send(msg);
                    keepalive_counter.fetch_add(1, atomic::Ordering::Relaxed);
                }
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask::stub()
    }
}

// Neighbor keepalive timeout task.
pub(crate) fn nbr_kalive_timeout(
    nbr: &Neighbor,
    nbr_ka_timeoutp: &Sender<messages::input::NbrKaTimeoutMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let nbr_ka_timeoutp = nbr_ka_timeoutp.clone();
        let nbr_id = nbr.id;

        TimeoutTask::new(
            Duration::from_secs(nbr.keepalive.into()),
            move || async move {
                let msg = messages::input::NbrKaTimeoutMsg { nbr_id };
                let _ = nbr_ka_timeoutp.send(msg).await;
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask::stub()
    }
}

// Neighbor initialization backoff timeout task.
pub(crate) fn nbr_initdelay_timeout(
    nbr: &mut Neighbor,
    nbr_initdelayp: &Sender<messages::input::NbrInitBackoffTimeoutMsg>,
) -> TimeoutTask {
    //
    // RFC 5036 - Section 2.5.3:
    // "The session establishment setup attempt following a NAK'd
    // Initialization message MUST be delayed no less than 15 seconds, and
    // subsequent delays MUST grow to a maximum delay of no less than 2
    // minutes".
    //
    let timeout = match nbr.idtimer_cnt {
        0 => 15,
        1 => 30,
        2 => 60,
        _ => 120,
    };
    nbr.idtimer_cnt = nbr.idtimer_cnt.saturating_add(1);

    #[cfg(not(feature = "testing"))]
    {
        let nbr_initdelayp = nbr_initdelayp.clone();
        let lsr_id = nbr.lsr_id;

        TimeoutTask::new(Duration::from_secs(timeout), move || async move {
            let msg = messages::input::NbrInitBackoffTimeoutMsg { lsr_id };
            let _ = nbr_initdelayp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        let _ = timeout;
        TimeoutTask::stub()
    }
}
