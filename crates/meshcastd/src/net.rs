//! UDP multicast transport for the engine.
//!
//! Broadcast is an IPv6 link-local multicast group; unicast goes
//! straight to the peer's link-local address on the same port. One
//! socket sends, one listens on the group. The engine never sees a
//! socket — it speaks through its two channels.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use meshcast_core::wire::MAX_DATAGRAM;
use meshcast_core::{Message, PeerAddr, SendTarget};

/// Link-local multicast group all peers join.
pub const MULTICAST_ADDR: &str = "ff02::4d43";

/// UDP port all peers bind.
pub const PORT: u16 = 7709;

/// Get the OS interface index for a named network interface.
/// Returns an error if the interface does not exist.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}

/// Create the sending socket, scoped to the given interface.
pub fn make_sender(interface_index: u32) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_multicast_if_v6(interface_index).context("IPV6_MULTICAST_IF")?;
    // Hop limit 1 — stay on this link, do not route beyond it.
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
    socket.bind(&bind.into()).context("bind()")?;

    UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")
}

/// Create the listening socket, joined to the multicast group.
pub fn make_listener(interface_index: u32) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, PORT, 0, 0);
    socket.bind(&bind.into()).context("bind()")?;

    let group: Ipv6Addr = MULTICAST_ADDR.parse().unwrap();
    socket
        .join_multicast_v6(&group, interface_index)
        .context("IPV6_JOIN_GROUP")?;

    UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")
}

/// Drain the engine's outbound channel onto the wire.
/// Runs until the engine drops its sender.
pub async fn outbound_loop(
    socket: UdpSocket,
    mut outbound: mpsc::Receiver<(SendTarget, Message)>,
    interface_index: u32,
) {
    let group: Ipv6Addr = MULTICAST_ADDR.parse().unwrap();

    while let Some((target, message)) = outbound.recv().await {
        let bytes = message.to_bytes();
        let dest = match target {
            SendTarget::Broadcast => SocketAddrV6::new(group, PORT, 0, interface_index),
            SendTarget::Peer { addr } => SocketAddrV6::new(addr.addr, PORT, 0, addr.ifindex),
        };
        match socket.send_to(&bytes, SocketAddr::V6(dest)).await {
            Ok(n) => tracing::trace!(bytes = n, kind = message.kind(), "datagram sent"),
            Err(e) => tracing::warn!(error = %e, kind = message.kind(), "send failed"),
        }
    }
    tracing::info!("outbound loop done — engine stopped");
}

/// Feed received datagrams into the engine.
/// Runs until the engine drops its receiver.
pub async fn inbound_loop(
    socket: UdpSocket,
    inbound: mpsc::Sender<(PeerAddr, Message)>,
    local_addr: Ipv6Addr,
    interface_index: u32,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        let sender = match from {
            SocketAddr::V6(v6) => *v6.ip(),
            SocketAddr::V4(_) => {
                tracing::warn!("received IPv4 datagram on IPv6 socket, ignoring");
                continue;
            }
        };

        // Our own multicast transmissions loop back — drop them here so
        // the engine never discovers itself as a neighbor.
        if sender == local_addr {
            continue;
        }

        let message = match Message::from_bytes(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, from = %sender, "malformed datagram, discarding");
                continue;
            }
        };

        if inbound
            .send((PeerAddr::new(sender, interface_index), message))
            .await
            .is_err()
        {
            tracing::info!("inbound loop done — engine stopped");
            return;
        }
    }
}
