//! Per-socket option helpers, applied through [`crate::engine::SocketView`]
//! from inside a `visit_socket` closure, on the task that owns the socket.
//!
//! These wrap the plain `tokio::net` setters directly; the pre-bind
//! `socket2`-based options (`SO_REUSEADDR`, listen backlog) live in the
//! acceptor/connector/UDP bind helpers instead, since they only take effect
//! before the socket is handed to Tokio.

use std::io;
use std::net::Ipv4Addr;

use crate::engine::SocketView;

/// Enables or disables Nagle's algorithm (TCP only; a no-op request on a
/// `SocketView::Udp`/`TcpListener` view returns an error).
pub fn set_no_delay(view: &SocketView<'_>, enabled: bool) -> io::Result<()> {
    match view {
        SocketView::Tcp(stream) => stream.set_nodelay(enabled),
        _ => Err(not_tcp()),
    }
}

pub fn no_delay(view: &SocketView<'_>) -> io::Result<bool> {
    match view {
        SocketView::Tcp(stream) => stream.nodelay(),
        _ => Err(not_tcp()),
    }
}

/// UDP only: enables sending to the subnet broadcast address.
pub fn set_broadcast(view: &SocketView<'_>, enabled: bool) -> io::Result<()> {
    match view {
        SocketView::Udp(socket) => socket.set_broadcast(enabled),
        _ => Err(not_udp()),
    }
}

pub fn broadcast(view: &SocketView<'_>) -> io::Result<bool> {
    match view {
        SocketView::Udp(socket) => socket.broadcast(),
        _ => Err(not_udp()),
    }
}

/// UDP only: joins an IPv4 multicast group on the given local interface.
pub fn join_multicast_v4(view: &SocketView<'_>, multiaddr: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
    match view {
        SocketView::Udp(socket) => socket.join_multicast_v4(multiaddr, interface),
        _ => Err(not_udp()),
    }
}

pub fn leave_multicast_v4(view: &SocketView<'_>, multiaddr: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
    match view {
        SocketView::Udp(socket) => socket.leave_multicast_v4(multiaddr, interface),
        _ => Err(not_udp()),
    }
}

/// UDP only: how many network hops an outgoing multicast datagram may take.
pub fn set_multicast_ttl_v4(view: &SocketView<'_>, ttl: u32) -> io::Result<()> {
    match view {
        SocketView::Udp(socket) => socket.set_multicast_ttl_v4(ttl),
        _ => Err(not_udp()),
    }
}

/// IP time-to-live for outgoing packets; applies to TCP connections and UDP
/// sockets alike.
pub fn set_ttl(view: &SocketView<'_>, ttl: u32) -> io::Result<()> {
    match view {
        SocketView::Tcp(stream) => stream.set_ttl(ttl),
        SocketView::Udp(socket) => socket.set_ttl(ttl),
        SocketView::TcpListener(listener) => listener.set_ttl(ttl),
    }
}

pub fn ttl(view: &SocketView<'_>) -> io::Result<u32> {
    match view {
        SocketView::Tcp(stream) => stream.ttl(),
        SocketView::Udp(socket) => socket.ttl(),
        SocketView::TcpListener(listener) => listener.ttl(),
    }
}

fn not_tcp() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "option only applies to a TCP connection")
}

fn not_udp() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "option only applies to a UDP socket")
}
