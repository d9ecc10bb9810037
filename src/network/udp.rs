//! UDP socket construction

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// Socket options for one stream.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Receive timeout; bounds how long a closed stream takes to notice.
    pub read_timeout: Option<Duration>,
    /// Kernel receive buffer size in bytes.
    pub recv_buffer_size: Option<usize>,
    pub reuse_address: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_millis(100)),
            recv_buffer_size: None,
            reuse_address: true,
        }
    }
}

/// Create and bind a UDP socket.
pub fn create_socket(addr: SocketAddr, options: &SocketOptions) -> Result<UdpSocket, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", addr, e));

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;

    if options.reuse_address {
        socket.set_reuse_address(true).map_err(bind_err)?;
    }
    if let Some(size) = options.recv_buffer_size {
        // Best effort; the kernel may clamp it.
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::warn!("Failed to set receive buffer size on {}: {}", addr, e);
        }
    }
    socket.set_read_timeout(options.read_timeout).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;

    Ok(socket.into())
}

/// Shut a socket down so a blocked receive returns.
///
/// Unconnected UDP sockets may report `NotConnected`; the receive side
/// still wakes on platforms that support it, and the read timeout covers
/// the rest.
pub fn shutdown_socket(socket: &UdpSocket) {
    if let Err(e) = SockRef::from(socket).shutdown(Shutdown::Both) {
        tracing::debug!("socket shutdown: {}", e);
    }
}

/// Send an empty datagram to `addr` so a receiver blocked on it returns.
///
/// A wildcard address is reached through loopback.
pub fn wake_receiver(addr: SocketAddr) {
    let target: SocketAddr = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => (Ipv4Addr::LOCALHOST, addr.port()).into(),
        IpAddr::V6(ip) if ip.is_unspecified() => (Ipv6Addr::LOCALHOST, addr.port()).into(),
        _ => addr,
    };
    let local: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let sent = UdpSocket::bind(local).and_then(|s| s.send_to(&[], target));
    if let Err(e) = sent {
        tracing::debug!("wake {}: {}", target, e);
    }
}
