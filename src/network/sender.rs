//! Outbound datagram path

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::NetworkError;

/// Sends encoded packets to one fixed peer. Fire and forget.
pub struct PacketSender {
    socket: UdpSocket,
    target: SocketAddr,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl PacketSender {
    /// Bind an ephemeral local port and aim it at `target`.
    pub fn new(target: SocketAddr) -> Result<Self, NetworkError> {
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket =
            UdpSocket::bind(local).map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        Ok(Self::from_socket(socket, target))
    }

    pub fn from_socket(socket: UdpSocket, target: SocketAddr) -> Self {
        Self {
            socket,
            target,
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        }
    }

    pub fn send(&self, packet: &[u8]) -> Result<usize, NetworkError> {
        match self.socket.send_to(packet, self.target) {
            Ok(n) => {
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(format!("{}: {}", self.target, e)))
            }
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}
