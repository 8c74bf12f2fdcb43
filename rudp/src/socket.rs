//! Datagram substrate binding.
//!
//! [`Transport`] is the only thing the protocol needs from the network: send
//! one segment to an address, receive the next segment and who sent it.
//! [`Socket`] implements it over `tokio::net::UdpSocket`;
//! [`crate::simulator::Simulator`] wraps any transport with fault injection.
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Packet, PacketError};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a segment.
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
}

impl SocketError {
    /// A malformed datagram is dropped by the caller rather than surfaced.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Packet(_))
    }
}

/// A segment-oriented, unreliable datagram channel.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Address this endpoint is reachable at.
    fn local_addr(&self) -> SocketAddr;

    /// Encode `packet` and send it as one datagram to `dest`.
    async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError>;

    /// Receive the next datagram and decode it.
    ///
    /// Datagrams that fail to decode are returned as
    /// [`SocketError::Packet`]; the caller decides whether to retry.
    async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError>;
}

/// An async, packet-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

impl Transport for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&packet.encode(), dest).await?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let packet = Packet::decode(&buf[..n])?;
        Ok((packet, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind")
    }

    #[tokio::test]
    async fn packets_cross_loopback() {
        let a = loopback().await;
        let b = loopback().await;
        let pkt = Packet::control(1, 2, flags::SYN, 3);

        a.send_to(&pkt, b.local_addr).await.unwrap();
        let (got, from) = b.recv_from().await.unwrap();
        assert_eq!(got, pkt);
        assert_eq!(from, a.local_addr);
    }

    #[tokio::test]
    async fn short_datagram_is_malformed() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = loopback().await;
        a.send_to(&[1, 2, 3], b.local_addr).await.unwrap();

        let err = b.recv_from().await.unwrap_err();
        assert!(err.is_malformed());
    }
}
