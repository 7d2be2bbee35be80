//! UDP socket plumbing for the tunnel datapath.
//!
//! [`TunnelSocket`] wraps the async socket with a receive buffer sized
//! for the tunnel MTU plus record overhead. [`UdpPeer`] is the send
//! half a registered session holds: the shared server socket plus the
//! peer's external address.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::core::{DEFAULT_ETHERNET_MTU, UDP_CHACHA20_OVERHEAD};

/// Default receive buffer size: a full-MTU datagram plus record
/// overhead.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = DEFAULT_ETHERNET_MTU + UDP_CHACHA20_OVERHEAD;

/// Async UDP socket wrapper for the tunnel.
#[derive(Debug)]
pub struct TunnelSocket {
    socket: Arc<UdpSocket>,
    recv_buffer: Vec<u8>,
}

impl TunnelSocket {
    /// Bind to the given address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            recv_buffer: vec![0u8; DEFAULT_RECV_BUFFER_SIZE],
        }
    }

    /// The local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Connect to a remote address (client sockets).
    pub async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        self.socket.connect(addr).await
    }

    /// Send to a specific address.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr).await
    }

    /// Send to the connected address.
    pub async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data).await
    }

    /// Receive one datagram and the sender's address.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }

    /// Receive one datagram from the connected address.
    pub async fn recv(&mut self) -> io::Result<&[u8]> {
        let len = self.socket.recv(&mut self.recv_buffer).await?;
        Ok(&self.recv_buffer[..len])
    }

    /// A clone of the Arc-wrapped socket.
    pub fn socket_arc(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

/// The transport handle a registered session owns: where its
/// ciphertext goes.
#[derive(Debug, Clone)]
pub struct UdpPeer {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpPeer {
    /// Bind a send handle to a peer address.
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    /// The peer's external address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one packet to the peer.
    pub async fn send(&self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send_to(packet, self.peer).await
    }
}
