//! I/O capability seams for the TUNGO datapath.
//!
//! The tunnel core treats its collaborators as interfaces: the TUN
//! device is a byte-oriented packet reader/writer, the IP-header
//! destination parser is a pure function, and handshake transports are
//! framed conduits. Tests substitute in-memory implementations.

use std::future::Future;
use std::io;
use std::net::Ipv4Addr;

use super::error::TransportError;

/// A TUN-like device carrying whole IP datagrams.
///
/// The tunnel never interprets packet bytes beyond what
/// [`DestinationParser`] extracts; the device owns framing and MTU
/// enforcement on its side.
pub trait TunDevice: Send + Sync + 'static {
    /// Read one IP datagram into `buf`, returning its length.
    fn read_packet(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write one IP datagram.
    fn write_packet(&self, packet: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// Extracts the destination address from a raw IP datagram.
///
/// Pure; called once per outbound packet on the reverse path.
pub trait DestinationParser: Send + Sync + 'static {
    /// The packet's destination, or `None` when the header is not a
    /// parseable IPv4 datagram.
    fn destination(&self, packet: &[u8]) -> Option<Ipv4Addr>;
}

/// A reliable, message-framed transport for handshake messages.
///
/// The UDP implementation yields whole datagrams from a registration
/// queue; the TCP implementation performs full reads under a 2-byte
/// big-endian length prefix.
pub trait FramedConduit: Send {
    /// Read the next complete frame.
    fn read_frame(&mut self) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Write one complete frame.
    fn write_frame(&mut self, frame: &[u8])
    -> impl Future<Output = Result<(), TransportError>> + Send;
}
