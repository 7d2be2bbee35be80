//! A registered data-plane session.
//!
//! Created by a successful registration and immutable afterwards: the
//! transport handle, the crypto capability, the rekey controller and
//! both addresses are fixed for the session's lifetime. NAT rebinding
//! produces a replacement session, never a mutation.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::crypto::{Crypto, RekeyController};
use crate::transport::UdpPeer;

/// One peer relationship on the UDP datapath.
pub struct Session {
    internal_ip: Ipv4Addr,
    external: SocketAddr,
    transport: UdpPeer,
    crypto: Arc<dyn Crypto>,
    rekey: RekeyController,
    mtu: usize,
}

impl Session {
    /// Assemble a session from its parts. `mtu` is the negotiated
    /// effective MTU (`min(server, peer)` when the peer announced
    /// one).
    pub fn new(
        internal_ip: Ipv4Addr,
        external: SocketAddr,
        transport: UdpPeer,
        crypto: Arc<dyn Crypto>,
        rekey: RekeyController,
        mtu: usize,
    ) -> Self {
        Self {
            internal_ip,
            external,
            transport,
            crypto,
            rekey,
            mtu,
        }
    }

    /// The tunnel-internal address.
    pub fn internal_ip(&self) -> Ipv4Addr {
        self.internal_ip
    }

    /// The external address:port traffic arrives from.
    pub fn external_addr(&self) -> SocketAddr {
        self.external
    }

    /// The send handle toward the peer.
    pub fn transport(&self) -> &UdpPeer {
        &self.transport
    }

    /// The session's crypto capability.
    pub fn crypto(&self) -> &Arc<dyn Crypto> {
        &self.crypto
    }

    /// The session's rekey controller.
    pub fn rekey(&self) -> &RekeyController {
        &self.rekey
    }

    /// Negotiated MTU for tunnel payloads.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Zero all key material. Called when the session is destroyed or
    /// replaced.
    pub fn zeroize(&self) {
        self.crypto.zeroize();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("internal_ip", &self.internal_ip)
            .field("external", &self.external)
            .field("mtu", &self.mtu)
            .finish()
    }
}
