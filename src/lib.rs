//! # TUNGO
//!
//! The cryptographic core of a point-to-point VPN tunnel:
//!
//! - **Handshake**: three-message signed key exchange (X25519 +
//!   Ed25519 + HKDF-SHA256) with MTU negotiation
//! - **Record layer**: ChaCha20-Poly1305 with per-epoch nonce counters
//!   and sliding-window replay protection
//! - **Rekeying**: in-band epoch rotation, either side may initiate;
//!   superseded epochs keep decrypting until a bounded ring evicts
//!   them
//! - **Dispatch**: one UDP socket multiplexing every client, with
//!   per-source registration queues and NAT-rebinding support
//!
//! The TUN device, the IP-header destination parser and the handshake
//! transports are capability traits ([`core::TunDevice`],
//! [`core::DestinationParser`], [`core::FramedConduit`]); the crate
//! never touches the OS network configuration.
//!
//! ## Feature Flags
//!
//! - `client` (default): high-level client API
//! - `server` (default): high-level server API
//!
//! ## Example
//!
//! ```ignore
//! use tungo::server::{TungoServer, TungoServerBuilder};
//!
//! let config = TungoServerBuilder::new()
//!     .bind_addr("0.0.0.0:9821".parse()?)
//!     .identity(identity)
//!     .build();
//!
//! let server = TungoServer::start(config, tun, parser).await?;
//! println!("listening on {}", server.local_addr());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core constants, errors and capability traits (always included)
pub mod core;

// Record layer: AEAD, epochs, replay, rekey
pub mod crypto;

// Authenticated key exchange
pub mod handshake;

// Data-plane sessions and the two-way repository
pub mod session;

// Sockets, framing, service packets, UDP dispatch
pub mod transport;

// Reverse path (TUN -> UDP)
pub mod tun;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        CryptoError, DestinationParser, FramedConduit, HandshakeError, IpPolicyError,
        ServicePacketError, TransportError, TunDevice, TungoError,
    };
    pub use crate::crypto::{
        AeadSession, Crypto, Decrypted, Direction, EpochRing, EpochUdpCrypto, Identity,
        RekeyController, RekeyFsm, RekeyMaterial, ReplayWindow, SessionId, SessionKey,
        SessionSecrets,
    };
    pub use crate::handshake::{ClientHello, ClientSignature, IpPolicy, ServerHello};
    pub use crate::session::{Session, SessionRepository};
    pub use crate::transport::{
        DatagramConduit, LengthPrefixed, RegistrationQueue, ServicePacket, TunnelSocket, UdpPeer,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{ClientConfig, TungoClient, TungoClientBuilder};

    #[cfg(feature = "server")]
    pub use crate::server::{ServerConfig, TungoServer, TungoServerBuilder};
}

// Re-export commonly used items at crate root
pub use crate::core::TungoError;
pub use crate::crypto::{Crypto, Identity};
pub use crate::handshake::IpPolicy;

#[cfg(feature = "client")]
pub use client::TungoClient;

#[cfg(feature = "server")]
pub use server::TungoServer;
