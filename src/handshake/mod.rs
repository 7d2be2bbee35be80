//! The three-message authenticated key exchange.
//!
//! ClientHello / ServerHello / ClientSignature over a framed conduit;
//! X25519 for the shared secret, Ed25519 for authentication, HKDF-SHA256
//! for the key schedule. See [`client::connect`] and [`server::accept`].

pub mod client;
pub mod ip_policy;
pub mod messages;
pub mod server;

pub use ip_policy::{IpPolicy, normalize_ip};
pub use messages::{ClientHello, ClientSignature, ServerHello};
pub use server::ServerHandshakeOutcome;
