//! Core constants, error taxonomy, and capability seams.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::{
    CryptoError, HandshakeError, IpPolicyError, ServicePacketError, TransportError, TungoError,
};
pub use traits::{DestinationParser, FramedConduit, TunDevice};
