//! Transport plumbing: sockets, framing, registration queues, the
//! service-packet codec and the UDP dispatch layer.

pub mod framing;
pub mod handler;
pub mod queue;
pub mod service;
pub mod socket;

pub use framing::{DatagramConduit, LengthPrefixed, MAX_FRAME_SIZE};
pub use handler::UdpTransportHandler;
pub use queue::{RegistrationConduit, RegistrationQueue};
pub use service::ServicePacket;
pub use socket::{TunnelSocket, UdpPeer};
