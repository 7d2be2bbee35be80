//! Error types for the TUNGO tunnel.

use thiserror::Error;

/// Errors in the record layer and epoch machinery.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Sequence below the window or already accepted.
    #[error("replay detected")]
    ReplayDetected,

    /// AEAD open failed; the cause is opaque to callers.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// AEAD seal failed (plaintext beyond cipher limits).
    #[error("encryption failed")]
    EncryptionFailed,

    /// Decrypt requested for an epoch not present in the ring.
    #[error("unknown epoch {0}")]
    UnknownEpoch(u16),

    /// The 16-bit epoch space overflowed - fatal for the session.
    #[error("epoch space exhausted - session must terminate")]
    EpochExhausted,

    /// The 96-bit nonce counter overflowed - fatal for the epoch.
    #[error("nonce counter exhausted - session must terminate")]
    NonceExhausted,

    /// Rekey could not proceed. Generic by contract: refusal must not
    /// reveal which ring condition blocked it.
    #[error("rekey refused")]
    RekeyRefused,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Caller-provided buffer cannot hold the header region or tag.
    /// A programmer error; the datapath logs it and drops the packet.
    #[error("buffer too small: need {needed}, have {available}")]
    ShortBuffer {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
}

/// Errors during ClientHello IP screening.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IpPolicyError {
    /// Address bytes are neither 4 nor 16 long.
    #[error("invalid address length {0}")]
    InvalidLength(usize),

    /// The IP version is disabled by policy.
    #[error("address family not allowed")]
    VersionNotAllowed,

    /// Loopback addresses are forbidden.
    #[error("loopback address")]
    Loopback,

    /// Multicast addresses are forbidden.
    #[error("multicast address")]
    Multicast,

    /// The unspecified address is forbidden.
    #[error("unspecified address")]
    Unspecified,

    /// Link-local addresses are forbidden.
    #[error("link-local address")]
    LinkLocal,

    /// The limited broadcast address is forbidden.
    #[error("broadcast address")]
    BroadcastV4,

    /// A private-range address is required.
    #[error("address not in a private range")]
    NotPrivate,
}

/// Errors that abort a handshake. All of them are fatal: no session is
/// created and the server answers with a legacy SessionReset.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A message had an impossible length.
    #[error("bad message length {actual} for {message}")]
    MessageLength {
        /// Which handshake message.
        message: &'static str,
        /// Observed length.
        actual: usize,
    },

    /// ClientHello carried an IP version other than 4 or 6, or an
    /// address length inconsistent with the version byte.
    #[error("invalid ip version {0}")]
    InvalidIpVersion(u8),

    /// Ed25519 verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// The claimed tunnel address was rejected by policy.
    #[error("ip policy violation: {0}")]
    IpPolicy(#[from] IpPolicyError),

    /// The peer aborted with a SessionReset instead of a hello.
    #[error("peer reset the handshake")]
    PeerReset,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivation,

    /// The underlying conduit failed or closed.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// The handshake deadline elapsed.
    #[error("handshake timed out")]
    Timeout,
}

/// Errors decoding service packets.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ServicePacketError {
    /// Fewer bytes than the V1 header.
    #[error("service packet too short ({0} bytes)")]
    TooShort(usize),

    /// First byte is not the service prefix.
    #[error("bad service prefix {0:#04x}")]
    BadPrefix(u8),

    /// Unsupported codec version.
    #[error("unsupported service version {0}")]
    BadVersion(u8),

    /// Unknown packet type.
    #[error("unknown service packet type {0}")]
    UnknownType(u8),

    /// A type that requires a payload arrived without one.
    #[error("missing payload for service packet type {0}")]
    MissingPayload(u8),
}

/// Errors in the transport plumbing.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the OS closed the conduit; tasks exit cleanly.
    #[error("transport closed")]
    Closed,

    /// A frame exceeded the 16-bit length prefix.
    #[error("frame too large ({0} bytes)")]
    FrameTooLarge(usize),

    /// The registration queue was force-closed.
    #[error("registration queue closed")]
    QueueClosed,

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level TUNGO errors.
#[derive(Debug, Error)]
pub enum TungoError {
    /// Record-layer error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Handshake error.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Service-packet codec error.
    #[error("service packet error: {0}")]
    ServicePacket(#[from] ServicePacketError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
