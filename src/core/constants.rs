//! Protocol constants for the TUNGO tunnel.
//!
//! These values are fixed by the wire format and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// ChaCha20-Poly1305 key size.
pub const SESSION_KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce size (RFC 8439, IETF variant).
pub const AEAD_NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// X25519 public key size.
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 public key size.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 private key size as persisted (seed || public).
pub const ED25519_KEYPAIR_SIZE: usize = 64;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Session identifier size.
pub const SESSION_ID_SIZE: usize = 32;

/// Handshake nonce size (random, per hello).
pub const HANDSHAKE_NONCE_SIZE: usize = 32;

/// Direction label size inside the AAD.
pub const DIRECTION_SIZE: usize = 16;

/// AAD layout: session_id || direction || epoch || nonce.
pub const AAD_SIZE: usize = SESSION_ID_SIZE + DIRECTION_SIZE + EPOCH_SIZE + AEAD_NONCE_SIZE;

// =============================================================================
// KEY SCHEDULE INFO STRINGS
// =============================================================================

/// HKDF info for the client-to-server key; doubles as the C->S AAD
/// direction label (exactly 16 bytes).
pub const INFO_CLIENT_TO_SERVER: &[u8; DIRECTION_SIZE] = b"client-to-server";

/// HKDF info for the server-to-client key; doubles as the S->C AAD
/// direction label (exactly 16 bytes).
pub const INFO_SERVER_TO_CLIENT: &[u8; DIRECTION_SIZE] = b"server-to-client";

/// HKDF info for the session identifier.
pub const INFO_SESSION_ID: &[u8] = b"session-id-derivation";

/// HKDF info for the rekeyed client-to-server key.
pub const INFO_REKEY_C2S: &[u8] = b"tungo-rekey-c2s";

/// HKDF info for the rekeyed server-to-client key.
pub const INFO_REKEY_S2C: &[u8] = b"tungo-rekey-s2c";

// =============================================================================
// DATAPATH WIRE LAYOUT
// =============================================================================

/// Epoch prefix size on the wire.
pub const EPOCH_SIZE: usize = 2;

/// Unencrypted datapath header: epoch || nonce.
pub const PACKET_HEADER_SIZE: usize = EPOCH_SIZE + AEAD_NONCE_SIZE;

/// Total per-packet overhead on UDP: epoch + nonce + tag.
pub const UDP_CHACHA20_OVERHEAD: usize = PACKET_HEADER_SIZE + AEAD_TAG_SIZE;

/// Default MTU assumed for the tunnel when the peer negotiates nothing.
pub const DEFAULT_ETHERNET_MTU: usize = 1500;

/// Length prefix size for the TCP datapath framing.
pub const TCP_LENGTH_PREFIX_SIZE: usize = 2;

// =============================================================================
// HANDSHAKE MESSAGE SIZES
// =============================================================================

/// Optional trailing MTU field of ClientHello.
pub const MTU_EXTENSION_SIZE: usize = 2;

/// Smallest valid ClientHello: v4 address, no MTU extension.
pub const MIN_CLIENT_HELLO_SIZE: usize =
    2 + 4 + ED25519_PUBLIC_KEY_SIZE + X25519_PUBLIC_KEY_SIZE + HANDSHAKE_NONCE_SIZE;

/// Largest valid ClientHello: v6 address plus the 2-byte MTU extension.
pub const MAX_CLIENT_HELLO_SIZE: usize = 2
    + 16
    + ED25519_PUBLIC_KEY_SIZE
    + X25519_PUBLIC_KEY_SIZE
    + HANDSHAKE_NONCE_SIZE
    + MTU_EXTENSION_SIZE;

/// ServerHello: signature || server nonce || server X25519 public.
pub const SERVER_HELLO_SIZE: usize =
    SIGNATURE_SIZE + HANDSHAKE_NONCE_SIZE + X25519_PUBLIC_KEY_SIZE;

/// ClientSignature message size.
pub const CLIENT_SIGNATURE_SIZE: usize = SIGNATURE_SIZE;

// =============================================================================
// SERVICE PACKETS
// =============================================================================

/// First byte of every V1 service packet.
pub const SERVICE_PREFIX: u8 = 0xFF;

/// Service-packet codec version.
pub const SERVICE_VERSION: u8 = 0x01;

/// V1 header: prefix + version + type.
pub const SERVICE_HEADER_SIZE: usize = 3;

/// Legacy pre-session reset: a single byte with this value, in clear.
pub const LEGACY_SESSION_RESET: u8 = 1;

// =============================================================================
// ANTI-REPLAY AND EPOCHS
// =============================================================================

/// Replay window width in bits.
pub const REPLAY_WINDOW_SIZE: u64 = 64;

/// Epoch ring capacity: receive epochs that coexist per session.
pub const EPOCH_RING_CAPACITY: usize = 4;

/// Largest epoch; reaching it means the 16-bit space is exhausted.
pub const MAX_EPOCH: u16 = u16::MAX;

// =============================================================================
// TIMING AND QUEUES
// =============================================================================

/// Server-side budget for a registration handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a pending rekey waits for traffic under the new epoch
/// before the controller stops trying to elect it.
pub const REKEY_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Datagrams buffered per not-yet-registered source.
pub const REGISTRATION_QUEUE_CAPACITY: usize = 16;
