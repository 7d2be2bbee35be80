//! Record layer: AEAD primitives, epochs, anti-replay and rekeying.

pub mod aead;
pub mod epoch;
pub mod keys;
pub mod nonce;
pub mod rekey;
pub mod replay;
pub mod ring;
pub mod session;

pub use epoch::EpochUdpCrypto;
pub use keys::{Identity, SessionId, SessionKey, SessionSecrets, derive_session_secrets};
pub use nonce::{Direction, NonceCounter};
pub use rekey::{RekeyController, RekeyFsm};
pub use replay::ReplayWindow;
pub use ring::EpochRing;
pub use session::AeadSession;

use crate::core::CryptoError;

/// Output of a successful decrypt: the plaintext and the epoch whose
/// keys opened it.
#[derive(Debug)]
pub struct Decrypted {
    /// Epoch read from the packet header.
    pub epoch: u16,
    /// Decrypted payload.
    pub payload: Vec<u8>,
}

/// Directional keys produced by a rekey derivation.
pub struct RekeyMaterial {
    /// New client -> server key.
    pub client_to_server: SessionKey,
    /// New server -> client key.
    pub server_to_client: SessionKey,
}

/// The cryptographic capability a data-plane session holds.
///
/// Implemented by [`EpochUdpCrypto`] for the UDP datapath; tests
/// substitute mocks. All methods take `&self`: implementations are
/// internally synchronized.
pub trait Crypto: Send + Sync + 'static {
    /// Encrypt a payload into a full datapath packet under the current
    /// send epoch.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Encrypt in place: `packet` holds a 14-byte header region
    /// followed by the plaintext and spare capacity for the tag.
    fn encrypt_in_place(&self, packet: &mut Vec<u8>) -> Result<(), CryptoError>;

    /// Decrypt a datapath packet, resolving the epoch from its header.
    fn decrypt(&self, packet: &[u8]) -> Result<Decrypted, CryptoError>;

    /// Install a new epoch with the given directional keys. Returns
    /// the new epoch; refuses when installation would evict the active
    /// send epoch.
    fn rekey(&self, material: RekeyMaterial) -> Result<u16, CryptoError>;

    /// Derive post-rekey directional keys from an ephemeral X25519
    /// shared secret, using the current epoch's keys as context.
    fn derive_rekey_keys(&self, shared_secret: &[u8; 32]) -> Result<RekeyMaterial, CryptoError>;

    /// The epoch currently elected for sending.
    fn send_epoch(&self) -> u16;

    /// Atomically switch the outbound epoch.
    fn set_send_epoch(&self, epoch: u16);

    /// Drop an epoch from the ring. Refuses for the active send epoch
    /// and for the last remaining entry.
    fn remove_epoch(&self, epoch: u16) -> Result<(), CryptoError>;

    /// Zero the session identifier and every epoch's key material.
    /// The instance is unusable afterwards.
    fn zeroize(&self);
}
