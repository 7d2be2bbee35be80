//! ChaCha20-Poly1305 record primitives (RFC 8439).
//!
//! Stateless seal/open over a 32-byte key, 12-byte nonce and 16-byte
//! tag: `len(ct) = len(pt) + 16`. The AAD binds every packet to its
//! session, direction, epoch and nonce:
//!
//! ```text
//! [ session_id (32) | direction (16) | epoch (2, BE) | nonce (12) ]
//! ```
//!
//! Open failures are opaque: callers never learn whether the tag, the
//! AAD or the ciphertext was wrong.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadInPlace, KeyInit, Payload},
};

use crate::core::{
    AAD_SIZE, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError, DIRECTION_SIZE, SESSION_ID_SIZE,
};

use super::keys::{SessionId, SessionKey};
use super::nonce::Direction;

/// Construct the 62-byte AAD for a datapath packet.
pub fn construct_aad(
    session_id: &SessionId,
    direction: Direction,
    epoch: u16,
    nonce: &[u8; AEAD_NONCE_SIZE],
) -> [u8; AAD_SIZE] {
    let mut aad = [0u8; AAD_SIZE];

    aad[..SESSION_ID_SIZE].copy_from_slice(session_id.as_bytes());
    aad[SESSION_ID_SIZE..SESSION_ID_SIZE + DIRECTION_SIZE].copy_from_slice(direction.label());
    let epoch_at = SESSION_ID_SIZE + DIRECTION_SIZE;
    aad[epoch_at..epoch_at + 2].copy_from_slice(&epoch.to_be_bytes());
    aad[epoch_at + 2..].copy_from_slice(nonce);

    aad
}

/// Encrypt `plaintext`, returning ciphertext with the appended tag.
pub fn seal(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt `ciphertext` (tag included), returning the plaintext.
pub fn open(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Encrypt `buffer` in place and return the detached 16-byte tag.
///
/// The caller appends the tag itself, which lets it encrypt the tail
/// of a larger packet without copying.
pub fn seal_in_place_detached(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<[u8; AEAD_TAG_SIZE], CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, buffer)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = [0u8; AEAD_TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}
