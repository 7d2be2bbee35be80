//! Key material and the handshake key schedule.
//!
//! Session keys are single-owner: the type zeroizes on drop and does
//! not implement `Clone`, so every copy of key material is accounted
//! for. The long-term identity is an Ed25519 pair persisted as
//! seed || public (64 bytes).

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{
    CryptoError, ED25519_KEYPAIR_SIZE, ED25519_PUBLIC_KEY_SIZE, HANDSHAKE_NONCE_SIZE,
    INFO_CLIENT_TO_SERVER, INFO_SERVER_TO_CLIENT, INFO_SESSION_ID, SESSION_ID_SIZE,
    SESSION_KEY_SIZE, SIGNATURE_SIZE,
};

/// A 32-byte AEAD session key.
///
/// Zeroized on drop. Not `Clone`: key material moves, it is never
/// duplicated.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Create a session key from raw bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes.
    ///
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

/// The 32-byte session identifier derived alongside the AEAD keys.
///
/// Not secret by itself (it authenticates packets as associated data)
/// but zeroized together with the rest of the session state.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }

    /// Overwrite the identifier with zeros.
    pub fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Long-term Ed25519 identity.
#[derive(Clone)]
pub struct Identity {
    signing: ed25519_dalek::SigningKey,
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    /// Load an identity from its persisted seed || public form.
    pub fn from_keypair_bytes(bytes: &[u8; ED25519_KEYPAIR_SIZE]) -> Result<Self, CryptoError> {
        let signing = ed25519_dalek::SigningKey::from_keypair_bytes(bytes)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(Self { signing })
    }

    /// Persist as seed || public (64 bytes).
    pub fn to_keypair_bytes(&self) -> [u8; ED25519_KEYPAIR_SIZE] {
        self.signing.to_keypair_bytes()
    }

    /// The 32-byte public half.
    pub fn public_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        use ed25519_dalek::Signer;
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity(")?;
        for byte in &self.public_bytes()[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Verify an Ed25519 signature against a raw public key.
pub fn verify_signature(
    public: &[u8; ED25519_PUBLIC_KEY_SIZE],
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> bool {
    use ed25519_dalek::Verifier;
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(public) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &signature).is_ok()
}

/// Everything the handshake derives: the two directional AEAD keys and
/// the session identifier.
pub struct SessionSecrets {
    /// Key for client -> server packets.
    pub client_to_server: SessionKey,
    /// Key for server -> client packets.
    pub server_to_client: SessionKey,
    /// Session identifier, bound into every packet's AAD.
    pub session_id: SessionId,
}

/// Run the handshake key schedule.
///
/// `salt = SHA256(server_nonce || client_nonce)`; the two directional
/// keys and the session identifier are independent HKDF-SHA256 outputs
/// over the X25519 shared secret, distinguished by info string. Both
/// sides derive identical secrets.
pub fn derive_session_secrets(
    shared_secret: &[u8; 32],
    server_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
    client_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
) -> Result<SessionSecrets, CryptoError> {
    let mut salt_input = Sha256::new();
    salt_input.update(server_nonce);
    salt_input.update(client_nonce);
    let salt = salt_input.finalize();

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut c2s = [0u8; SESSION_KEY_SIZE];
    hk.expand(INFO_CLIENT_TO_SERVER, &mut c2s)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut s2c = [0u8; SESSION_KEY_SIZE];
    hk.expand(INFO_SERVER_TO_CLIENT, &mut s2c)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut session_id = [0u8; SESSION_ID_SIZE];
    hk.expand(INFO_SESSION_ID, &mut session_id)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    Ok(SessionSecrets {
        client_to_server: SessionKey::from_bytes(c2s),
        server_to_client: SessionKey::from_bytes(s2c),
        session_id: SessionId::from_bytes(session_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let identity = Identity::generate();
        let bytes = identity.to_keypair_bytes();

        let restored = Identity::from_keypair_bytes(&bytes).unwrap();
        assert_eq!(identity.public_bytes(), restored.public_bytes());
    }

    #[test]
    fn test_identity_rejects_mismatched_halves() {
        let a = Identity::generate();
        let b = Identity::generate();

        let mut bytes = a.to_keypair_bytes();
        bytes[32..].copy_from_slice(&b.public_bytes());

        assert!(Identity::from_keypair_bytes(&bytes).is_err());
    }

    #[test]
    fn test_sign_verify() {
        let identity = Identity::generate();
        let message = b"attested transcript";

        let signature = identity.sign(message);
        assert!(verify_signature(&identity.public_bytes(), message, &signature));
        assert!(!verify_signature(
            &identity.public_bytes(),
            b"other message",
            &signature
        ));

        let other = Identity::generate();
        assert!(!verify_signature(&other.public_bytes(), message, &signature));
    }

    #[test]
    fn test_key_schedule_deterministic() {
        let shared = [0x11u8; 32];
        let server_nonce = [0x22u8; 32];
        let client_nonce = [0x33u8; 32];

        let a = derive_session_secrets(&shared, &server_nonce, &client_nonce).unwrap();
        let b = derive_session_secrets(&shared, &server_nonce, &client_nonce).unwrap();

        assert_eq!(a.client_to_server.as_bytes(), b.client_to_server.as_bytes());
        assert_eq!(a.server_to_client.as_bytes(), b.server_to_client.as_bytes());
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn test_key_schedule_directions_differ() {
        let secrets = derive_session_secrets(&[0x11; 32], &[0x22; 32], &[0x33; 32]).unwrap();
        assert_ne!(
            secrets.client_to_server.as_bytes(),
            secrets.server_to_client.as_bytes()
        );
    }

    #[test]
    fn test_key_schedule_nonce_order_matters() {
        let a = derive_session_secrets(&[0x11; 32], &[0x22; 32], &[0x33; 32]).unwrap();
        let b = derive_session_secrets(&[0x11; 32], &[0x33; 32], &[0x22; 32]).unwrap();
        assert_ne!(a.session_id, b.session_id);
    }
}
