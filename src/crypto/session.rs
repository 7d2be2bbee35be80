//! A single epoch's AEAD state.
//!
//! An [`AeadSession`] binds the two directional keys, the sender nonce
//! counter and the receiver replay window to one epoch. Sessions are
//! shared immutably (`Arc`); the counter, the window and the key cell
//! carry their own small locks so no lock is held across I/O.

use std::sync::Mutex;

use zeroize::Zeroize;

use crate::core::{
    AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError, EPOCH_SIZE, INFO_REKEY_C2S, INFO_REKEY_S2C,
    PACKET_HEADER_SIZE, SESSION_KEY_SIZE,
};

use super::aead;
use super::keys::{SessionId, SessionKey};
use super::nonce::{Direction, NonceCounter, sequence};
use super::replay::ReplayWindow;

struct DirectionalKeys {
    send: SessionKey,
    recv: SessionKey,
}

/// Datapath packet layout handled by a session:
///
/// ```text
/// [ epoch (2, BE) | nonce (12) | ciphertext || tag (16) ]
/// ```
pub struct AeadSession {
    session_id: SessionId,
    epoch: u16,
    send_direction: Direction,
    keys: Mutex<DirectionalKeys>,
    nonce: Mutex<NonceCounter>,
    replay: ReplayWindow,
}

impl AeadSession {
    /// Create a session for `epoch`. `send_direction` is the direction
    /// this side transmits in; `send_key`/`recv_key` are keyed
    /// accordingly.
    pub fn new(
        session_id: SessionId,
        epoch: u16,
        send_direction: Direction,
        send_key: SessionKey,
        recv_key: SessionKey,
    ) -> Self {
        Self {
            session_id,
            epoch,
            send_direction,
            keys: Mutex::new(DirectionalKeys {
                send: send_key,
                recv: recv_key,
            }),
            nonce: Mutex::new(NonceCounter::new()),
            replay: ReplayWindow::new(),
        }
    }

    /// The epoch this session serves.
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Encrypt `plaintext` into a full datapath packet.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        let aad = aead::construct_aad(&self.session_id, self.send_direction, self.epoch, &nonce);

        let keys = self.lock_keys();
        let ciphertext = aead::seal(&keys.send, &nonce, &aad, plaintext)?;
        drop(keys);

        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + ciphertext.len());
        packet.extend_from_slice(&self.epoch.to_be_bytes());
        packet.extend_from_slice(&nonce);
        packet.extend_from_slice(&ciphertext);
        Ok(packet)
    }

    /// Encrypt in place. `packet` must hold a 14-byte header region
    /// followed by the plaintext, with spare capacity for the 16-byte
    /// tag; the header is overwritten and the tag appended without
    /// reallocating.
    pub fn seal_in_place(&self, packet: &mut Vec<u8>) -> Result<(), CryptoError> {
        if packet.len() < PACKET_HEADER_SIZE {
            return Err(CryptoError::ShortBuffer {
                needed: PACKET_HEADER_SIZE,
                available: packet.len(),
            });
        }
        if packet.capacity() < packet.len() + AEAD_TAG_SIZE {
            return Err(CryptoError::ShortBuffer {
                needed: packet.len() + AEAD_TAG_SIZE,
                available: packet.capacity(),
            });
        }

        let nonce = self.next_nonce()?;
        let aad = aead::construct_aad(&self.session_id, self.send_direction, self.epoch, &nonce);

        packet[..EPOCH_SIZE].copy_from_slice(&self.epoch.to_be_bytes());
        packet[EPOCH_SIZE..PACKET_HEADER_SIZE].copy_from_slice(&nonce);

        let keys = self.lock_keys();
        let tag = aead::seal_in_place_detached(
            &keys.send,
            &nonce,
            &aad,
            &mut packet[PACKET_HEADER_SIZE..],
        )?;
        drop(keys);

        packet.extend_from_slice(&tag);
        Ok(())
    }

    /// Decrypt a datapath packet with the two-phase replay discipline:
    /// check before open, accept only after open succeeds.
    pub fn open(&self, packet: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (nonce, ciphertext) = Self::split_packet(packet)?;
        let seq = sequence(&nonce);

        self.replay.check(seq)?;
        let plaintext = self.open_ciphertext(&nonce, ciphertext, packet)?;
        self.replay.accept(seq);
        Ok(plaintext)
    }

    /// Decrypt with the single-call replay form.
    ///
    /// Only for transports whose framing already authenticated the
    /// packet boundary; a forged packet would otherwise burn a window
    /// slot before failing to open.
    pub fn open_validated(&self, packet: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (nonce, ciphertext) = Self::split_packet(packet)?;
        self.replay.validate(sequence(&nonce))?;
        self.open_ciphertext(&nonce, ciphertext, packet)
    }

    /// Derive the post-rekey directional keys from an ephemeral X25519
    /// shared secret, chaining each new key off the current key of the
    /// same direction. Returns `(client_to_server, server_to_client)`.
    pub fn rekey_material(
        &self,
        shared_secret: &[u8; 32],
    ) -> Result<(SessionKey, SessionKey), CryptoError> {
        let keys = self.lock_keys();
        let (c2s_current, s2c_current) = match self.send_direction {
            Direction::ClientToServer => (&keys.send, &keys.recv),
            Direction::ServerToClient => (&keys.recv, &keys.send),
        };

        let c2s = expand_rekey_key(c2s_current, shared_secret, INFO_REKEY_C2S)?;
        let s2c = expand_rekey_key(s2c_current, shared_secret, INFO_REKEY_S2C)?;
        Ok((c2s, s2c))
    }

    /// Overwrite both directional keys with zeros. The session keeps
    /// rejecting traffic afterwards (a zero key authenticates
    /// nothing).
    pub fn zeroize(&self) {
        let mut keys = self.lock_keys();
        keys.send.zeroize();
        keys.recv.zeroize();
    }

    fn next_nonce(&self) -> Result<[u8; AEAD_NONCE_SIZE], CryptoError> {
        self.nonce
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next()
    }

    fn open_ciphertext(
        &self,
        nonce: &[u8; AEAD_NONCE_SIZE],
        ciphertext: &[u8],
        packet: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut epoch_bytes = [0u8; EPOCH_SIZE];
        epoch_bytes.copy_from_slice(&packet[..EPOCH_SIZE]);
        let wire_epoch = u16::from_be_bytes(epoch_bytes);

        let aad = aead::construct_aad(
            &self.session_id,
            self.send_direction.opposite(),
            wire_epoch,
            nonce,
        );

        let keys = self.lock_keys();
        aead::open(&keys.recv, nonce, &aad, ciphertext)
    }

    fn split_packet(packet: &[u8]) -> Result<([u8; AEAD_NONCE_SIZE], &[u8]), CryptoError> {
        if packet.len() < PACKET_HEADER_SIZE + AEAD_TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce.copy_from_slice(&packet[EPOCH_SIZE..PACKET_HEADER_SIZE]);
        Ok((nonce, &packet[PACKET_HEADER_SIZE..]))
    }

    fn lock_keys(&self) -> std::sync::MutexGuard<'_, DirectionalKeys> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn expand_rekey_key(
    current: &SessionKey,
    shared_secret: &[u8; 32],
    info: &[u8],
) -> Result<SessionKey, CryptoError> {
    use hkdf::Hkdf;
    use sha2::Sha256;

    let hk = Hkdf::<Sha256>::new(Some(current.as_bytes()), shared_secret);
    let mut okm = [0u8; SESSION_KEY_SIZE];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(SessionKey::from_bytes(okm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PACKET_HEADER_SIZE;

    fn session_pair() -> (AeadSession, AeadSession) {
        let session_id = SessionId::from_bytes([0x5A; 32]);
        let client = AeadSession::new(
            session_id,
            0,
            Direction::ClientToServer,
            SessionKey::from_bytes([0x01; 32]),
            SessionKey::from_bytes([0x02; 32]),
        );
        let server = AeadSession::new(
            session_id,
            0,
            Direction::ServerToClient,
            SessionKey::from_bytes([0x02; 32]),
            SessionKey::from_bytes([0x01; 32]),
        );
        (client, server)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (client, server) = session_pair();

        let packet = client.seal(b"uplink").unwrap();
        assert_eq!(&packet[..2], &[0, 0]);
        assert_eq!(server.open(&packet).unwrap(), b"uplink");

        let reply = server.seal(b"downlink").unwrap();
        assert_eq!(client.open(&reply).unwrap(), b"downlink");
    }

    #[test]
    fn test_replayed_packet_rejected() {
        let (client, server) = session_pair();

        let packet = client.seal(b"once").unwrap();
        assert!(server.open(&packet).is_ok());
        assert!(matches!(
            server.open(&packet),
            Err(CryptoError::ReplayDetected)
        ));
    }

    #[test]
    fn test_forgery_does_not_burn_window_slot() {
        let (client, server) = session_pair();

        let genuine = client.seal(b"payload").unwrap();
        let mut forged = genuine.clone();
        let last = forged.len() - 1;
        forged[last] ^= 0x01;

        // The forgery fails authentication...
        assert!(matches!(
            server.open(&forged),
            Err(CryptoError::AuthenticationFailed)
        ));
        // ...and the genuine packet with the same nonce still opens.
        assert!(server.open(&genuine).is_ok());
    }

    #[test]
    fn test_direction_cannot_reflect() {
        let (client, server) = session_pair();
        let _ = server;

        // A client packet bounced back at the client fails: the AAD
        // direction differs even though key bytes would line up.
        let packet = client.seal(b"echoed").unwrap();
        assert!(client.open(&packet).is_err());
    }

    #[test]
    fn test_seal_in_place_matches_seal() {
        let (client, server) = session_pair();

        let payload = b"in-place payload";
        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len() + AEAD_TAG_SIZE);
        packet.resize(PACKET_HEADER_SIZE, 0);
        packet.extend_from_slice(payload);

        client.seal_in_place(&mut packet).unwrap();
        assert_eq!(packet.len(), PACKET_HEADER_SIZE + payload.len() + AEAD_TAG_SIZE);
        assert_eq!(server.open(&packet).unwrap(), payload);
    }

    #[test]
    fn test_seal_in_place_requires_header_and_capacity() {
        let (client, _) = session_pair();

        let mut short = vec![0u8; PACKET_HEADER_SIZE - 1];
        assert!(matches!(
            client.seal_in_place(&mut short),
            Err(CryptoError::ShortBuffer { .. })
        ));

        let mut tight = vec![0u8; PACKET_HEADER_SIZE + 8];
        tight.shrink_to_fit();
        if tight.capacity() < tight.len() + AEAD_TAG_SIZE {
            assert!(matches!(
                client.seal_in_place(&mut tight),
                Err(CryptoError::ShortBuffer { .. })
            ));
        }
    }

    #[test]
    fn test_open_validated_roundtrip_and_replay() {
        let (client, server) = session_pair();

        let packet = client.seal(b"framed").unwrap();
        assert_eq!(server.open_validated(&packet).unwrap(), b"framed");
        assert!(matches!(
            server.open_validated(&packet),
            Err(CryptoError::ReplayDetected)
        ));
    }

    #[test]
    fn test_zeroized_session_rejects_traffic() {
        let (client, server) = session_pair();

        let packet = client.seal(b"before zeroize").unwrap();
        server.zeroize();
        assert!(server.open(&packet).is_err());
    }

    #[test]
    fn test_rekey_material_agrees_across_sides() {
        let (client, server) = session_pair();
        let shared = [0x77u8; 32];

        let (c2s_a, s2c_a) = client.rekey_material(&shared).unwrap();
        let (c2s_b, s2c_b) = server.rekey_material(&shared).unwrap();

        assert_eq!(c2s_a.as_bytes(), c2s_b.as_bytes());
        assert_eq!(s2c_a.as_bytes(), s2c_b.as_bytes());
        assert_ne!(c2s_a.as_bytes(), s2c_a.as_bytes());
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let (_, server) = session_pair();
        assert!(server.open(&[0u8; PACKET_HEADER_SIZE]).is_err());
        assert!(server.open(b"").is_err());
    }
}
