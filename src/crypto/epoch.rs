//! The UDP datapath crypto: epoch resolution over a bounded ring.
//!
//! [`EpochUdpCrypto`] implements the [`Crypto`] capability. Outbound
//! packets carry the elected send epoch as a 2-byte big-endian prefix;
//! inbound packets are routed to the epoch named in their header, so
//! traffic under superseded epochs keeps decrypting until the ring
//! evicts them.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::core::{CryptoError, EPOCH_SIZE};

use super::keys::{SessionId, SessionSecrets};
use super::nonce::Direction;
use super::ring::EpochRing;
use super::session::AeadSession;
use super::{Crypto, Decrypted, RekeyMaterial};

/// Epoch-aware AEAD for one UDP session.
pub struct EpochUdpCrypto {
    session_id: Mutex<SessionId>,
    send_direction: Direction,
    ring: Mutex<EpochRing>,
    send_epoch: AtomicU16,
    /// Serializes rekeys so two concurrent installations cannot both
    /// pass the eviction check.
    rekey_lock: Mutex<()>,
}

impl EpochUdpCrypto {
    /// Build the epoch-0 crypto from freshly derived handshake
    /// secrets. `send_direction` is the direction this side transmits
    /// in.
    pub fn new(secrets: SessionSecrets, send_direction: Direction) -> Self {
        let SessionSecrets {
            client_to_server,
            server_to_client,
            session_id,
        } = secrets;

        let (send_key, recv_key) = match send_direction {
            Direction::ClientToServer => (client_to_server, server_to_client),
            Direction::ServerToClient => (server_to_client, client_to_server),
        };

        let mut ring = EpochRing::new();
        ring.insert(std::sync::Arc::new(AeadSession::new(
            session_id,
            0,
            send_direction,
            send_key,
            recv_key,
        )));

        Self {
            session_id: Mutex::new(session_id),
            send_direction,
            ring: Mutex::new(ring),
            send_epoch: AtomicU16::new(0),
            rekey_lock: Mutex::new(()),
        }
    }

    /// The direction this side transmits in.
    pub fn direction(&self) -> Direction {
        self.send_direction
    }

    /// Number of epochs currently held.
    pub fn epoch_count(&self) -> usize {
        self.lock_ring().len()
    }

    fn send_session(&self) -> Result<std::sync::Arc<AeadSession>, CryptoError> {
        let epoch = self.send_epoch.load(Ordering::Acquire);
        let ring = self.lock_ring();
        ring.resolve(epoch)
            .or_else(|| ring.resolve_current())
            .ok_or(CryptoError::UnknownEpoch(epoch))
    }

    fn lock_ring(&self) -> std::sync::MutexGuard<'_, EpochRing> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Crypto for EpochUdpCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.send_session()?.seal(plaintext)
    }

    fn encrypt_in_place(&self, packet: &mut Vec<u8>) -> Result<(), CryptoError> {
        self.send_session()?.seal_in_place(packet)
    }

    fn decrypt(&self, packet: &[u8]) -> Result<Decrypted, CryptoError> {
        if packet.len() < EPOCH_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }
        let epoch = u16::from_be_bytes([packet[0], packet[1]]);

        let session = self
            .lock_ring()
            .resolve(epoch)
            .ok_or(CryptoError::UnknownEpoch(epoch))?;

        let payload = session.open(packet)?;
        Ok(Decrypted { epoch, payload })
    }

    fn rekey(&self, material: RekeyMaterial) -> Result<u16, CryptoError> {
        let _serialized = self.rekey_lock.lock().unwrap_or_else(|e| e.into_inner());

        let session_id = *self.session_id.lock().unwrap_or_else(|e| e.into_inner());
        let mut ring = self.lock_ring();

        let newest = ring.newest().ok_or(CryptoError::RekeyRefused)?;
        let next = newest.checked_add(1).ok_or(CryptoError::EpochExhausted)?;

        // Never evict the epoch we still transmit on; the refusal
        // stays generic.
        if ring.is_full() && ring.oldest() == Some(self.send_epoch.load(Ordering::Acquire)) {
            return Err(CryptoError::RekeyRefused);
        }

        let (send_key, recv_key) = match self.send_direction {
            Direction::ClientToServer => (material.client_to_server, material.server_to_client),
            Direction::ServerToClient => (material.server_to_client, material.client_to_server),
        };

        ring.insert(std::sync::Arc::new(AeadSession::new(
            session_id,
            next,
            self.send_direction,
            send_key,
            recv_key,
        )));
        Ok(next)
    }

    fn derive_rekey_keys(&self, shared_secret: &[u8; 32]) -> Result<RekeyMaterial, CryptoError> {
        let current = self.send_session()?;
        let (client_to_server, server_to_client) = current.rekey_material(shared_secret)?;
        Ok(RekeyMaterial {
            client_to_server,
            server_to_client,
        })
    }

    fn send_epoch(&self) -> u16 {
        self.send_epoch.load(Ordering::Acquire)
    }

    fn set_send_epoch(&self, epoch: u16) {
        self.send_epoch.store(epoch, Ordering::Release);
    }

    fn remove_epoch(&self, epoch: u16) -> Result<(), CryptoError> {
        let mut ring = self.lock_ring();
        if epoch == self.send_epoch.load(Ordering::Acquire) || ring.len() <= 1 {
            return Err(CryptoError::RekeyRefused);
        }
        if ring.remove(epoch) {
            Ok(())
        } else {
            Err(CryptoError::UnknownEpoch(epoch))
        }
    }

    fn zeroize(&self) {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .zeroize();
        self.lock_ring().zeroize_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EPOCH_RING_CAPACITY, SESSION_KEY_SIZE};
    use crate::crypto::keys::{SessionKey, derive_session_secrets};

    fn secrets() -> SessionSecrets {
        derive_session_secrets(&[0x44; 32], &[0x55; 32], &[0x66; 32]).unwrap()
    }

    fn crypto_pair() -> (EpochUdpCrypto, EpochUdpCrypto) {
        (
            EpochUdpCrypto::new(secrets(), Direction::ClientToServer),
            EpochUdpCrypto::new(secrets(), Direction::ServerToClient),
        )
    }

    fn material(tag: u8) -> RekeyMaterial {
        RekeyMaterial {
            client_to_server: SessionKey::from_bytes([tag; SESSION_KEY_SIZE]),
            server_to_client: SessionKey::from_bytes([tag ^ 0xFF; SESSION_KEY_SIZE]),
        }
    }

    #[test]
    fn test_epoch_zero_roundtrip() {
        let (client, server) = crypto_pair();

        let packet = client.encrypt(b"first datagram").unwrap();
        assert_eq!(&packet[..2], &[0, 0]);

        let decrypted = server.decrypt(&packet).unwrap();
        assert_eq!(decrypted.epoch, 0);
        assert_eq!(decrypted.payload, b"first datagram");
    }

    #[test]
    fn test_unknown_epoch() {
        let (client, server) = crypto_pair();

        let mut packet = client.encrypt(b"x").unwrap();
        packet[0] = 0x00;
        packet[1] = 0x09;

        assert!(matches!(
            server.decrypt(&packet),
            Err(CryptoError::UnknownEpoch(9))
        ));
    }

    #[test]
    fn test_rekey_switches_and_old_epoch_still_decrypts() {
        let (client, server) = crypto_pair();
        let shared = [0x10u8; 32];

        let old_packet = client.encrypt(b"under epoch 0").unwrap();

        let client_epoch = client.rekey(client.derive_rekey_keys(&shared).unwrap()).unwrap();
        let server_epoch = server.rekey(server.derive_rekey_keys(&shared).unwrap()).unwrap();
        assert_eq!(client_epoch, 1);
        assert_eq!(server_epoch, 1);

        client.set_send_epoch(1);
        let new_packet = client.encrypt(b"under epoch 1").unwrap();
        assert_eq!(&new_packet[..2], &[0, 1]);

        assert_eq!(server.decrypt(&new_packet).unwrap().payload, b"under epoch 1");
        // Packets under the superseded epoch keep decrypting.
        assert_eq!(server.decrypt(&old_packet).unwrap().payload, b"under epoch 0");
    }

    #[test]
    fn test_rekey_refused_when_send_epoch_would_evict() {
        let (client, _) = crypto_pair();

        // Fill the ring: epochs 0..=capacity-1, still sending on 0.
        for i in 0..(EPOCH_RING_CAPACITY - 1) {
            client.rekey(material(i as u8 + 1)).unwrap();
        }
        assert_eq!(client.epoch_count(), EPOCH_RING_CAPACITY);

        let refused = client.rekey(material(0x77));
        assert!(matches!(refused, Err(CryptoError::RekeyRefused)));
        assert_eq!(client.send_epoch(), 0);
        assert_eq!(client.epoch_count(), EPOCH_RING_CAPACITY);
    }

    #[test]
    fn test_rekey_evicts_once_send_epoch_moves() {
        let (client, _) = crypto_pair();

        for i in 0..(EPOCH_RING_CAPACITY - 1) {
            client.rekey(material(i as u8 + 1)).unwrap();
        }
        client.set_send_epoch(1);

        let epoch = client.rekey(material(0x77)).unwrap();
        assert_eq!(epoch as usize, EPOCH_RING_CAPACITY);
        assert_eq!(client.epoch_count(), EPOCH_RING_CAPACITY);
    }

    #[test]
    fn test_encrypt_falls_back_to_current_epoch() {
        let (client, server) = crypto_pair();
        let _ = server;

        // Elect an epoch that is not in the ring; encrypt falls back
        // to the most recent one instead of failing.
        client.set_send_epoch(7);
        let packet = client.encrypt(b"fallback").unwrap();
        assert_eq!(&packet[..2], &[0, 0]);
    }

    #[test]
    fn test_remove_epoch_guards() {
        let (client, _) = crypto_pair();

        // Last remaining epoch cannot be removed.
        assert!(matches!(
            client.remove_epoch(0),
            Err(CryptoError::RekeyRefused)
        ));

        client.rekey(material(1)).unwrap();
        client.set_send_epoch(1);

        // Active send epoch cannot be removed.
        assert!(matches!(
            client.remove_epoch(1),
            Err(CryptoError::RekeyRefused)
        ));
        // A superseded epoch can.
        assert!(client.remove_epoch(0).is_ok());
        assert!(matches!(
            client.remove_epoch(0),
            Err(CryptoError::RekeyRefused)
        ));
    }

    #[test]
    fn test_zeroize_makes_instance_unusable() {
        let (client, server) = crypto_pair();

        let packet = client.encrypt(b"payload").unwrap();
        server.zeroize();

        assert!(server.decrypt(&packet).is_err());
        assert!(server.encrypt(b"payload").is_err());
    }

    #[test]
    fn test_epoch_exhaustion() {
        let (client, _) = crypto_pair();

        // Force the newest epoch to the end of the 16-bit space.
        client.set_send_epoch(2);
        {
            let mut ring = client.lock_ring();
            ring.insert(std::sync::Arc::new(AeadSession::new(
                SessionId::from_bytes([0; 32]),
                u16::MAX,
                Direction::ClientToServer,
                SessionKey::from_bytes([1; 32]),
                SessionKey::from_bytes([2; 32]),
            )));
        }

        assert!(matches!(
            client.rekey(material(0x01)),
            Err(CryptoError::EpochExhausted)
        ));
    }
}
