//! In-band epoch rotation.
//!
//! Either side may initiate: it sends its ephemeral X25519 public key
//! in a RekeyInit service packet, the responder answers with its own
//! in a RekeyAck. The responder installs the new epoch *before* the
//! Ack leaves, and elects it for sending as soon as the Ack is
//! written; the initiator installs on Ack receipt but sends under the
//! new epoch only after the first successful decrypt under it. A lost
//! Ack therefore leaves both sides on the old epoch, and a later
//! rekey simply tries again.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use tracing::debug;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::core::{CryptoError, REKEY_CONFIRM_TIMEOUT, X25519_PUBLIC_KEY_SIZE};

use super::{Crypto, RekeyMaterial};

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyFsm {
    /// No rotation in flight.
    Stable,
    /// A new epoch is installed but not yet elected for sending.
    Pending {
        /// The installed epoch awaiting confirmation.
        epoch: u16,
        /// When the controller stops waiting for confirmation.
        deadline: Instant,
    },
}

struct ControllerState {
    fsm: RekeyFsm,
    /// The initiator's ephemeral secret between Init and Ack.
    outstanding: Option<EphemeralSecret>,
}

/// Orchestrates epoch rotation on an established session.
pub struct RekeyController {
    crypto: Arc<dyn Crypto>,
    confirm_timeout: Duration,
    state: Mutex<ControllerState>,
}

impl RekeyController {
    /// Create a controller driving `crypto`.
    pub fn new(crypto: Arc<dyn Crypto>) -> Self {
        Self::with_confirm_timeout(crypto, REKEY_CONFIRM_TIMEOUT)
    }

    /// Create a controller with a custom confirmation deadline.
    pub fn with_confirm_timeout(crypto: Arc<dyn Crypto>, confirm_timeout: Duration) -> Self {
        Self {
            crypto,
            confirm_timeout,
            state: Mutex::new(ControllerState {
                fsm: RekeyFsm::Stable,
                outstanding: None,
            }),
        }
    }

    /// Current FSM state.
    pub fn fsm(&self) -> RekeyFsm {
        self.lock().fsm
    }

    /// Whether a rotation awaits confirmation.
    pub fn is_pending(&self) -> bool {
        matches!(self.lock().fsm, RekeyFsm::Pending { .. })
    }

    /// Begin a rotation as initiator: generate an ephemeral key and
    /// return its public half for the RekeyInit payload.
    ///
    /// Refuses while a rotation or an unanswered Init is outstanding.
    pub fn initiate(&self) -> Result<[u8; X25519_PUBLIC_KEY_SIZE], CryptoError> {
        let mut state = self.lock();
        self.expire_locked(&mut state, Instant::now());

        if !matches!(state.fsm, RekeyFsm::Stable) || state.outstanding.is_some() {
            return Err(CryptoError::RekeyRefused);
        }

        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&ephemeral);
        state.outstanding = Some(ephemeral);
        Ok(public.to_bytes())
    }

    /// Respond to a peer's RekeyInit: derive and install the new epoch
    /// and return our ephemeral public half for the RekeyAck payload.
    ///
    /// The caller must send the Ack and then call
    /// [`activate_pending`](Self::activate_pending) - installation
    /// strictly precedes the Ack on the wire.
    pub fn handle_init(
        &self,
        peer_public: [u8; X25519_PUBLIC_KEY_SIZE],
    ) -> Result<[u8; X25519_PUBLIC_KEY_SIZE], CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(peer_public));

        let material = self.crypto.derive_rekey_keys(shared.as_bytes())?;
        let epoch = self.start_rekey(material)?;
        debug!(epoch, "installed rekey epoch as responder");
        Ok(public.to_bytes())
    }

    /// Complete a rotation as initiator upon the peer's RekeyAck.
    pub fn handle_ack(
        &self,
        peer_public: [u8; X25519_PUBLIC_KEY_SIZE],
    ) -> Result<u16, CryptoError> {
        let ephemeral = {
            let mut state = self.lock();
            state.outstanding.take().ok_or(CryptoError::RekeyRefused)?
        };
        let shared = ephemeral.diffie_hellman(&PublicKey::from(peer_public));

        let material = self.crypto.derive_rekey_keys(shared.as_bytes())?;
        let epoch = self.start_rekey(material)?;
        debug!(epoch, "installed rekey epoch as initiator");
        Ok(epoch)
    }

    /// Install a new epoch and enter `Pending` with a fresh deadline.
    pub fn start_rekey(&self, material: RekeyMaterial) -> Result<u16, CryptoError> {
        let epoch = self.crypto.rekey(material)?;
        let mut state = self.lock();
        state.fsm = RekeyFsm::Pending {
            epoch,
            deadline: Instant::now() + self.confirm_timeout,
        };
        Ok(epoch)
    }

    /// Confirm `epoch`: when it matches the pending one, switch the
    /// outbound epoch and return to `Stable`. Other epochs leave the
    /// state untouched.
    pub fn activate_send_epoch(&self, epoch: u16) {
        let mut state = self.lock();
        if let RekeyFsm::Pending { epoch: pending, .. } = state.fsm {
            if pending == epoch {
                self.crypto.set_send_epoch(epoch);
                state.fsm = RekeyFsm::Stable;
            }
        }
    }

    /// Elect the pending epoch unconditionally. Used by the responder
    /// once its RekeyAck is on the wire.
    pub fn activate_pending(&self) {
        let mut state = self.lock();
        if let RekeyFsm::Pending { epoch, .. } = state.fsm {
            self.crypto.set_send_epoch(epoch);
            state.fsm = RekeyFsm::Stable;
        }
    }

    /// Feed the epoch of every successfully decrypted packet. Expires
    /// stale rotations, then confirms a matching pending epoch.
    pub fn observe_recv_epoch(&self, epoch: u16) {
        self.abort_pending_if_expired(Instant::now());
        self.activate_send_epoch(epoch);
    }

    /// Abandon a pending rotation whose deadline passed. The installed
    /// epoch stays in the ring but is not elected for sending. Returns
    /// whether an abort happened.
    pub fn abort_pending_if_expired(&self, now: Instant) -> bool {
        let mut state = self.lock();
        self.expire_locked(&mut state, now)
    }

    fn expire_locked(&self, state: &mut ControllerState, now: Instant) -> bool {
        if let RekeyFsm::Pending { epoch, deadline } = state.fsm {
            if now >= deadline {
                debug!(epoch, "rekey confirmation deadline passed");
                state.fsm = RekeyFsm::Stable;
                state.outstanding = None;
                return true;
            }
        }
        false
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
