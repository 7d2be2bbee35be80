//! Sliding-window anti-replay protection.
//!
//! A 64-bit bitmap over the most recent sequence numbers plus the
//! highest sequence seen. The API is two-phase: `check` before AEAD
//! open, `accept` only after open succeeds, so a replayed or forged
//! ciphertext that fails authentication never poisons the window. The
//! combined `validate` exists for framed transports where the framing
//! layer already authenticated the boundary.

use std::sync::Mutex;

use crate::core::{CryptoError, REPLAY_WINDOW_SIZE};

struct WindowState {
    /// Highest sequence accepted so far. Bit `i` of `bitmap` records
    /// `highest - i`.
    highest: u64,
    bitmap: u64,
}

/// Per-epoch receive window. Internally synchronized; concurrent
/// check/accept for the same receiver serialize on one lock.
pub struct ReplayWindow {
    state: Mutex<WindowState>,
}

impl ReplayWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WindowState {
                highest: 0,
                bitmap: 0,
            }),
        }
    }

    /// Check whether `seq` would be accepted, without recording it.
    pub fn check(&self, seq: u64) -> Result<(), CryptoError> {
        let state = self.lock();
        Self::check_inner(&state, seq)
    }

    /// Record `seq` as accepted. Call only after the packet
    /// authenticated.
    pub fn accept(&self, seq: u64) {
        let mut state = self.lock();
        Self::accept_inner(&mut state, seq);
    }

    /// Combined check-and-accept under a single lock acquisition.
    pub fn validate(&self, seq: u64) -> Result<(), CryptoError> {
        let mut state = self.lock();
        Self::check_inner(&state, seq)?;
        Self::accept_inner(&mut state, seq);
        Ok(())
    }

    fn check_inner(state: &WindowState, seq: u64) -> Result<(), CryptoError> {
        if seq > state.highest {
            return Ok(());
        }
        let offset = state.highest - seq;
        if offset >= REPLAY_WINDOW_SIZE {
            return Err(CryptoError::ReplayDetected);
        }
        if state.bitmap & (1u64 << offset) != 0 {
            return Err(CryptoError::ReplayDetected);
        }
        Ok(())
    }

    fn accept_inner(state: &mut WindowState, seq: u64) {
        if seq > state.highest {
            let shift = seq - state.highest;
            state.bitmap = if shift >= REPLAY_WINDOW_SIZE {
                0
            } else {
                state.bitmap << shift
            };
            state.bitmap |= 1;
            state.highest = seq;
        } else {
            let offset = state.highest - seq;
            if offset < REPLAY_WINDOW_SIZE {
                state.bitmap |= 1u64 << offset;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}
