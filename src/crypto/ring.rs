//! Bounded ordered collection of epoch sessions.
//!
//! Holds at most `capacity` `(epoch, session)` pairs in insertion
//! order. Insertion at capacity evicts the oldest entry; the caller is
//! responsible for never inserting when the oldest entry is still the
//! active send epoch (the rekey path refuses instead). Key material of
//! evicted entries is zeroized before release.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::EPOCH_RING_CAPACITY;

use super::session::AeadSession;

/// Ordered epoch -> session map with bounded capacity.
pub struct EpochRing {
    capacity: usize,
    entries: VecDeque<Arc<AeadSession>>,
}

impl EpochRing {
    /// Create a ring with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(EPOCH_RING_CAPACITY)
    }

    /// Create a ring holding at most `capacity` epochs (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a session, evicting the oldest entry at capacity.
    ///
    /// An existing session with the same epoch is replaced. Returns
    /// the epoch of the evicted entry, if any; its keys are zeroized
    /// before release.
    pub fn insert(&mut self, session: Arc<AeadSession>) -> Option<u16> {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|s| s.epoch() == session.epoch())
        {
            if let Some(old) = self.entries.remove(pos) {
                old.zeroize();
            }
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some(old) = self.entries.pop_front() {
                old.zeroize();
                evicted = Some(old.epoch());
            }
        }

        self.entries.push_back(session);
        evicted
    }

    /// Look up a session by epoch.
    pub fn resolve(&self, epoch: u16) -> Option<Arc<AeadSession>> {
        self.entries
            .iter()
            .find(|s| s.epoch() == epoch)
            .map(Arc::clone)
    }

    /// The most recently inserted session.
    pub fn resolve_current(&self) -> Option<Arc<AeadSession>> {
        self.entries.back().map(Arc::clone)
    }

    /// The oldest epoch still held.
    pub fn oldest(&self) -> Option<u16> {
        self.entries.front().map(|s| s.epoch())
    }

    /// The most recently inserted epoch.
    pub fn newest(&self) -> Option<u16> {
        self.entries.back().map(|s| s.epoch())
    }

    /// Remove the session for `epoch`. Returns whether it was present;
    /// its keys are zeroized before release.
    pub fn remove(&mut self, epoch: u16) -> bool {
        if let Some(pos) = self.entries.iter().position(|s| s.epoch() == epoch) {
            if let Some(old) = self.entries.remove(pos) {
                old.zeroize();
            }
            true
        } else {
            false
        }
    }

    /// Number of epochs held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the next insertion would evict.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Overwrite every session's key material with zeros and empty the
    /// ring.
    pub fn zeroize_all(&mut self) {
        for session in &self.entries {
            session.zeroize();
        }
        self.entries.clear();
    }
}

impl Default for EpochRing {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EpochRing {
    fn drop(&mut self) {
        self.zeroize_all();
    }
}
