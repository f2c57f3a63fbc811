//! Per-key state.
//!
//! A key is either absent (no map entry), present, or present and locked.
//! Expired documents and expired leases are resolved lazily by `live()`.

use crate::clock::Timestamp;
use crate::document::{Document, RELATIVE_EXPIRY_LIMIT};
use ahash::AHashMap;
use bytes::Bytes;
use std::time::Duration;

pub(crate) type Shard = AHashMap<String, KeyState>;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Stored {
    pub content: Bytes,
    pub cas: u64,
    /// Expiry as the caller supplied it
    pub expiry: u32,
    pub expires_at: Option<Timestamp>,
}

impl Stored {
    pub fn new(content: Bytes, cas: u64, expiry: u32, now: Timestamp) -> Self {
        Stored {
            content,
            cas,
            expiry,
            expires_at: resolve_expiry(expiry, now),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn to_document(&self, key: &str) -> Document {
        Document::new(key, self.content.clone())
            .with_cas(self.cas)
            .with_expiry(self.expiry)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KeyState {
    Present(Stored),
    Locked {
        value: Stored,
        lock_cas: u64,
        lock_deadline: Timestamp,
    },
}

impl KeyState {
    pub fn value(&self) -> &Stored {
        match self {
            KeyState::Present(value) | KeyState::Locked { value, .. } => value,
        }
    }

    pub fn lock_cas(&self) -> Option<u64> {
        match self {
            KeyState::Locked { lock_cas, .. } => Some(*lock_cas),
            KeyState::Present(_) => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, KeyState::Locked { .. })
    }

    /// The cas a conditional write must present to succeed.
    pub fn effective_cas(&self) -> u64 {
        self.lock_cas().unwrap_or(self.value().cas)
    }

    /// Drop the lease, keeping the stored value and its original cas.
    pub fn unlock(&mut self) {
        if let KeyState::Locked { value, .. } = self {
            let value = std::mem::take(value);
            *self = KeyState::Present(value);
        }
    }

    /// Check the per-key invariants that hold for any stored state.
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self, key: &str) {
        let value = self.value();

        // Invariant 1: every stored version carries a real cas
        debug_assert!(value.cas > 0, "Invariant violated: '{}' stored with cas 0", key);

        // Invariant 2: a lock cas is newer than the version it guards
        if let KeyState::Locked { lock_cas, .. } = self {
            debug_assert!(
                *lock_cas > value.cas,
                "Invariant violated: lock cas {} on '{}' must exceed stored cas {}",
                lock_cas,
                key,
                value.cas
            );
        }

        // Invariant 3: expiry 0 never resolves to a deadline
        if value.expiry == 0 {
            debug_assert!(
                value.expires_at.is_none(),
                "Invariant violated: '{}' has no expiry but a deadline",
                key
            );
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn verify_invariants(&self, _key: &str) {}

    pub fn release_expired_lease(&mut self, now: Timestamp) -> bool {
        let expired = matches!(self, KeyState::Locked { lock_deadline, .. } if now >= *lock_deadline);
        if expired {
            self.unlock();
        }
        expired
    }
}

/// Map a caller expiry onto an absolute deadline.
///
/// 0 never expires, up to 30 days is relative seconds, anything larger is a
/// unix timestamp in seconds.
pub(crate) fn resolve_expiry(expiry: u32, now: Timestamp) -> Option<Timestamp> {
    match expiry {
        0 => None,
        secs if secs <= RELATIVE_EXPIRY_LIMIT => Some(now + Duration::from_secs(secs as u64)),
        secs => Some(Timestamp::from_unix_secs(secs as u64)),
    }
}

/// Check every key in a freshly swept shard: per-key invariants hold and
/// nothing expired survived the sweep.
#[cfg(debug_assertions)]
pub(crate) fn verify_shard(shard: &Shard, now: Timestamp) {
    for (key, state) in shard {
        state.verify_invariants(key);
        debug_assert!(
            !state.value().is_expired(now),
            "Invariant violated: expired '{}' survived a sweep",
            key
        );
        if let KeyState::Locked { lock_deadline, .. } = state {
            debug_assert!(
                now < *lock_deadline,
                "Invariant violated: expired lease on '{}' survived a sweep",
                key
            );
        }
    }
}

/// Resolve a key to its live state, reclaiming an expired document or lease.
pub(crate) fn live<'a>(shard: &'a mut Shard, key: &str, now: Timestamp) -> Option<&'a mut KeyState> {
    let expired = match shard.get_mut(key) {
        None => return None,
        Some(state) => {
            state.release_expired_lease(now);
            state.value().is_expired(now)
        }
    };
    if expired {
        shard.remove(key);
        return None;
    }
    let state = shard.get_mut(key)?;
    state.verify_invariants(key);
    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Timestamp = Timestamp(1_700_000_000_000);

    #[test]
    fn test_resolve_expiry() {
        assert_eq!(resolve_expiry(0, NOW), None);
        assert_eq!(resolve_expiry(10, NOW), Some(Timestamp(NOW.0 + 10_000)));
        assert_eq!(
            resolve_expiry(RELATIVE_EXPIRY_LIMIT, NOW),
            Some(NOW + Duration::from_secs(RELATIVE_EXPIRY_LIMIT as u64))
        );
        // past absolute time
        assert_eq!(
            resolve_expiry(RELATIVE_EXPIRY_LIMIT + 1, NOW),
            Some(Timestamp::from_unix_secs(RELATIVE_EXPIRY_LIMIT as u64 + 1))
        );
    }

    #[test]
    fn test_unlock_restores_present() {
        let value = Stored::new(Bytes::from_static(b"v"), 3, 0, NOW);
        let mut state = KeyState::Locked {
            value: value.clone(),
            lock_cas: 9,
            lock_deadline: NOW + Duration::from_secs(1),
        };
        assert_eq!(state.effective_cas(), 9);

        assert!(!state.release_expired_lease(NOW));
        assert!(state.release_expired_lease(NOW + Duration::from_secs(1)));
        assert_eq!(state, KeyState::Present(value));
        assert_eq!(state.effective_cas(), 3);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock cas")]
    fn test_lock_older_than_value_is_rejected() {
        let state = KeyState::Locked {
            value: Stored::new(Bytes::from_static(b"v"), 9, 0, NOW),
            lock_cas: 3,
            lock_deadline: NOW + Duration::from_secs(1),
        };
        state.verify_invariants("k");
    }

    #[test]
    fn test_live_reclaims_expired() {
        let mut shard = Shard::new();
        shard.insert(
            "k".to_string(),
            KeyState::Present(Stored::new(Bytes::new(), 1, 5, NOW)),
        );

        assert!(live(&mut shard, "k", NOW).is_some());
        assert!(live(&mut shard, "k", NOW + Duration::from_secs(5)).is_none());
        assert!(shard.is_empty());
    }
}
