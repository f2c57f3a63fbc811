//! Reads and key-level operations for KvEngine.
//!
//! Handles: get, get_multi, get_and_touch, get_and_lock, unlock, touch, remove

use super::state::{live, resolve_expiry, KeyState, Stored};
use super::{check_cas, not_found, KvEngine};
use crate::clock::Timestamp;
use crate::document::{validate_key, Document};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

impl KvEngine {
    /// Current document, or `None` when absent or expired.
    ///
    /// Locks do not affect reads; a locked document reports its stored cas.
    pub fn get(&self, key: &str) -> Result<Option<Document>> {
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();
        Ok(live(&mut shard, key, now).map(|state| state.value().to_document(key)))
    }

    /// Fetch several keys. Missing keys are left out of the result.
    pub fn get_multi<S: AsRef<str>>(&self, keys: &[S]) -> Result<HashMap<String, Document>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.get(key.as_ref())? {
                found.insert(doc.id().to_string(), doc);
            }
        }
        // Postcondition: never more documents than keys asked for
        debug_assert!(
            found.len() <= keys.len(),
            "Postcondition violated: get_multi returned {} documents for {} keys",
            found.len(),
            keys.len()
        );
        Ok(found)
    }

    /// Read the document and reset its expiry in one step.
    pub fn get_and_touch(&self, key: &str, expiry: u32) -> Result<Document> {
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();

        let state = live(&mut shard, key, now).ok_or_else(|| not_found(key))?;
        let value = retouch(key, state, expiry, self.next_cas(), now)?;
        let doc = self.commit(&mut shard, key, value);
        debug!(key, expiry, cas = doc.cas(), "get_and_touch");
        Ok(doc)
    }

    /// Reset expiry without changing content.
    pub fn touch(&self, key: &str, expiry: u32) -> Result<bool> {
        self.get_and_touch(key, expiry).map(|_| true)
    }

    /// Read the document and take its lock for `lock_time` seconds.
    ///
    /// The returned document carries the lock cas, which is the only cas
    /// that can write or unlock the key until the lease runs out.
    pub fn get_and_lock(&self, key: &str, lock_time: u32) -> Result<Document> {
        validate_key(key)?;
        let lease = self.lease_duration(lock_time);
        let mut shard = self.shard(key);
        let now = self.now();

        let state = live(&mut shard, key, now).ok_or_else(|| not_found(key))?;
        if state.is_locked() {
            return Err(Error::Locked {
                key: key.to_string(),
            });
        }

        let lock_cas = self.next_cas();
        let value = state.value().clone();
        let doc = value.to_document(key).with_cas(lock_cas);
        let lock_deadline = now + lease;
        *state = KeyState::Locked {
            value,
            lock_cas,
            lock_deadline,
        };

        // Postcondition: the lease lies in the future and its cas guards the stored version
        debug_assert!(
            lock_deadline > now,
            "Postcondition violated: lease on '{}' must end after now",
            key
        );
        state.verify_invariants(key);
        debug!(key, lease_ms = lease.as_millis() as u64, "get_and_lock");
        Ok(doc)
    }

    /// Release a lock early. The document keeps the cas it had before locking.
    pub fn unlock(&self, key: &str, cas: u64) -> Result<bool> {
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();

        let state = live(&mut shard, key, now).ok_or_else(|| not_found(key))?;
        match state.lock_cas() {
            Some(lock_cas) if lock_cas == cas => {
                state.unlock();
                debug_assert!(
                    !state.is_locked(),
                    "Postcondition violated: '{}' still locked after unlock",
                    key
                );
                debug!(key, "unlock");
                Ok(true)
            }
            _ => Err(Error::CasMismatch {
                key: key.to_string(),
                requested: cas,
                observed: state.value().cas,
            }),
        }
    }

    /// Delete the document. The returned document carries the removal's cas.
    pub fn remove(&self, doc: &Document) -> Result<Document> {
        let key = doc.id();
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();

        let state = live(&mut shard, key, now).ok_or_else(|| not_found(key))?;
        check_cas(key, state, doc.cas())?;
        let cas = self.commit_delete(&mut shard, key);
        debug!(key, cas, "remove");
        Ok(Document::new(key, Bytes::new()).with_cas(cas))
    }
}

fn retouch(
    key: &str,
    state: &KeyState,
    expiry: u32,
    cas: u64,
    now: Timestamp,
) -> Result<Stored> {
    if state.is_locked() {
        return Err(Error::Locked {
            key: key.to_string(),
        });
    }
    let current = state.value();
    Ok(Stored {
        content: current.content.clone(),
        cas,
        expiry,
        expires_at: resolve_expiry(expiry, now),
    })
}
