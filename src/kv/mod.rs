//! Key-value engine.
//!
//! The `KvEngine` owns one keyspace's documents and implements every
//! per-key operation with cas semantics. The implementation is split across
//! multiple files:
//!
//! - `mod.rs` (this file): core struct, sharding, cas generation, mutation publishing
//! - `state.rs`: per-key state (present / locked) and expiry resolution
//! - `string_ops.rs`: content writes (insert, upsert, replace, append, prepend, counter)
//! - `key_ops.rs`: reads and key-level operations (get, lock, unlock, touch, remove)
//! - `sweeper.rs`: background reclamation of expired documents and leases
//! - `dst.rs`: seeded simulation harness checking the engine against a shadow model
//!
//! Keys hash onto 16 shards, each behind its own mutex. A check-and-set runs
//! entirely under its shard's lock, so two writers presenting the same cas can
//! never both succeed, while operations on other shards proceed in parallel.
//! Mutations are published to the replication stream before the lock is
//! released, which keeps every key's stream in commit order.

pub mod dst;
mod key_ops;
pub(crate) mod state;
mod string_ops;
mod sweeper;

#[cfg(test)]
mod tests;

pub use dst::{run_kv_batch, summarize_kv_batch, KvDstConfig, KvDstHarness, KvDstResult};
pub use sweeper::ExpirySweeper;

use crate::clock::{Clock, Timestamp};
use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::replication::{Mutation, MutationKind, MutationSender};
use parking_lot::{Mutex, MutexGuard};
use state::{KeyState, Shard, Stored};
use ahash::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const NUM_SHARDS: usize = 16;

pub struct KvEngine {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    last_cas: AtomicU64,
    mutations: Option<MutationSender>,
}

impl KvEngine {
    /// Standalone engine with no replica set behind it.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        KvEngine {
            shards: (0..NUM_SHARDS).map(|_| Mutex::new(Shard::new())).collect(),
            hasher: RandomState::new(),
            clock,
            config,
            last_cas: AtomicU64::new(0),
            mutations: None,
        }
    }

    /// Engine that publishes every committed mutation onto `tx`.
    pub fn with_mutation_stream(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        tx: MutationSender,
    ) -> Self {
        KvEngine {
            mutations: Some(tx),
            ..KvEngine::new(config, clock)
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|s| !s.value().is_expired(now))
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every live document, in no particular order.
    pub fn scan(&self) -> Vec<Document> {
        let now = self.clock.now();
        let mut docs = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            docs.extend(
                shard
                    .iter()
                    .filter(|(_, s)| !s.value().is_expired(now))
                    .map(|(key, s)| s.value().to_document(key)),
            );
        }
        docs
    }

    fn shard_index(&self, key: &str) -> usize {
        let idx = (self.hasher.hash_one(key) as usize) % NUM_SHARDS;
        debug_assert!(idx < NUM_SHARDS, "Hash produced invalid shard index");
        idx
    }

    pub(crate) fn shard(&self, key: &str) -> MutexGuard<'_, Shard> {
        self.shards[self.shard_index(key)].lock()
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Hybrid-logical cas: strictly increasing, and roughly tracks wall time.
    pub(crate) fn next_cas(&self) -> u64 {
        let floor = self.clock.now().as_millis() << 16;
        let mut last = self.last_cas.load(Ordering::Acquire);
        loop {
            let next = floor.max(last + 1);
            match self.last_cas.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // Postcondition: cas values are handed out strictly increasing
                    debug_assert!(
                        next > last,
                        "Postcondition violated: next_cas {} must exceed {}",
                        next,
                        last
                    );
                    return next;
                }
                Err(actual) => last = actual,
            }
        }
    }

    /// Lease length for a requested lock time in seconds.
    pub(crate) fn lease_duration(&self, lock_time: u32) -> Duration {
        let requested = Duration::from_secs(lock_time as u64);
        if lock_time == 0 || requested > self.config.max_lock_time {
            self.config.default_lock_time
        } else {
            requested
        }
    }

    /// Store `value` under `key` as a fresh, unlocked version. Caller holds the shard lock.
    pub(crate) fn commit(&self, shard: &mut Shard, key: &str, value: Stored) -> Document {
        // Precondition: the new version supersedes every cas the key has handed out
        debug_assert!(
            shard
                .get(key)
                .map_or(true, |previous| previous.effective_cas() < value.cas),
            "Precondition violated: commit on '{}' must store a fresh cas {}",
            key,
            value.cas
        );
        let doc = value.to_document(key);
        self.publish(Mutation {
            key: key.to_string(),
            cas: value.cas,
            kind: MutationKind::Store {
                content: value.content.clone(),
                expiry: value.expiry,
                expires_at: value.expires_at,
            },
        });
        shard.insert(key.to_string(), KeyState::Present(value));

        // Postcondition: the key is present, unlocked, at the returned cas
        debug_assert!(
            shard
                .get(key)
                .is_some_and(|s| !s.is_locked() && s.value().cas == doc.cas()),
            "Postcondition violated: '{}' must be stored unlocked at cas {}",
            key,
            doc.cas()
        );
        trace!(key, cas = doc.cas(), "Committed");
        doc
    }

    pub(crate) fn commit_delete(&self, shard: &mut Shard, key: &str) -> u64 {
        let cas = self.next_cas();
        let removed = shard.remove(key);
        debug_assert!(
            removed.map_or(true, |previous| previous.effective_cas() < cas),
            "Postcondition violated: removal cas {} on '{}' must be fresh",
            cas,
            key
        );
        self.publish(Mutation {
            key: key.to_string(),
            cas,
            kind: MutationKind::Delete,
        });
        cas
    }

    fn publish(&self, mutation: Mutation) {
        if let Some(tx) = &self.mutations {
            if tx.send(mutation).is_err() {
                debug!("Replication stream closed, mutation not replicated");
            }
        }
    }

    /// Reclaim expired documents and expired leases across all shards.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut reclaimed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, state| {
                state.release_expired_lease(now);
                !state.value().is_expired(now)
            });
            reclaimed += before - shard.len();

            #[cfg(debug_assertions)]
            state::verify_shard(&shard, now);
        }
        reclaimed
    }
}

/// A conditional write must present the lock cas on a locked key, and the
/// stored cas when it presents any cas at all.
pub(crate) fn check_cas(key: &str, state: &KeyState, cas: u64) -> Result<()> {
    if !state.is_locked() && cas == 0 {
        return Ok(());
    }
    if cas == state.effective_cas() {
        return Ok(());
    }
    Err(Error::CasMismatch {
        key: key.to_string(),
        requested: cas,
        observed: state.value().cas,
    })
}

pub(crate) fn not_found(key: &str) -> Error {
    Error::NotFound {
        key: key.to_string(),
    }
}

impl std::fmt::Debug for KvEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvEngine")
            .field("shards", &self.shards.len())
            .field("replicated", &self.mutations.is_some())
            .finish()
    }
}
