use super::{Mutation, MutationKind};
use crate::clock::{Clock, Timestamp};
use crate::document::Document;
use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Record {
    cas: u64,
    /// None for a tombstone
    content: Option<Bytes>,
    expiry: u32,
    expires_at: Option<Timestamp>,
    dead_after: Option<Timestamp>,
}

impl Record {
    fn from_mutation(mutation: &Mutation, now: Timestamp) -> Self {
        let dead_after = dead_after(mutation, now);
        match &mutation.kind {
            MutationKind::Store {
                content,
                expiry,
                expires_at,
            } => Record {
                cas: mutation.cas,
                content: Some(content.clone()),
                expiry: *expiry,
                expires_at: *expires_at,
                dead_after,
            },
            MutationKind::Delete => Record {
                cas: mutation.cas,
                content: None,
                expiry: 0,
                expires_at: None,
                dead_after,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Persisted {
    cas: u64,
    dead_after: Option<Timestamp>,
}

/// When a key stops holding a readable document: at once for a removal, at
/// its expiry for an expiring store, never otherwise.
fn dead_after(mutation: &Mutation, now: Timestamp) -> Option<Timestamp> {
    match &mutation.kind {
        MutationKind::Delete => Some(now),
        MutationKind::Store { expires_at, .. } => expires_at.map(|at| at.max(now)),
    }
}

fn reclaimable(dead_after: Option<Timestamp>, retention: Duration, now: Timestamp) -> bool {
    dead_after.is_some_and(|at| at + retention <= now)
}

/// What one node currently holds for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeObservation {
    pub memory_cas: Option<u64>,
    pub persisted_cas: Option<u64>,
}

/// One member of a keyspace's replica set
pub struct Node {
    id: usize,
    memory: Mutex<AHashMap<String, Record>>,
    persisted: Mutex<AHashMap<String, Persisted>>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl Node {
    pub fn new(id: usize, clock: Arc<dyn Clock>) -> Self {
        Node {
            id,
            memory: Mutex::new(AHashMap::new()),
            persisted: Mutex::new(AHashMap::new()),
            available: AtomicBool::new(true),
            clock,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_master(&self) -> bool {
        self.id == 0
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Store the mutation in memory. Older cas values never overwrite newer ones.
    pub fn apply(&self, mutation: &Mutation) -> bool {
        let mut memory = self.memory.lock();
        #[cfg(debug_assertions)]
        let before = memory.get(&mutation.key).map(|r| r.cas);

        let applied = match memory.get(&mutation.key) {
            Some(existing) if existing.cas >= mutation.cas => false,
            _ => {
                let record = Record::from_mutation(mutation, self.clock.now());
                memory.insert(mutation.key.clone(), record);
                true
            }
        };

        // Postcondition: a node's copy of a key never moves back in cas
        #[cfg(debug_assertions)]
        {
            let after = memory.get(&mutation.key).map(|r| r.cas);
            debug_assert!(
                after >= before,
                "Postcondition violated: node {} regressed '{}' from {:?} to {:?}",
                self.id,
                mutation.key,
                before,
                after
            );
        }
        applied
    }

    pub fn persist(&self, mutation: &Mutation) -> bool {
        let mut persisted = self.persisted.lock();
        if persisted
            .get(&mutation.key)
            .is_some_and(|p| p.cas >= mutation.cas)
        {
            return false;
        }
        let entry = Persisted {
            cas: mutation.cas,
            dead_after: dead_after(mutation, self.clock.now()),
        };
        persisted.insert(mutation.key.clone(), entry);
        true
    }

    pub fn observe(&self, key: &str) -> NodeObservation {
        NodeObservation {
            memory_cas: self.memory.lock().get(key).map(|r| r.cas),
            persisted_cas: self.persisted.lock().get(key).map(|p| p.cas),
        }
    }

    /// Forget tombstones and expired records that have been dead for at
    /// least `retention`. Returns how many entries were dropped.
    pub fn prune(&self, retention: Duration) -> usize {
        let now = self.clock.now();

        let mut memory = self.memory.lock();
        let before = memory.len();
        memory.retain(|_, r| !reclaimable(r.dead_after, retention, now));
        let mut pruned = before - memory.len();
        drop(memory);

        let mut persisted = self.persisted.lock();
        let before = persisted.len();
        persisted.retain(|_, p| !reclaimable(p.dead_after, retention, now));
        pruned += before - persisted.len();
        pruned
    }

    /// Read from this node's memory copy. Unavailable nodes answer nothing.
    pub fn get(&self, key: &str) -> Option<Document> {
        if !self.is_available() {
            return None;
        }
        let memory = self.memory.lock();
        let record = memory.get(key)?;
        let content = record.content.clone()?;
        if record.expires_at.is_some_and(|at| self.clock.now() >= at) {
            return None;
        }
        Some(
            Document::new(key, content)
                .with_cas(record.cas)
                .with_expiry(record.expiry),
        )
    }

    pub fn len(&self) -> usize {
        self.memory
            .lock()
            .values()
            .filter(|r| r.content.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys with any memory or persistence entry, live or dead.
    pub fn tracked_keys(&self) -> usize {
        let memory = self.memory.lock();
        let persisted = self.persisted.lock();
        memory
            .keys()
            .chain(persisted.keys().filter(|k| !memory.contains_key(*k)))
            .count()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("available", &self.is_available())
            .finish()
    }
}
