//! Replica Set
//!
//! Every committed mutation is published, in commit order, onto a mutation
//! stream. The `ReplicationPump` drains that stream into the keyspace's nodes:
//! node 0 is the master (it only tracks persistence, its memory copy is the
//! engine itself), nodes 1..=N are replicas with their own memory copy.
//!
//! Each apply wakes `changed()` so durability waiters can re-check their
//! (key, cas) observation.

pub mod faults;
pub mod node;
pub mod pump;

pub use faults::FaultInjector;
pub use node::{Node, NodeObservation};
pub use pump::ReplicationPump;

use crate::clock::{Clock, Timestamp};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Sending half of the mutation stream held by the engine
pub type MutationSender = mpsc::UnboundedSender<Mutation>;
pub type MutationReceiver = mpsc::UnboundedReceiver<Mutation>;

pub fn mutation_channel() -> (MutationSender, MutationReceiver) {
    mpsc::unbounded_channel()
}

/// A committed change to one key
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub key: String,
    pub cas: u64,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    Store {
        content: Bytes,
        expiry: u32,
        expires_at: Option<Timestamp>,
    },
    /// Removal; the tombstone carries the removal cas
    Delete,
}

/// Acknowledgement counts for one (key, cas) across the replica set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    /// Nodes (master included) that persisted exactly this cas
    pub persisted: usize,
    /// Replica nodes holding exactly this cas in memory
    pub replicated: usize,
    /// Highest cas seen anywhere if it is newer than the observed one
    pub superseded_by: Option<u64>,
}

pub struct ReplicaSet {
    nodes: Vec<Arc<Node>>,
    changed: Notify,
}

impl ReplicaSet {
    pub fn new(replicas: u8, clock: Arc<dyn Clock>) -> Self {
        let nodes = (0..=replicas as usize)
            .map(|id| Arc::new(Node::new(id, clock.clone())))
            .collect();
        ReplicaSet {
            nodes,
            changed: Notify::new(),
        }
    }

    pub fn replica_count(&self) -> u8 {
        (self.nodes.len() - 1) as u8
    }

    pub fn master(&self) -> &Arc<Node> {
        &self.nodes[0]
    }

    /// Replica by 1-based index.
    pub fn replica(&self, index: u8) -> Option<&Arc<Node>> {
        if index == 0 {
            return None;
        }
        self.nodes.get(index as usize)
    }

    pub fn replicas(&self) -> &[Arc<Node>] {
        &self.nodes[1..]
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Mark a node up or down. Returns false for an unknown node id.
    pub fn set_available(&self, node_id: usize, available: bool) -> bool {
        match self.nodes.get(node_id) {
            Some(node) => {
                node.set_available(available);
                true
            }
            None => false,
        }
    }

    pub fn observe(&self, key: &str, cas: u64) -> Observation {
        let mut observation = Observation::default();
        let mut newest = cas;

        for node in &self.nodes {
            let seen = node.observe(key);
            if seen.persisted_cas == Some(cas) {
                observation.persisted += 1;
            }
            if node.id() > 0 && seen.memory_cas == Some(cas) {
                observation.replicated += 1;
            }
            for other in [seen.memory_cas, seen.persisted_cas].into_iter().flatten() {
                newest = newest.max(other);
            }
        }

        if newest > cas {
            observation.superseded_by = Some(newest);
        }

        // Postcondition: counts are bounded by the nodes that can contribute
        debug_assert!(
            observation.persisted <= self.nodes.len(),
            "Postcondition violated: {} persisted acks from {} nodes",
            observation.persisted,
            self.nodes.len()
        );
        debug_assert!(
            observation.replicated < self.nodes.len(),
            "Postcondition violated: {} replica acks from {} replicas",
            observation.replicated,
            self.nodes.len() - 1
        );
        observation
    }

    /// Drop dead entries older than `retention` from every node.
    pub fn prune(&self, retention: Duration) -> usize {
        self.nodes.iter().map(|node| node.prune(retention)).sum()
    }

    /// Notification fired after every node apply or persist.
    pub fn changed(&self) -> &Notify {
        &self.changed
    }

    pub(crate) fn notify_changed(&self) {
        self.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    fn store(key: &str, cas: u64) -> Mutation {
        Mutation {
            key: key.to_string(),
            cas,
            kind: MutationKind::Store {
                content: Bytes::from_static(b"v"),
                expiry: 0,
                expires_at: None,
            },
        }
    }

    #[test]
    fn test_observe_counts_exact_cas() {
        let set = ReplicaSet::new(2, Arc::new(SimulatedClock::default()));
        let m = store("k", 10);

        set.master().persist(&m);
        set.replicas()[0].apply(&m);
        set.replicas()[1].apply(&m);
        set.replicas()[1].persist(&m);

        let obs = set.observe("k", 10);
        assert_eq!(obs.persisted, 2);
        assert_eq!(obs.replicated, 2);
        assert_eq!(obs.superseded_by, None);
    }

    #[test]
    fn test_observe_reports_newer_cas() {
        let set = ReplicaSet::new(1, Arc::new(SimulatedClock::default()));
        set.replicas()[0].apply(&store("k", 10));
        set.replicas()[0].apply(&store("k", 11));

        let obs = set.observe("k", 10);
        assert_eq!(obs.replicated, 0);
        assert_eq!(obs.superseded_by, Some(11));
    }

    #[test]
    fn test_replica_indexing() {
        let set = ReplicaSet::new(2, Arc::new(SimulatedClock::default()));
        assert_eq!(set.replica_count(), 2);
        assert!(set.replica(0).is_none());
        assert_eq!(set.replica(2).map(|n| n.id()), Some(2));
        assert!(set.replica(3).is_none());
        assert!(!set.set_available(9, false));
    }
}
