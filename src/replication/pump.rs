use super::{FaultInjector, Mutation, MutationReceiver, ReplicaSet};
use crate::config::ReplicationConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Drains the mutation stream into the replica set, one mutation at a time
/// so every node sees a key's mutations in commit order.
pub struct ReplicationPump {
    rx: MutationReceiver,
    replicas: Arc<ReplicaSet>,
    replication_delay: Duration,
    persistence_delay: Duration,
    faults: Option<FaultInjector>,
}

impl ReplicationPump {
    pub fn new(rx: MutationReceiver, replicas: Arc<ReplicaSet>, config: &ReplicationConfig) -> Self {
        ReplicationPump {
            rx,
            replicas,
            replication_delay: config.replication_delay,
            persistence_delay: config.persistence_delay,
            faults: config.faults.clone().map(FaultInjector::new),
        }
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(mutation) = self.rx.recv().await {
            self.replicate(&mutation).await;
            self.persist(&mutation).await;
        }
        debug!("Replication pump stopped");
    }

    async fn replicate(&mut self, mutation: &Mutation) {
        pause(self.replication_delay + self.jitter()).await;

        for node in self.replicas.replicas() {
            if !node.is_available() {
                continue;
            }
            if self.faults.as_mut().is_some_and(|f| f.should_drop()) {
                debug!(node = node.id(), key = %mutation.key, cas = mutation.cas, "Dropped replica apply");
                continue;
            }
            node.apply(mutation);
        }
        trace!(key = %mutation.key, cas = mutation.cas, "Replicated");
        self.replicas.notify_changed();
    }

    async fn persist(&mut self, mutation: &Mutation) {
        pause(self.persistence_delay + self.jitter()).await;

        for node in self.replicas.nodes() {
            if !node.is_available() {
                continue;
            }
            // A replica can only persist what reached its memory.
            if !node.is_master() && node.observe(&mutation.key).memory_cas != Some(mutation.cas) {
                continue;
            }
            node.persist(mutation);
        }
        trace!(key = %mutation.key, cas = mutation.cas, "Persisted");
        self.replicas.notify_changed();
    }

    fn jitter(&mut self) -> Duration {
        self.faults
            .as_mut()
            .map(|f| f.extra_delay())
            .unwrap_or(Duration::ZERO)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
