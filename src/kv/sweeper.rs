use super::KvEngine;
use crate::replication::ReplicaSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::debug;

/// Periodically reclaims expired documents and leases so memory does not
/// depend on keys being touched again. With a replica set attached it also
/// prunes the nodes' dead entries.
pub struct ExpirySweeper {
    engine: Arc<KvEngine>,
    period: Duration,
    replicas: Option<(Arc<ReplicaSet>, Duration)>,
}

impl ExpirySweeper {
    pub fn new(engine: Arc<KvEngine>) -> Self {
        let period = engine.config().sweep_interval;
        ExpirySweeper {
            engine,
            period,
            replicas: None,
        }
    }

    /// Also prune tombstones and expired records older than `retention`.
    pub fn with_replicas(mut self, replicas: Arc<ReplicaSet>, retention: Duration) -> Self {
        self.replicas = Some((replicas, retention));
        self
    }

    /// One pass: returns (engine keys reclaimed, node entries pruned).
    pub fn sweep(&self) -> (usize, usize) {
        let reclaimed = self.engine.sweep_expired();
        let pruned = self
            .replicas
            .as_ref()
            .map_or(0, |(replicas, retention)| replicas.prune(*retention));
        (reclaimed, pruned)
    }

    pub async fn run(self) {
        let mut tick = interval(self.period);

        loop {
            tick.tick().await;
            let (reclaimed, pruned) = self.sweep();
            if reclaimed > 0 || pruned > 0 {
                debug!(reclaimed, pruned, "Expiry sweeper reclaimed keys");
            }
        }
    }
}
