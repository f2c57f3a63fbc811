//! Durability Coordinator
//!
//! Waits until enough nodes acknowledge a mutation. The mutation has already
//! committed on the master when the wait starts; a timeout only reports that
//! the acknowledgements never arrived and never rolls the write back.

use crate::error::{Error, Result};
use crate::replication::{Observation, ReplicaSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Number of nodes (master included) that must persist a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PersistTo {
    #[default]
    None,
    Master,
    Two,
    Three,
    Four,
}

impl PersistTo {
    pub fn count(self) -> u8 {
        match self {
            PersistTo::None => 0,
            PersistTo::Master => 1,
            PersistTo::Two => 2,
            PersistTo::Three => 3,
            PersistTo::Four => 4,
        }
    }
}

impl TryFrom<u8> for PersistTo {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PersistTo::None),
            1 => Ok(PersistTo::Master),
            2 => Ok(PersistTo::Two),
            3 => Ok(PersistTo::Three),
            4 => Ok(PersistTo::Four),
            n => Err(Error::invalid(format!("persist_to must be 0..=4, got {}", n))),
        }
    }
}

/// Number of replicas that must hold a mutation in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReplicateTo {
    #[default]
    None,
    One,
    Two,
    Three,
}

impl ReplicateTo {
    pub fn count(self) -> u8 {
        match self {
            ReplicateTo::None => 0,
            ReplicateTo::One => 1,
            ReplicateTo::Two => 2,
            ReplicateTo::Three => 3,
        }
    }
}

impl TryFrom<u8> for ReplicateTo {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ReplicateTo::None),
            1 => Ok(ReplicateTo::One),
            2 => Ok(ReplicateTo::Two),
            3 => Ok(ReplicateTo::Three),
            n => Err(Error::invalid(format!("replicate_to must be 0..=3, got {}", n))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DurabilityRequirement {
    pub persist_to: PersistTo,
    pub replicate_to: ReplicateTo,
}

impl DurabilityRequirement {
    pub fn new(persist_to: PersistTo, replicate_to: ReplicateTo) -> Self {
        DurabilityRequirement {
            persist_to,
            replicate_to,
        }
    }

    pub fn is_none(&self) -> bool {
        self.persist_to == PersistTo::None && self.replicate_to == ReplicateTo::None
    }

    /// Reject requirements the keyspace could never satisfy.
    pub fn validate(&self, replicas: u8) -> Result<()> {
        if self.persist_to.count() > replicas + 1 {
            return Err(Error::invalid(format!(
                "persist_to {} exceeds the {} nodes of this keyspace",
                self.persist_to.count(),
                replicas + 1
            )));
        }
        if self.replicate_to.count() > replicas {
            return Err(Error::invalid(format!(
                "replicate_to {} exceeds the {} replicas of this keyspace",
                self.replicate_to.count(),
                replicas
            )));
        }
        Ok(())
    }

    fn satisfied_by(&self, observation: &Observation) -> bool {
        observation.persisted >= self.persist_to.count() as usize
            && observation.replicated >= self.replicate_to.count() as usize
    }
}

pub struct DurabilityCoordinator {
    replicas: Arc<ReplicaSet>,
    default_timeout: Duration,
}

impl DurabilityCoordinator {
    pub fn new(replicas: Arc<ReplicaSet>, default_timeout: Duration) -> Self {
        DurabilityCoordinator {
            replicas,
            default_timeout,
        }
    }

    pub fn replica_count(&self) -> u8 {
        self.replicas.replica_count()
    }

    /// Block until `requirement` is met for exactly (`key`, `cas`).
    pub async fn await_durable(
        &self,
        key: &str,
        cas: u64,
        requirement: DurabilityRequirement,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if requirement.is_none() {
            return Ok(());
        }
        requirement.validate(self.replica_count())?;
        // Precondition: validated requirements fit the replica set
        debug_assert!(
            (requirement.persist_to.count() as usize) <= self.replicas.nodes().len()
                && requirement.replicate_to.count() <= self.replica_count(),
            "Precondition violated: requirement exceeds the replica set"
        );

        let deadline = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(deadline, self.observe_until(key, cas, requirement)).await {
            Ok(result) => result,
            Err(_) => {
                let observed = self.replicas.observe(key, cas);
                warn!(
                    key,
                    cas,
                    persisted = observed.persisted,
                    replicated = observed.replicated,
                    "Durability requirement not met before deadline"
                );
                Err(Error::DurabilityTimeout {
                    key: key.to_string(),
                    cas,
                    persist_to: requirement.persist_to.count(),
                    replicate_to: requirement.replicate_to.count(),
                    persisted: observed.persisted,
                    replicated: observed.replicated,
                })
            }
        }
    }

    async fn observe_until(
        &self,
        key: &str,
        cas: u64,
        requirement: DurabilityRequirement,
    ) -> Result<()> {
        loop {
            // Register before observing so an apply in between is not missed.
            let notified = self.replicas.changed().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let observation = self.replicas.observe(key, cas);
            debug_assert!(
                observation.superseded_by.map_or(true, |newer| newer > cas),
                "Invariant violated: superseding cas must be newer than {}",
                cas
            );
            if requirement.satisfied_by(&observation) {
                debug!(key, cas, "Durability requirement met");
                return Ok(());
            }
            if let Some(newer) = observation.superseded_by {
                return Err(Error::ConcurrentModification {
                    key: key.to_string(),
                    expected: cas,
                    observed: newer,
                });
            }

            notified.await;
        }
    }
}
