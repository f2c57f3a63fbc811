//! Per-call mutation options.
//!
//! Like view options, the JSON forms are strict: unknown names fail with
//! `InvalidArgument` before anything is written.

use crate::durability::{DurabilityRequirement, PersistTo, ReplicateTo};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationOptions {
    pub persist_to: PersistTo,
    pub replicate_to: ReplicateTo,
    /// Overrides the configured durability wait
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMutationOptions {
    persist_to: Option<u8>,
    replicate_to: Option<u8>,
    timeout: Option<u64>,
}

impl MutationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_to(mut self, persist_to: PersistTo) -> Self {
        self.persist_to = persist_to;
        self
    }

    pub fn replicate_to(mut self, replicate_to: ReplicateTo) -> Self {
        self.replicate_to = replicate_to;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn requirement(&self) -> DurabilityRequirement {
        DurabilityRequirement::new(self.persist_to, self.replicate_to)
    }

    /// Parse `{"persist_to": 1, "replicate_to": 0, "timeout": 500}` (timeout in ms).
    pub fn from_json(options: &Value) -> Result<Self> {
        expect_object(options)?;
        let raw: RawMutationOptions = serde_json::from_value(options.clone())?;
        Ok(MutationOptions {
            persist_to: PersistTo::try_from(raw.persist_to.unwrap_or(0))?,
            replicate_to: ReplicateTo::try_from(raw.replicate_to.unwrap_or(0))?,
            timeout: raw.timeout.map(Duration::from_millis),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterOptions {
    /// Value to create the counter with when it is absent
    pub initial: Option<i64>,
    /// Applies only when the counter is created
    pub expiry: u32,
    pub durability: MutationOptions,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCounterOptions {
    initial: Option<i64>,
    expiry: Option<u32>,
    persist_to: Option<u8>,
    replicate_to: Option<u8>,
    timeout: Option<u64>,
}

impl CounterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial(mut self, initial: i64) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn durability(mut self, durability: MutationOptions) -> Self {
        self.durability = durability;
        self
    }

    pub fn from_json(options: &Value) -> Result<Self> {
        expect_object(options)?;
        let raw: RawCounterOptions = serde_json::from_value(options.clone())?;
        Ok(CounterOptions {
            initial: raw.initial,
            expiry: raw.expiry.unwrap_or(0),
            durability: MutationOptions {
                persist_to: PersistTo::try_from(raw.persist_to.unwrap_or(0))?,
                replicate_to: ReplicateTo::try_from(raw.replicate_to.unwrap_or(0))?,
                timeout: raw.timeout.map(Duration::from_millis),
            },
        })
    }
}

/// Which copy `get_from_replica` reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSelector {
    /// One replica, 1-based
    Index(u8),
    /// First answer from the master or any replica
    All,
}

fn expect_object(options: &Value) -> Result<()> {
    if options.is_object() {
        Ok(())
    } else {
        Err(Error::invalid("options must be a JSON object"))
    }
}
