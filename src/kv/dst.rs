//! Deterministic Simulation Testing for the key-value engine
//!
//! Drives a `KvEngine` on a `SimulatedClock` through seeded random sequences
//! of writes, reads, lock operations, counters and clock advances.
//!
//! ## Design
//!
//! The harness keeps a **shadow state** per key: content, cas, expiry
//! deadline and lease. Before every operation the shadow resolves expired
//! documents and leases the same way the engine does lazily, then computes the
//! expected outcome. Checked after every operation:
//!
//! 1. Success or failure (and the error kind) matches the shadow
//! 2. Every cas the engine hands out is strictly greater than the previous one
//! 3. Locked keys only accept the lock cas; reads are unaffected by locks
//! 4. Which keys are alive matches the shadow after every clock advance
//!
//! ## Usage
//!
//! ```rust,ignore
//! for seed in 0..100 {
//!     let mut harness = KvDstHarness::with_seed(seed);
//!     harness.run(500);
//!     assert!(harness.result().is_success(), "Seed {} failed", seed);
//! }
//! ```

use super::KvEngine;
use crate::clock::{Clock, SimulatedClock};
use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{ErrorKind, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A cas the engine never hands out
const BOGUS_CAS: u64 = u64::MAX;

/// Configuration for KV DST
#[derive(Debug, Clone)]
pub struct KvDstConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of unique keys in the key space
    pub num_keys: usize,
    /// Number of unique values to use
    pub num_values: usize,
    /// Upper bound of a single clock advance
    pub max_advance_ms: u64,

    // Operation category weights
    pub weight_write: u64,
    pub weight_read: u64,
    pub weight_lock: u64,
    pub weight_counter: u64,
    pub weight_time: u64,
}

impl Default for KvDstConfig {
    fn default() -> Self {
        KvDstConfig {
            seed: 0,
            num_keys: 20,
            num_values: 10,
            max_advance_ms: 1_500,
            weight_write: 35,
            weight_read: 20,
            weight_lock: 20,
            weight_counter: 15,
            weight_time: 10,
        }
    }
}

impl KvDstConfig {
    pub fn new(seed: u64) -> Self {
        KvDstConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm configuration: slow clock, few locks
    pub fn calm(seed: u64) -> Self {
        KvDstConfig {
            seed,
            max_advance_ms: 200,
            weight_lock: 5,
            weight_time: 5,
            ..Default::default()
        }
    }

    /// Contended configuration: tiny key space, long clock jumps, lock heavy
    pub fn contended(seed: u64) -> Self {
        KvDstConfig {
            seed,
            num_keys: 4,
            max_advance_ms: 8_000,
            weight_lock: 35,
            weight_time: 15,
            ..Default::default()
        }
    }

    fn total_weight(&self) -> u64 {
        self.weight_write + self.weight_read + self.weight_lock + self.weight_counter + self.weight_time
    }
}

/// Result of a KV DST run
#[derive(Debug, Clone)]
pub struct KvDstResult {
    pub seed: u64,
    pub total_operations: u64,
    pub write_ops: u64,
    pub read_ops: u64,
    pub lock_ops: u64,
    pub counter_ops: u64,
    pub time_advances: u64,
    /// Operations the engine refused, matching the shadow
    pub expected_failures: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<String>,
}

impl KvDstResult {
    pub fn new(seed: u64) -> Self {
        KvDstResult {
            seed,
            total_operations: 0,
            write_ops: 0,
            read_ops: 0,
            lock_ops: 0,
            counter_ops: 0,
            time_advances: 0,
            expected_failures: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (write:{}, read:{}, lock:{}, counter:{}, time:{}), {} refused, {} violations",
            self.seed,
            self.total_operations,
            self.write_ops,
            self.read_ops,
            self.lock_ops,
            self.counter_ops,
            self.time_advances,
            self.expected_failures,
            self.invariant_violations.len()
        )
    }
}

// =============================================================================
// Shadow State - Reference Model
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ShadowLock {
    cas: u64,
    deadline_ms: u64,
}

#[derive(Debug, Clone)]
struct ShadowDoc {
    content: Vec<u8>,
    cas: u64,
    /// The cas this key held before its current version
    previous_cas: Option<u64>,
    expires_at_ms: Option<u64>,
    lock: Option<ShadowLock>,
}

impl ShadowDoc {
    /// Outcome of presenting `cas` to a conditional write.
    fn cas_gate(&self, cas: u64) -> Option<ErrorKind> {
        match self.lock {
            Some(lock) if cas == lock.cas => None,
            Some(_) => Some(ErrorKind::CasMismatch),
            None if cas == 0 || cas == self.cas => None,
            None => Some(ErrorKind::CasMismatch),
        }
    }
}

#[derive(Debug, Default)]
struct ShadowState {
    docs: HashMap<String, ShadowDoc>,
}

impl ShadowState {
    /// Release expired leases, then drop expired documents.
    fn resolve(&mut self, now_ms: u64) {
        for doc in self.docs.values_mut() {
            if doc.lock.is_some_and(|l| now_ms >= l.deadline_ms) {
                doc.lock = None;
            }
        }
        self.docs
            .retain(|_, doc| doc.expires_at_ms.map_or(true, |at| now_ms < at));
    }

    fn get(&self, key: &str) -> Option<&ShadowDoc> {
        self.docs.get(key)
    }

    /// Store a fresh unlocked version.
    fn store(&mut self, key: &str, content: Vec<u8>, cas: u64, expires_at_ms: Option<u64>) {
        let previous_cas = self.docs.get(key).map(|d| d.cas);
        self.docs.insert(
            key.to_string(),
            ShadowDoc {
                content,
                cas,
                previous_cas,
                expires_at_ms,
                lock: None,
            },
        );
    }

    fn remove(&mut self, key: &str) {
        self.docs.remove(key);
    }

    fn len(&self) -> usize {
        self.docs.len()
    }
}

// =============================================================================
// DST Harness
// =============================================================================

pub struct KvDstHarness {
    config: KvDstConfig,
    rng: ChaCha8Rng,
    clock: SimulatedClock,
    kv: KvEngine,
    shadow: ShadowState,
    result: KvDstResult,
    last_cas: u64,
}

impl KvDstHarness {
    pub fn new(config: KvDstConfig) -> Self {
        let clock = SimulatedClock::default();
        let kv = KvEngine::new(EngineConfig::default(), Arc::new(clock.clone()));
        KvDstHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            result: KvDstResult::new(config.seed),
            config,
            clock,
            kv,
            shadow: ShadowState::default(),
            last_cas: 0,
        }
    }

    /// Create with just a seed (uses default config)
    pub fn with_seed(seed: u64) -> Self {
        Self::new(KvDstConfig::new(seed))
    }

    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.result.total_operations += 1;
            self.run_single_op();

            // Stop early if we hit a violation
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
    }

    pub fn result(&self) -> &KvDstResult {
        &self.result
    }

    pub fn engine(&self) -> &KvEngine {
        &self.kv
    }

    // =========================================================================
    // Random inputs
    // =========================================================================

    fn now_ms(&self) -> u64 {
        self.clock.now().as_millis()
    }

    fn random_key(&mut self) -> String {
        format!("key:{}", self.rng.gen_range(0..self.config.num_keys))
    }

    /// Half the values are decimal so counters find something to work on.
    fn random_value(&mut self) -> Vec<u8> {
        let idx = self.rng.gen_range(0..self.config.num_values);
        if self.rng.gen_bool(0.5) {
            idx.to_string().into_bytes()
        } else {
            format!("val:{}", idx).into_bytes()
        }
    }

    /// 0 (no expiry) half the time, otherwise 1..=5 seconds.
    fn random_expiry(&mut self) -> u32 {
        if self.rng.gen_bool(0.5) {
            0
        } else {
            self.rng.gen_range(1..=5)
        }
    }

    fn expires_at(&self, expiry: u32) -> Option<u64> {
        (expiry > 0).then(|| self.now_ms() + expiry as u64 * 1000)
    }

    /// A cas a caller might plausibly present: none, current, lock, outdated or bogus.
    fn random_cas(&mut self, key: &str) -> u64 {
        let roll = self.rng.gen_range(0..5);
        let doc = self.shadow.get(key);
        match roll {
            0 => 0,
            1 => doc.map_or(0, |d| d.cas),
            2 => doc.and_then(|d| d.lock).map_or(BOGUS_CAS, |l| l.cas),
            3 => doc.and_then(|d| d.previous_cas).unwrap_or(BOGUS_CAS),
            _ => BOGUS_CAS,
        }
    }

    fn lease_ms(&self, lock_time: u32) -> u64 {
        let config = self.kv.config();
        let requested = Duration::from_secs(lock_time as u64);
        let lease = if lock_time == 0 || requested > config.max_lock_time {
            config.default_lock_time
        } else {
            requested
        };
        lease.as_millis() as u64
    }

    // =========================================================================
    // Operation Runners
    // =========================================================================

    fn run_single_op(&mut self) {
        // Mirror the engine's lazy expiry before computing expectations
        let now = self.now_ms();
        self.shadow.resolve(now);

        let total = self.config.total_weight().max(1);
        let roll = self.rng.gen_range(0..total);
        let mut threshold = self.config.weight_write;
        if roll < threshold {
            self.run_write_op();
            return;
        }
        threshold += self.config.weight_read;
        if roll < threshold {
            self.run_read_op();
            return;
        }
        threshold += self.config.weight_lock;
        if roll < threshold {
            self.run_lock_op();
            return;
        }
        threshold += self.config.weight_counter;
        if roll < threshold {
            self.run_counter_op();
            return;
        }
        self.run_time_op();
    }

    fn run_write_op(&mut self) {
        self.result.write_ops += 1;
        let key = self.random_key();
        let sub = self.rng.gen_range(0..100);

        if sub < 20 {
            let value = self.random_value();
            let expiry = self.random_expiry();
            self.result.last_op = Some(format!("INSERT {} expiry={}", key, expiry));
            let expected = self.shadow.get(&key).map(|_| ErrorKind::DocumentAlreadyExists);
            let doc = Document::new(key.as_str(), value.clone()).with_expiry(expiry);
            let actual = self.kv.insert(&doc);
            if let Some(stored) = self.check_outcome(actual, expected) {
                self.check_stored(&stored, &value);
                let at = self.expires_at(expiry);
                self.shadow.store(&key, value, stored.cas(), at);
            }
        } else if sub < 45 {
            let value = self.random_value();
            let expiry = self.random_expiry();
            self.result.last_op = Some(format!("UPSERT {} expiry={}", key, expiry));
            let expected = self.shadow.get(&key).and_then(|d| d.cas_gate(0));
            let doc = Document::new(key.as_str(), value.clone()).with_expiry(expiry);
            let actual = self.kv.upsert(&doc);
            if let Some(stored) = self.check_outcome(actual, expected) {
                self.check_stored(&stored, &value);
                let at = self.expires_at(expiry);
                self.shadow.store(&key, value, stored.cas(), at);
            }
        } else if sub < 65 {
            let value = self.random_value();
            let cas = self.random_cas(&key);
            self.result.last_op = Some(format!("REPLACE {} cas={}", key, cas));
            let expected = match self.shadow.get(&key) {
                None => Some(ErrorKind::NotFound),
                Some(doc) => doc.cas_gate(cas),
            };
            let doc = Document::new(key.as_str(), value.clone()).with_cas(cas);
            let actual = self.kv.replace(&doc);
            if let Some(stored) = self.check_outcome(actual, expected) {
                self.check_stored(&stored, &value);
                self.shadow.store(&key, value, stored.cas(), None);
            }
        } else if sub < 80 {
            let cas = self.random_cas(&key);
            self.result.last_op = Some(format!("REMOVE {} cas={}", key, cas));
            let expected = match self.shadow.get(&key) {
                None => Some(ErrorKind::NotFound),
                Some(doc) => doc.cas_gate(cas),
            };
            let actual = self.kv.remove(&Document::new(key.as_str(), "").with_cas(cas));
            if let Some(removed) = self.check_outcome(actual, expected) {
                self.check_fresh_cas(removed.cas());
                self.shadow.remove(&key);
            }
        } else {
            let value = self.random_value();
            let append = self.rng.gen_bool(0.5);
            let op = if append { "APPEND" } else { "PREPEND" };
            self.result.last_op = Some(format!("{} {}", op, key));
            let expected = match self.shadow.get(&key) {
                None => Some(ErrorKind::NotFound),
                Some(doc) => doc.cas_gate(0),
            };
            let doc = Document::new(key.as_str(), value.clone());
            let actual = if append {
                self.kv.append(&doc)
            } else {
                self.kv.prepend(&doc)
            };
            if let Some(stored) = self.check_outcome(actual, expected) {
                let (content, expires_at) = match self.shadow.get(&key) {
                    Some(current) if append => (
                        [current.content.as_slice(), value.as_slice()].concat(),
                        current.expires_at_ms,
                    ),
                    Some(current) => (
                        [value.as_slice(), current.content.as_slice()].concat(),
                        current.expires_at_ms,
                    ),
                    None => (value, None),
                };
                self.check_stored(&stored, &content);
                self.shadow.store(&key, content, stored.cas(), expires_at);
            }
        }
    }

    fn run_read_op(&mut self) {
        self.result.read_ops += 1;
        let key = self.random_key();
        self.result.last_op = Some(format!("GET {}", key));

        let expected = self.shadow.get(&key).map(|d| (d.content.clone(), d.cas));
        match (self.kv.get(&key), expected) {
            (Ok(None), None) => {}
            (Ok(Some(doc)), Some((content, cas))) => {
                // Invariant 3: a lock never changes what a read reports
                if doc.content().as_ref() != content.as_slice() || doc.cas() != cas {
                    self.violation(&format!(
                        "GET {} returned ({:?}, cas {}), shadow holds ({:?}, cas {})",
                        key,
                        String::from_utf8_lossy(doc.content()),
                        doc.cas(),
                        String::from_utf8_lossy(&content),
                        cas
                    ));
                }
            }
            (actual, expected) => {
                self.violation(&format!(
                    "GET {} returned {:?}, shadow expects presence={}",
                    key,
                    actual.map(|d| d.is_some()),
                    expected.is_some()
                ));
            }
        }
    }

    fn run_lock_op(&mut self) {
        self.result.lock_ops += 1;
        let key = self.random_key();
        let sub = self.rng.gen_range(0..100);

        if sub < 40 {
            let lock_time = self.rng.gen_range(0..=40);
            self.result.last_op = Some(format!("GET_AND_LOCK {} {}s", key, lock_time));
            let expected = match self.shadow.get(&key) {
                None => Some(ErrorKind::NotFound),
                Some(doc) if doc.lock.is_some() => Some(ErrorKind::Locked),
                Some(_) => None,
            };
            let actual = self.kv.get_and_lock(&key, lock_time);
            if let Some(locked) = self.check_outcome(actual, expected) {
                self.check_fresh_cas(locked.cas());
                let deadline_ms = self.now_ms() + self.lease_ms(lock_time);
                if let Some(doc) = self.shadow.docs.get_mut(&key) {
                    doc.lock = Some(ShadowLock {
                        cas: locked.cas(),
                        deadline_ms,
                    });
                }
            }
        } else if sub < 70 {
            let cas = self.random_cas(&key);
            self.result.last_op = Some(format!("UNLOCK {} cas={}", key, cas));
            let expected = match self.shadow.get(&key) {
                None => Some(ErrorKind::NotFound),
                Some(doc) if doc.lock.is_some_and(|l| l.cas == cas) => None,
                Some(_) => Some(ErrorKind::CasMismatch),
            };
            let actual = self.kv.unlock(&key, cas);
            if self.check_outcome(actual, expected).is_some() {
                if let Some(doc) = self.shadow.docs.get_mut(&key) {
                    doc.lock = None;
                }
            }
        } else {
            let expiry = self.random_expiry();
            let read = self.rng.gen_bool(0.5);
            let op = if read { "GET_AND_TOUCH" } else { "TOUCH" };
            self.result.last_op = Some(format!("{} {} expiry={}", op, key, expiry));
            let expected = match self.shadow.get(&key) {
                None => Some(ErrorKind::NotFound),
                Some(doc) if doc.lock.is_some() => Some(ErrorKind::Locked),
                Some(_) => None,
            };
            let current = self.shadow.get(&key).map(|d| d.content.clone());
            let at = self.expires_at(expiry);

            if read {
                let actual = self.kv.get_and_touch(&key, expiry);
                if let Some(touched) = self.check_outcome(actual, expected) {
                    let content = current.unwrap_or_default();
                    self.check_stored(&touched, &content);
                    self.shadow.store(&key, content, touched.cas(), at);
                }
            } else {
                let actual = self.kv.touch(&key, expiry);
                if self.check_outcome(actual, expected).is_some() {
                    // touch hides the new cas; read it back
                    match self.kv.get(&key) {
                        Ok(Some(doc)) => {
                            self.check_fresh_cas(doc.cas());
                            self.shadow.store(&key, current.unwrap_or_default(), doc.cas(), at);
                        }
                        other => self.violation(&format!(
                            "TOUCH {} succeeded but the key reads back as {:?}",
                            key, other
                        )),
                    }
                }
            }
        }
    }

    fn run_counter_op(&mut self) {
        self.result.counter_ops += 1;
        let key = self.random_key();
        let delta = self.rng.gen_range(-5..=5i64);
        let initial = if self.rng.gen_bool(0.7) {
            Some(self.rng.gen_range(0..10i64))
        } else {
            None
        };
        self.result.last_op = Some(format!("COUNTER {} delta={} initial={:?}", key, delta, initial));

        enum CounterExpect {
            Value(i64, Option<u64>),
            Fail(ErrorKind),
        }
        let expect = match self.shadow.get(&key) {
            None => match initial {
                Some(start) => CounterExpect::Value(start, None),
                None => CounterExpect::Fail(ErrorKind::NotFound),
            },
            Some(doc) if doc.lock.is_some() => CounterExpect::Fail(ErrorKind::Locked),
            Some(doc) => match std::str::from_utf8(&doc.content)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
            {
                // Default floor clamps at zero
                Some(n) => match n.checked_add(delta) {
                    Some(next) => CounterExpect::Value(next.max(0), doc.expires_at_ms),
                    None => CounterExpect::Fail(ErrorKind::CounterOverflow),
                },
                None => CounterExpect::Fail(ErrorKind::NotNumeric),
            },
        };

        let actual = self.kv.counter(&key, delta, initial, 0);
        match expect {
            CounterExpect::Value(value, expires_at) => {
                if let Some(stored) = self.check_outcome(actual, None) {
                    let content = value.to_string().into_bytes();
                    self.check_stored(&stored, &content);
                    self.shadow.store(&key, content, stored.cas(), expires_at);
                }
            }
            CounterExpect::Fail(kind) => {
                self.check_outcome(actual, Some(kind));
            }
        }
    }

    fn run_time_op(&mut self) {
        self.result.time_advances += 1;
        let step = self.rng.gen_range(0..=self.config.max_advance_ms);
        self.result.last_op = Some(format!("ADVANCE {}ms", step));
        self.clock.advance(Duration::from_millis(step));

        let now = self.now_ms();
        self.shadow.resolve(now);
        if self.rng.gen_bool(0.3) {
            self.kv.sweep_expired();
        }

        // Invariant 4: the live key set matches the shadow after time moves
        let live = self.kv.len();
        if live != self.shadow.len() {
            self.violation(&format!(
                "{} live documents after advance, shadow holds {}",
                live,
                self.shadow.len()
            ));
        }
        for idx in 0..self.config.num_keys {
            let key = format!("key:{}", idx);
            let present = matches!(self.kv.get(&key), Ok(Some(_)));
            if present != self.shadow.get(&key).is_some() {
                self.violation(&format!(
                    "{} present={} after advance, shadow disagrees",
                    key, present
                ));
            }
        }
    }

    // =========================================================================
    // Checks
    // =========================================================================

    fn violation(&mut self, msg: &str) {
        self.result.invariant_violations.push(format!(
            "Op #{}: {:?} - {}",
            self.result.total_operations, self.result.last_op, msg
        ));
    }

    /// Invariant 1: success and failure match the shadow. Returns the value
    /// when both agree the operation succeeded.
    fn check_outcome<T: std::fmt::Debug>(&mut self, actual: Result<T>, expected: Option<ErrorKind>) -> Option<T> {
        match (actual, expected) {
            (Ok(value), None) => Some(value),
            (Err(e), Some(kind)) if e.kind() == kind => {
                self.result.expected_failures += 1;
                None
            }
            (Ok(value), Some(kind)) => {
                self.violation(&format!("expected {:?}, engine returned Ok({:?})", kind, value));
                None
            }
            (Err(e), expected) => {
                self.violation(&format!("expected {:?}, engine returned {}", expected, e));
                None
            }
        }
    }

    /// Invariant 2: every cas handed out is strictly greater than the last.
    fn check_fresh_cas(&mut self, cas: u64) {
        if cas <= self.last_cas {
            self.violation(&format!(
                "cas {} is not newer than previously issued {}",
                cas, self.last_cas
            ));
        }
        self.last_cas = self.last_cas.max(cas);
    }

    fn check_stored(&mut self, doc: &Document, content: &[u8]) {
        self.check_fresh_cas(doc.cas());
        if doc.content().as_ref() != content {
            self.violation(&format!(
                "stored {:?}, shadow expects {:?}",
                String::from_utf8_lossy(doc.content()),
                String::from_utf8_lossy(content)
            ));
        }
    }
}

/// Run a batch of DST tests with different seeds
pub fn run_kv_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> KvDstConfig,
) -> Vec<KvDstResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            let mut harness = KvDstHarness::new(config_fn(seed));
            harness.run(ops_per_seed);
            harness.result().clone()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_kv_batch(results: &[KvDstResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();

    let mut summary = format!(
        "KV DST Summary\n\
         ==============\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n",
        total,
        passed,
        total - passed,
        total_ops
    );

    for result in results.iter().filter(|r| !r.is_success()) {
        summary.push_str(&format!("  {}\n", result.summary()));
        for violation in &result.invariant_violations {
            summary.push_str(&format!("    - {}\n", violation));
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_run() {
        let mut a = KvDstHarness::with_seed(7);
        let mut b = KvDstHarness::with_seed(7);
        a.run(300);
        b.run(300);
        assert_eq!(a.result().summary(), b.result().summary());
        assert_eq!(a.engine().len(), b.engine().len());
    }

    #[test]
    fn test_shadow_cas_gate() {
        let mut doc = ShadowDoc {
            content: b"v".to_vec(),
            cas: 10,
            previous_cas: Some(4),
            expires_at_ms: None,
            lock: None,
        };
        assert_eq!(doc.cas_gate(0), None);
        assert_eq!(doc.cas_gate(10), None);
        assert_eq!(doc.cas_gate(4), Some(ErrorKind::CasMismatch));

        doc.lock = Some(ShadowLock {
            cas: 11,
            deadline_ms: 100,
        });
        assert_eq!(doc.cas_gate(0), Some(ErrorKind::CasMismatch));
        assert_eq!(doc.cas_gate(10), Some(ErrorKind::CasMismatch));
        assert_eq!(doc.cas_gate(11), None);
    }

    #[test]
    fn test_shadow_resolve_releases_lease_before_expiry() {
        let mut shadow = ShadowState::default();
        shadow.store("a", b"v".to_vec(), 1, Some(2_000));
        shadow.store("b", b"v".to_vec(), 2, None);
        if let Some(doc) = shadow.docs.get_mut("b") {
            doc.lock = Some(ShadowLock {
                cas: 3,
                deadline_ms: 1_500,
            });
        }

        shadow.resolve(1_500);
        assert!(shadow.get("b").is_some_and(|d| d.lock.is_none()));
        assert_eq!(shadow.len(), 2);

        shadow.resolve(2_000);
        assert!(shadow.get("a").is_none());
        assert_eq!(shadow.len(), 1);
    }
}
