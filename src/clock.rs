//! Clock Abstraction
//!
//! Expiry and lock leases are measured against a `Clock` so tests can move
//! time by hand instead of sleeping.
//!
//! Implementations:
//! - `ProductionClock`: wall time, monotonic after construction
//! - `SimulatedClock`: virtual time, advanced explicitly

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub fn from_unix_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(&self, other: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

/// Time source shared by the engine, replica nodes and index.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;

    fn has_passed(&self, deadline: Timestamp) -> bool {
        self.now() >= deadline
    }
}

/// Wall-clock time anchored at construction
#[derive(Debug, Clone)]
pub struct ProductionClock {
    start: Instant,
    start_millis: u64,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        // A clock set before 1970 degrades to epoch-relative time.
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        ProductionClock {
            start: Instant::now(),
            start_millis,
        }
    }
}

impl Clock for ProductionClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.start.elapsed().as_millis() as u64;
        Timestamp(self.start_millis + elapsed)
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances through `advance()` or `set()`. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicU64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        // 2023-11-14, so absolute expiries in tests look realistic
        Self::new(1_700_000_000_000)
    }
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.time_ms.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.time_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_clock_advances() {
        let clock = ProductionClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.now();

        assert!(t2 > t1, "Time should advance");
        assert!(t1.as_millis() > 1_600_000_000_000, "Should be unix millis");
    }

    #[test]
    fn test_simulated_clock_deterministic() {
        let clock = SimulatedClock::new(1000);
        assert_eq!(clock.now(), clock.now());

        clock.advance_secs(2);
        assert_eq!(clock.now().as_millis(), 3000);

        clock.set(5000);
        assert!(clock.has_passed(Timestamp(5000)));
        assert!(!clock.has_passed(Timestamp(5001)));
    }

    #[test]
    fn test_simulated_clock_shared() {
        let clock = SimulatedClock::new(0);
        let clock2 = clock.clone();

        clock.advance(Duration::from_millis(100));
        assert_eq!(clock2.now().0, 100, "Clones should share state");
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let ts = Timestamp::from_unix_secs(2);
        let ts2 = ts + Duration::from_millis(500);
        assert_eq!(ts2.0, 2500);
        assert_eq!(ts2.saturating_sub(ts), Duration::from_millis(500));
        assert_eq!(ts.saturating_sub(ts2), Duration::ZERO);
    }
}
