//! Seeded fault injection for the replication pump.
//!
//! Given the same seed, the same mutations are dropped and delayed in the
//! same places, so a failing durability test replays exactly.

use crate::config::FaultConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

pub struct FaultInjector {
    rng: ChaCha8Rng,
    config: FaultConfig,
    dropped: u64,
}

impl FaultInjector {
    pub fn new(config: FaultConfig) -> Self {
        FaultInjector {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            dropped: 0,
        }
    }

    /// Whether the next replica apply should be lost.
    pub fn should_drop(&mut self) -> bool {
        let drop = self
            .rng
            .gen_bool(self.config.drop_probability.clamp(0.0, 1.0));
        if drop {
            self.dropped += 1;
        }
        drop
    }

    pub fn extra_delay(&mut self) -> Duration {
        let max = self.config.max_extra_delay.as_micros() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.rng.gen_range(0..max))
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64, drop_probability: f64) -> FaultConfig {
        FaultConfig {
            seed,
            drop_probability,
            max_extra_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_same_seed_same_decisions() {
        let mut a = FaultInjector::new(config(7, 0.3));
        let mut b = FaultInjector::new(config(7, 0.3));

        let run_a: Vec<bool> = (0..64).map(|_| a.should_drop()).collect();
        let run_b: Vec<bool> = (0..64).map(|_| b.should_drop()).collect();
        assert_eq!(run_a, run_b);
        assert_eq!(a.dropped(), b.dropped());
    }

    #[test]
    fn test_probability_bounds() {
        let mut never = FaultInjector::new(config(1, 0.0));
        let mut always = FaultInjector::new(config(1, 1.0));
        for _ in 0..32 {
            assert!(!never.should_drop());
            assert!(always.should_drop());
        }
        assert_eq!(always.dropped(), 32);
    }

    #[test]
    fn test_extra_delay_within_bound() {
        let mut faults = FaultInjector::new(config(3, 0.0));
        for _ in 0..32 {
            assert!(faults.extra_delay() < Duration::from_millis(2));
        }
    }
}
