//! Key-value engine tests, grouped by concern.

mod counter_tests;

use super::KvEngine;
use crate::clock::SimulatedClock;
use crate::config::EngineConfig;
use std::sync::Arc;

fn engine() -> (KvEngine, SimulatedClock) {
    engine_with(EngineConfig::default())
}

fn engine_with(config: EngineConfig) -> (KvEngine, SimulatedClock) {
    let clock = SimulatedClock::default();
    (KvEngine::new(config, Arc::new(clock.clone())), clock)
}
