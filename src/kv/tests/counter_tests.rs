//! Counter tests - creation, increment, decrement, floor policy

use super::{engine, engine_with};
use crate::config::{CounterFloor, EngineConfig};
use crate::document::Document;
use crate::error::{Error, ErrorKind};
use std::collections::HashSet;
use std::time::Duration;

fn values_and_cas(
    kv: &crate::kv::KvEngine,
    key: &str,
    delta: i64,
    initial: i64,
    rounds: usize,
) -> (Vec<String>, HashSet<u64>) {
    let mut values = Vec::new();
    let mut cas = HashSet::new();
    for _ in 0..rounds {
        let doc = kv.counter(key, delta, Some(initial), 0).unwrap();
        values.push(doc.content_str().unwrap().to_string());
        cas.insert(doc.cas());
    }
    (values, cas)
}

#[test]
fn test_increment_from_initial() {
    let (kv, _) = engine();
    let (values, cas) = values_and_cas(&kv, "c", 10, 0, 3);
    assert_eq!(values, vec!["0", "10", "20"]);
    assert_eq!(cas.len(), 3, "cas values must be pairwise distinct");
}

#[test]
fn test_decrement_from_initial() {
    let (kv, _) = engine();
    let (values, cas) = values_and_cas(&kv, "c", -10, 100, 3);
    assert_eq!(values, vec!["100", "90", "80"]);
    assert_eq!(cas.len(), 3);
}

#[test]
fn test_missing_without_initial_is_not_found() {
    let (kv, _) = engine();
    assert!(kv.counter("c", 1, None, 0).unwrap_err().is_not_found());
}

#[test]
fn test_decrement_floors_at_zero_by_default() {
    let (kv, _) = engine();
    kv.counter("c", 0, Some(5), 0).unwrap();
    let doc = kv.counter("c", -10, None, 0).unwrap();
    assert_eq!(doc.content_str(), Some("0"));
}

#[test]
fn test_unbounded_floor_goes_negative() {
    let config = EngineConfig {
        counter_floor: CounterFloor::Unbounded,
        ..EngineConfig::default()
    };
    let (kv, _) = engine_with(config);
    kv.counter("c", 0, Some(5), 0).unwrap();
    let doc = kv.counter("c", -10, None, 0).unwrap();
    assert_eq!(doc.content_str(), Some("-5"));
}

#[test]
fn test_non_numeric_content() {
    let (kv, _) = engine();
    kv.upsert(&Document::new("c", "hello")).unwrap();
    assert_eq!(
        kv.counter("c", 1, Some(0), 0).unwrap_err().kind(),
        ErrorKind::NotNumeric
    );
}

#[test]
fn test_overflow_is_reported() {
    let (kv, _) = engine();
    kv.upsert(&Document::new("c", i64::MAX.to_string())).unwrap();
    match kv.counter("c", 1, None, 0) {
        Err(Error::CounterOverflow { current, delta, .. }) => {
            assert_eq!(current, i64::MAX);
            assert_eq!(delta, 1);
        }
        other => panic!("expected overflow, got {:?}", other),
    }
}

#[test]
fn test_expiry_applies_only_on_creation() {
    let (kv, clock) = engine();
    kv.counter("c", 1, Some(1), 10).unwrap();

    clock.advance(Duration::from_secs(5));
    // A later expiry argument does not extend the counter.
    kv.counter("c", 1, Some(1), 100).unwrap();

    clock.advance(Duration::from_secs(5));
    assert!(kv.get("c").unwrap().is_none());
}
