//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These benchmarks measure the engine paths every bucket call goes
//! through: upsert, get, counter and CAS replace, plus view key collation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docstore::config::EngineConfig;
use docstore::kv::KvEngine;
use docstore::view::collate;
use docstore::{Document, ProductionClock};
use serde_json::json;
use std::sync::Arc;

fn engine() -> KvEngine {
    KvEngine::new(EngineConfig::default(), Arc::new(ProductionClock::new()))
}

/// Benchmark KvEngine::upsert with various value sizes
fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert");
    group.throughput(Throughput::Elements(1));

    for value_len in [64, 256, 1024] {
        let doc = Document::new("benchmark_key", vec![b'x'; value_len]);
        group.bench_with_input(BenchmarkId::new("value_len", value_len), &doc, |b, doc| {
            let kv = engine();
            b.iter(|| kv.upsert(black_box(doc)))
        });
    }

    group.finish();
}

/// Benchmark KvEngine::get for hits and misses
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    let kv = engine();
    for i in 0..1000 {
        let _ = kv.upsert(&Document::new(format!("key:{}", i), format!("value:{}", i)));
    }

    group.bench_function("hit", |b| b.iter(|| kv.get(black_box("key:500"))));
    group.bench_function("miss", |b| b.iter(|| kv.get(black_box("nonexistent"))));

    group.finish();
}

fn bench_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter");
    group.throughput(Throughput::Elements(1));

    let kv = engine();
    group.bench_function("increment", |b| {
        b.iter(|| kv.counter(black_box("hits"), 1, Some(0), 0))
    });

    group.finish();
}

/// Read-then-CAS-replace, the optimistic update loop
fn bench_cas_replace(c: &mut Criterion) {
    let kv = engine();
    let _ = kv.upsert(&Document::new("doc", "v"));

    c.bench_function("cas_replace", |b| {
        b.iter(|| {
            let cas = kv.get("doc").ok().flatten().map(|d| d.cas()).unwrap_or(0);
            kv.replace(&Document::new("doc", "v").with_cas(cas))
        })
    });
}

fn bench_collate(c: &mut Criterion) {
    let mut group = c.benchmark_group("collate");

    let cases = [
        ("strings", json!("user0042"), json!("user0043")),
        ("numbers", json!(42), json!(42.5)),
        ("arrays", json!(["eu", 2024, 3]), json!(["eu", 2024, 4])),
        ("mixed", json!({"a": 1}), json!([1, 2, 3])),
    ];
    for (name, left, right) in cases {
        group.bench_function(name, |b| b.iter(|| collate(black_box(&left), black_box(&right))));
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_upsert,
    bench_get,
    bench_counter,
    bench_cas_replace,
    bench_collate,
);

criterion_main!(benches);
