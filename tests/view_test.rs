//! View queries through a bucket
//!
//! A thousand user documents indexed by name (map only) and by age
//! (map + `_count`).

use docstore::{
    Bucket, Cluster, ClusterConfig, DesignDocument, Document, ErrorKind, Reducer, SimulatedClock,
    Stale, ViewDefinition, ViewQuery,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USERS: usize = 1000;

fn users_design() -> DesignDocument {
    DesignDocument::new("users")
        .with_view(
            "by_name",
            ViewDefinition::json_map(|_, doc, emitter| {
                if let Some(name) = doc.get("name") {
                    emitter.emit(name.clone(), Value::Null);
                }
            }),
        )
        .with_view(
            "by_age",
            ViewDefinition::json_map(|_, doc, emitter| {
                if let Some(age) = doc.get("age") {
                    emitter.emit(age.clone(), Value::Null);
                }
            })
            .with_reduce(Reducer::Count),
        )
}

async fn setup() -> (Cluster, Bucket) {
    let cluster = Cluster::connect_with_clock(ClusterConfig::test(), Arc::new(SimulatedClock::default()))
        .await
        .unwrap();
    let bucket = cluster.open_default_bucket().unwrap();
    bucket.keyspace().put_design_document(users_design());

    for i in 0..USERS {
        let doc = Document::json(
            format!("user::{}", i),
            &json!({"name": format!("user{:04}", i), "age": 20 + (i % 50)}),
        )
        .unwrap();
        bucket.upsert(&doc).await.unwrap();
    }
    (cluster, bucket)
}

#[tokio::test]
async fn test_map_view_returns_every_row_in_key_order() {
    let (_cluster, bucket) = setup().await;
    let result = bucket
        .query_json("users", "by_name", &json!({"stale": false}))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.len(), USERS);
    assert_eq!(result.total_rows(), Some(USERS as u64));
    let keys: Vec<&str> = result.iter().map(|r| r.key.as_str().unwrap()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(result.rows[42].id.as_deref(), Some("user::42"));
}

#[tokio::test]
async fn test_reduce_false_on_map_view_is_identical() {
    let (_cluster, bucket) = setup().await;
    let plain = bucket
        .query_json("users", "by_name", &json!({"stale": false}))
        .await
        .unwrap();
    let unreduced = bucket
        .query_json("users", "by_name", &json!({"stale": false, "reduce": false}))
        .await
        .unwrap();
    assert_eq!(plain.rows, unreduced.rows);
}

#[tokio::test]
async fn test_count_reduce_single_row() {
    let (_cluster, bucket) = setup().await;
    let result = bucket
        .query_json("users", "by_age", &json!({"stale": false}))
        .await
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].key, Value::Null);
    assert_eq!(result.rows[0].value, json!(USERS));
    assert!(result.rows[0].id.is_none());
}

#[tokio::test]
async fn test_reduce_false_on_reduce_view_returns_map_rows() {
    let (_cluster, bucket) = setup().await;
    let result = bucket
        .query("users", "by_age", ViewQuery::new().stale(Stale::UpdateBefore).reduce(false))
        .await
        .unwrap();
    assert_eq!(result.len(), USERS);
    assert_eq!(result.total_rows(), Some(USERS as u64));
    assert_eq!(result.rows[0].key, json!(20));
}

#[tokio::test]
async fn test_group_by_age() {
    let (_cluster, bucket) = setup().await;
    let result = bucket
        .query("users", "by_age", ViewQuery::new().stale(Stale::UpdateBefore).group(true))
        .await
        .unwrap();

    assert_eq!(result.len(), 50);
    assert!(result.iter().all(|r| r.value == json!(USERS / 50)));
    assert_eq!(result.rows[0].key, json!(20));
    assert_eq!(result.rows[49].key, json!(69));
}

#[tokio::test]
async fn test_key_and_range_filters() {
    let (_cluster, bucket) = setup().await;
    let one = bucket
        .query_json("users", "by_name", &json!({"stale": false, "key": "user0042"}))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one.rows[0].id.as_deref(), Some("user::42"));

    let range = bucket
        .query_json(
            "users",
            "by_name",
            &json!({"stale": false, "startkey": "user0010", "endkey": "user0019"}),
        )
        .await
        .unwrap();
    assert_eq!(range.len(), 10);

    let page = bucket
        .query_json(
            "users",
            "by_name",
            &json!({"stale": false, "descending": true, "skip": 1, "limit": 3}),
        )
        .await
        .unwrap();
    let keys: Vec<&Value> = page.iter().map(|r| &r.key).collect();
    assert_eq!(keys, vec![&json!("user0998"), &json!("user0997"), &json!("user0996")]);
}

#[tokio::test]
async fn test_unknown_option_rejected() {
    let (_cluster, bucket) = setup().await;
    let err = bucket
        .query_json("users", "by_name", &json!({"stale": false, "frobnicate": true}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = bucket
        .query_json("users", "by_name", &json!({"stale": "sometimes"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_unknown_view() {
    let (_cluster, bucket) = setup().await;
    let err = bucket
        .query("users", "by_height", ViewQuery::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ViewNotFound);
}

#[tokio::test]
async fn test_stale_ok_serves_snapshot_until_refreshed() {
    let (_cluster, bucket) = setup().await;
    let baseline = bucket
        .query("users", "by_name", ViewQuery::new().stale(Stale::UpdateBefore))
        .await
        .unwrap();
    assert_eq!(baseline.len(), USERS);

    bucket
        .upsert(&Document::json("user::new", &json!({"name": "zed", "age": 99})).unwrap())
        .await
        .unwrap();

    let stale = bucket.query("users", "by_name", ViewQuery::new()).await.unwrap();
    assert_eq!(stale.len(), USERS);

    // Served from the old snapshot, then refreshed.
    let after = bucket
        .query("users", "by_name", ViewQuery::new().stale(Stale::UpdateAfter))
        .await
        .unwrap();
    assert_eq!(after.len(), USERS);

    let fresh = bucket.query("users", "by_name", ViewQuery::new()).await.unwrap();
    assert_eq!(fresh.len(), USERS + 1);
}

#[tokio::test]
async fn test_slow_view_hits_the_view_timeout() {
    let mut config = ClusterConfig::test();
    config.timeouts.view = Duration::from_millis(20);
    let cluster = Cluster::connect_with_clock(config, Arc::new(SimulatedClock::default()))
        .await
        .unwrap();
    let bucket = cluster.open_default_bucket().unwrap();
    bucket.keyspace().put_design_document(DesignDocument::new("slow").with_view(
        "crawl",
        ViewDefinition::json_map(|id, _, emitter| {
            std::thread::sleep(Duration::from_millis(30));
            emitter.emit(json!(id), Value::Null);
        }),
    ));
    for i in 0..5 {
        bucket
            .upsert(&Document::json(format!("doc::{}", i), &json!({"n": i})).unwrap())
            .await
            .unwrap();
    }

    let started = Instant::now();
    let err = bucket
        .query_json("slow", "crawl", &json!({"stale": false}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(
        started.elapsed() < Duration::from_millis(140),
        "deadline fired after {:?}",
        started.elapsed()
    );

    let patient = bucket.with_view_timeout(Duration::from_secs(5));
    let result = patient
        .query("slow", "crawl", ViewQuery::new().stale(Stale::UpdateBefore))
        .await
        .unwrap();
    assert_eq!(result.len(), 5);
}
