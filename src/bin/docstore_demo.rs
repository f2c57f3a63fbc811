//! Docstore Demo
//!
//! Connects to an embedded cluster, opens the default bucket and walks
//! through the main operations: writes, reads, counters, locking and a view.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | DOCSTORE_CONFIG | (none) | Path to a TOML cluster config |
//! | DOCSTORE_SEED_NODES | 127.0.0.1 | Comma-separated seed hosts |
//! | DOCSTORE_KV_TIMEOUT_MS | 2500 | Key-value operation timeout |
//! | DOCSTORE_DURABILITY_TIMEOUT_MS | 5000 | Default durability wait |
//! | RUST_LOG | info | Log filter |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use docstore::{
    Cluster, ClusterConfig, CounterOptions, DesignDocument, Document, MutationOptions, PersistTo,
    Reducer, Stale, ViewDefinition, ViewQuery,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1).or_else(|| std::env::var("DOCSTORE_CONFIG").ok()) {
        Some(path) => ClusterConfig::load(path)?,
        None => {
            let mut config = ClusterConfig::default();
            config.apply_env();
            config
        }
    };

    let cluster = Cluster::connect(config).await?;
    let bucket = cluster.open_default_bucket()?;

    println!("Docstore Demo");
    println!("=============");
    println!();

    let stored = bucket
        .upsert_with(
            &Document::json("user::ann", &json!({"name": "ann", "age": 34}))?,
            MutationOptions::new().persist_to(PersistTo::Master),
        )
        .await?;
    println!("upsert user::ann       cas={}", stored.cas());

    if let Some(doc) = bucket.get("user::ann").await? {
        println!("get user::ann          {}", doc.content_str().unwrap_or("<binary>"));
    }

    let visits = bucket
        .counter("visits", 1, CounterOptions::new().initial(100))
        .await?;
    println!("counter visits         {}", visits.content_str().unwrap_or("?"));

    let locked = bucket.get_and_lock("user::ann", 5).await?;
    println!("get_and_lock user::ann cas={}", locked.cas());
    bucket.unlock("user::ann", locked.cas()).await?;
    println!("unlock user::ann");

    bucket.keyspace().put_design_document(
        DesignDocument::new("users").with_view(
            "by_age",
            ViewDefinition::json_map(|_, doc, emitter| {
                if let Some(age) = doc.get("age") {
                    emitter.emit(age.clone(), json!(1));
                }
            })
            .with_reduce(Reducer::Count),
        ),
    );
    let result = bucket
        .query("users", "by_age", ViewQuery::new().stale(Stale::UpdateBefore))
        .await?;
    for row in result.iter() {
        println!("view users/by_age      key={} value={}", row.key, row.value);
    }

    bucket.close();
    cluster.disconnect().await;
    info!("Demo finished");
    Ok(())
}
