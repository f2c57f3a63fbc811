//! Bucket handle.
//!
//! A `Bucket` binds one keyspace to the key-value engine, the durability
//! coordinator and the view engine, and owns the open/closed lifecycle of
//! the handle. Closing is terminal: every later call fails with
//! `BucketClosed`, and a new handle must come from the `Cluster`.
//!
//! Clones share the closed flag; separate `open_bucket` calls do not.

mod options;

pub use options::{CounterOptions, MutationOptions, ReplicaSelector};

use crate::cluster::Keyspace;
use crate::config::{TimeoutConfig, MAX_REPLICAS};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::kv::KvEngine;
use crate::view::{ViewQuery, ViewResult};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Bucket {
    name: String,
    keyspace: Arc<Keyspace>,
    closed: Arc<AtomicBool>,
    timeouts: TimeoutConfig,
}

impl Bucket {
    pub(crate) fn new(keyspace: Arc<Keyspace>, closed: Arc<AtomicBool>, timeouts: TimeoutConfig) -> Self {
        Bucket {
            name: keyspace.name().to_string(),
            keyspace,
            closed,
            timeouts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    /// Copy of this handle with a different key-value timeout.
    ///
    /// A zero timeout is a deadline that has already passed.
    pub fn with_timeout(&self, kv: Duration) -> Bucket {
        let mut bucket = self.clone();
        bucket.timeouts.kv = kv;
        bucket
    }

    /// Copy of this handle with a different view query timeout.
    pub fn with_view_timeout(&self, view: Duration) -> Bucket {
        let mut bucket = self.clone();
        bucket.timeouts.view = view;
        bucket
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the handle. Returns true the first time, false afterwards.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            info!(bucket = %self.name, "Bucket closed");
        }
        first
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::BucketClosed {
                bucket: self.name.clone(),
            });
        }
        Ok(())
    }

    async fn run<T, F>(&self, operation: &'static str, limit: Duration, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_open()?;
        let elapsed = || Error::Timeout {
            operation,
            after: limit,
        };
        // An expired deadline fails before any work is issued.
        if limit.is_zero() {
            return Err(elapsed());
        }
        tokio::time::timeout(limit, op).await.map_err(|_| elapsed())?
    }

    /// Validate durability, write, then wait for the acknowledgements.
    async fn mutate<F>(&self, operation: &'static str, options: MutationOptions, write: F) -> Result<Document>
    where
        F: FnOnce(&KvEngine) -> Result<Document>,
    {
        self.ensure_open()?;
        let requirement = options.requirement();
        requirement.validate(self.keyspace.replica_count())?;

        let doc = self
            .run(operation, self.timeouts.kv, async { write(self.keyspace.engine()) })
            .await?;

        if !requirement.is_none() {
            let wait = options.timeout.unwrap_or(self.timeouts.durability);
            self.keyspace
                .durability()
                .await_durable(doc.id(), doc.cas(), requirement, Some(wait))
                .await?;
            debug!(bucket = %self.name, key = doc.id(), operation, "Mutation durable");
        }
        Ok(doc)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        self.run("get", self.timeouts.kv, async { self.keyspace.engine().get(id) })
            .await
    }

    pub async fn get_multi<S: AsRef<str>>(&self, ids: &[S]) -> Result<HashMap<String, Document>> {
        self.run("get_multi", self.timeouts.kv, async {
            self.keyspace.engine().get_multi(ids)
        })
        .await
    }

    pub async fn get_and_touch(&self, id: &str, expiry: u32) -> Result<Document> {
        self.run("get_and_touch", self.timeouts.kv, async {
            self.keyspace.engine().get_and_touch(id, expiry)
        })
        .await
    }

    pub async fn get_and_lock(&self, id: &str, lock_time: u32) -> Result<Document> {
        self.run("get_and_lock", self.timeouts.kv, async {
            self.keyspace.engine().get_and_lock(id, lock_time)
        })
        .await
    }

    pub async fn unlock(&self, id: &str, cas: u64) -> Result<bool> {
        self.run("unlock", self.timeouts.kv, async {
            self.keyspace.engine().unlock(id, cas)
        })
        .await
    }

    pub async fn touch(&self, id: &str, expiry: u32) -> Result<bool> {
        self.run("touch", self.timeouts.kv, async {
            self.keyspace.engine().touch(id, expiry)
        })
        .await
    }

    /// Possibly-stale read from a replica copy.
    pub async fn get_from_replica(&self, id: &str, selector: ReplicaSelector) -> Result<Option<Document>> {
        self.run("get_from_replica", self.timeouts.kv, async {
            crate::document::validate_key(id)?;
            let replicas = self.keyspace.replicas();
            match selector {
                ReplicaSelector::Index(index) => {
                    if index == 0 || index > MAX_REPLICAS {
                        return Err(Error::invalid(format!(
                            "replica must be within 1..={} or All, got {}",
                            MAX_REPLICAS, index
                        )));
                    }
                    let node = replicas.replica(index).ok_or_else(|| {
                        Error::invalid(format!(
                            "keyspace {} has {} replicas, replica {} requested",
                            self.name,
                            replicas.replica_count(),
                            index
                        ))
                    })?;
                    Ok(node.get(id))
                }
                ReplicaSelector::All => {
                    if let Some(doc) = self.keyspace.engine().get(id)? {
                        return Ok(Some(doc));
                    }
                    Ok(replicas.replicas().iter().find_map(|node| node.get(id)))
                }
            }
        })
        .await
    }

    pub async fn insert(&self, doc: &Document) -> Result<Document> {
        self.insert_with(doc, MutationOptions::default()).await
    }

    pub async fn insert_with(&self, doc: &Document, options: MutationOptions) -> Result<Document> {
        self.mutate("insert", options, |kv| kv.insert(doc)).await
    }

    pub async fn upsert(&self, doc: &Document) -> Result<Document> {
        self.upsert_with(doc, MutationOptions::default()).await
    }

    pub async fn upsert_with(&self, doc: &Document, options: MutationOptions) -> Result<Document> {
        self.mutate("upsert", options, |kv| kv.upsert(doc)).await
    }

    pub async fn replace(&self, doc: &Document) -> Result<Document> {
        self.replace_with(doc, MutationOptions::default()).await
    }

    pub async fn replace_with(&self, doc: &Document, options: MutationOptions) -> Result<Document> {
        self.mutate("replace", options, |kv| kv.replace(doc)).await
    }

    pub async fn remove(&self, doc: &Document) -> Result<Document> {
        self.remove_with(doc, MutationOptions::default()).await
    }

    /// Remove; durability is observed on the removal's cas.
    pub async fn remove_with(&self, doc: &Document, options: MutationOptions) -> Result<Document> {
        self.mutate("remove", options, |kv| kv.remove(doc)).await
    }

    pub async fn append(&self, doc: &Document) -> Result<Document> {
        self.append_with(doc, MutationOptions::default()).await
    }

    pub async fn append_with(&self, doc: &Document, options: MutationOptions) -> Result<Document> {
        self.mutate("append", options, |kv| kv.append(doc)).await
    }

    pub async fn prepend(&self, doc: &Document) -> Result<Document> {
        self.prepend_with(doc, MutationOptions::default()).await
    }

    pub async fn prepend_with(&self, doc: &Document, options: MutationOptions) -> Result<Document> {
        self.mutate("prepend", options, |kv| kv.prepend(doc)).await
    }

    pub async fn counter(&self, id: &str, delta: i64, options: CounterOptions) -> Result<Document> {
        self.mutate("counter", options.durability, |kv| {
            kv.counter(id, delta, options.initial, options.expiry)
        })
        .await
    }

    pub async fn query(&self, design: &str, view: &str, query: ViewQuery) -> Result<ViewResult> {
        self.run("view_query", self.timeouts.view, async {
            self.keyspace.views().query(design, view, query).await
        })
        .await
    }

    /// Run a view with a JSON option object. Unknown options fail before the index is called.
    pub async fn query_json(&self, design: &str, view: &str, options: &Value) -> Result<ViewResult> {
        self.run("view_query", self.timeouts.view, async {
            self.keyspace.views().query_json(design, view, options).await
        })
        .await
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
