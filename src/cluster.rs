//! Cluster and keyspaces.
//!
//! `Cluster::connect` builds every configured keyspace: its engine, replica
//! set, durability coordinator and default in-memory index, plus the
//! background replication pump and expiry sweeper. Buckets are handles onto
//! those keyspaces.

use crate::bucket::Bucket;
use crate::clock::{Clock, ProductionClock};
use crate::config::{ClusterConfig, KeyspaceConfig};
use crate::durability::DurabilityCoordinator;
use crate::error::{Error, Result};
use crate::kv::{ExpirySweeper, KvEngine};
use crate::replication::{mutation_channel, ReplicaSet, ReplicationPump};
use crate::view::{DesignDocument, InMemoryIndex, IndexService, ViewEngine};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything one named keyspace is made of
pub struct Keyspace {
    config: KeyspaceConfig,
    engine: Arc<KvEngine>,
    replicas: Arc<ReplicaSet>,
    durability: DurabilityCoordinator,
    index: Arc<InMemoryIndex>,
    views: RwLock<ViewEngine>,
}

impl Keyspace {
    /// Build the keyspace and spawn its background tasks on the current runtime.
    fn start(
        config: KeyspaceConfig,
        cluster: &ClusterConfig,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Keyspace>, Vec<JoinHandle<()>>) {
        let (tx, rx) = mutation_channel();
        let engine = Arc::new(KvEngine::with_mutation_stream(
            cluster.engine.clone(),
            clock.clone(),
            tx,
        ));
        let replicas = Arc::new(ReplicaSet::new(config.replicas, clock));
        let durability = DurabilityCoordinator::new(replicas.clone(), cluster.timeouts.durability);
        let index = Arc::new(InMemoryIndex::new(engine.clone()));
        let views = RwLock::new(ViewEngine::new(index.clone()));

        let pump = ReplicationPump::new(rx, replicas.clone(), &cluster.replication);
        let sweeper = ExpirySweeper::new(engine.clone())
            .with_replicas(replicas.clone(), cluster.replication.tombstone_retention);
        let tasks = vec![tokio::spawn(pump.run()), tokio::spawn(sweeper.run())];

        let keyspace = Arc::new(Keyspace {
            config,
            engine,
            replicas,
            durability,
            index,
            views,
        });
        (keyspace, tasks)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn replica_count(&self) -> u8 {
        self.config.replicas
    }

    pub fn engine(&self) -> &KvEngine {
        &self.engine
    }

    pub fn replicas(&self) -> &Arc<ReplicaSet> {
        &self.replicas
    }

    pub fn durability(&self) -> &DurabilityCoordinator {
        &self.durability
    }

    /// The built-in index; views added here are served unless another index is attached.
    pub fn index(&self) -> &Arc<InMemoryIndex> {
        &self.index
    }

    pub fn put_design_document(&self, design: DesignDocument) {
        self.index.put_design_document(design);
    }

    /// Route view queries to a different index subsystem.
    pub fn attach_index(&self, index: Arc<dyn IndexService>) {
        *self.views.write() = ViewEngine::new(index);
    }

    pub fn views(&self) -> ViewEngine {
        self.views.read().clone()
    }
}

impl std::fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("name", &self.config.name)
            .field("replicas", &self.config.replicas)
            .finish()
    }
}

pub struct Cluster {
    config: ClusterConfig,
    keyspaces: HashMap<String, Arc<Keyspace>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Closed flags of the handles this cluster opened
    handles: Mutex<Vec<Weak<AtomicBool>>>,
    disconnected: AtomicBool,
}

impl Cluster {
    /// Connect using wall-clock time. Must run inside a tokio runtime.
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        Self::connect_with_clock(config, Arc::new(ProductionClock::new())).await
    }

    pub async fn connect_with_clock(mut config: ClusterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.seed_nodes.is_empty() {
            config.seed_nodes.push(crate::config::DEFAULT_SEED_NODE.to_string());
        }
        config.validate()?;

        let limit = config.timeouts.connect;
        let mut keyspaces = HashMap::new();
        let mut tasks = Vec::new();
        let build = async {
            for keyspace_config in &config.keyspaces {
                let (keyspace, handles) =
                    Keyspace::start(keyspace_config.clone(), &config, clock.clone());
                keyspaces.insert(keyspace_config.name.clone(), keyspace);
                tasks.extend(handles);
                // Give the connect deadline a chance to fire between keyspaces.
                tokio::task::yield_now().await;
            }
        };
        if tokio::time::timeout(limit, build).await.is_err() {
            for task in &tasks {
                task.abort();
            }
            warn!(?limit, started = keyspaces.len(), "Connect timed out");
            return Err(Error::Timeout {
                operation: "connect",
                after: limit,
            });
        }

        info!(
            seed_nodes = ?config.seed_nodes,
            keyspaces = keyspaces.len(),
            "Cluster connected"
        );
        Ok(Cluster {
            config,
            keyspaces,
            tasks: Mutex::new(tasks),
            handles: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn seed_nodes(&self) -> &[String] {
        &self.config.seed_nodes
    }

    pub fn keyspace(&self, name: &str) -> Option<Arc<Keyspace>> {
        self.keyspaces.get(name).cloned()
    }

    /// Open a new handle on a keyspace.
    pub fn open_bucket(&self, name: &str, password: &str) -> Result<Bucket> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(Error::ClusterDisconnected);
        }
        let keyspace = self
            .keyspaces
            .get(name)
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))?;
        if keyspace.config.password != password {
            warn!(bucket = name, "Rejected bucket credentials");
            return Err(Error::Authentication {
                bucket: name.to_string(),
            });
        }

        let closed = Arc::new(AtomicBool::new(false));
        let mut handles = self.handles.lock();
        handles.retain(|handle| handle.strong_count() > 0);
        handles.push(Arc::downgrade(&closed));
        drop(handles);
        info!(bucket = name, "Bucket opened");
        Ok(Bucket::new(keyspace.clone(), closed, self.config.timeouts.clone()))
    }

    /// The `default` keyspace with an empty password.
    pub fn open_default_bucket(&self) -> Result<Bucket> {
        self.open_bucket("default", "")
    }

    /// Handles opened by this cluster that are still held somewhere.
    pub fn open_handles(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| handle.strong_count() > 0)
            .count()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Close every handle this cluster opened and stop background work.
    /// Returns true the first time.
    pub async fn disconnect(&self) -> bool {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return false;
        }
        for closed in self.handles.lock().drain(..).filter_map(|h| h.upgrade()) {
            closed.store(true, Ordering::Release);
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        let limit = self.config.timeouts.disconnect;
        if tokio::time::timeout(limit, join_all(tasks)).await.is_err() {
            warn!(?limit, "Background tasks did not stop before the disconnect timeout");
        }
        info!("Cluster disconnected");
        true
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("seed_nodes", &self.config.seed_nodes)
            .field("keyspaces", &self.keyspaces.len())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}
