//! Document store client core.
//!
//! A clustered key-value document store reached through bucket handles:
//! CAS-guarded mutations, pessimistic locks, counters, expiry, durability
//! acknowledgements from replica nodes, and map/reduce view queries.

pub mod bucket;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod document;
pub mod durability;
pub mod error;
pub mod kv;
pub mod replication;
pub mod view;

pub use bucket::{Bucket, CounterOptions, MutationOptions, ReplicaSelector};
pub use clock::{Clock, ProductionClock, SimulatedClock, Timestamp};
pub use cluster::{Cluster, Keyspace};
pub use config::{ClusterConfig, CounterFloor, KeyspaceConfig};
pub use document::Document;
pub use durability::{PersistTo, ReplicateTo};
pub use error::{Error, ErrorKind, Result};
pub use view::{DesignDocument, Reducer, Stale, ViewDefinition, ViewQuery, ViewResult, ViewRow};
