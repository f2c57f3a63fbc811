//! Cluster Configuration
//!
//! Loaded from TOML, with a handful of environment overrides applied on top.
//! Durations are written in milliseconds.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | DOCSTORE_SEED_NODES | Comma-separated seed hosts |
//! | DOCSTORE_CONNECT_TIMEOUT_MS | Connect timeout |
//! | DOCSTORE_KV_TIMEOUT_MS | Key-value operation timeout |
//! | DOCSTORE_VIEW_TIMEOUT_MS | View query timeout |
//! | DOCSTORE_DURABILITY_TIMEOUT_MS | Default durability wait |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Highest replica count a keyspace may be configured with
pub const MAX_REPLICAS: u8 = 3;

pub const DEFAULT_SEED_NODE: &str = "127.0.0.1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub seed_nodes: Vec<String>,
    pub timeouts: TimeoutConfig,
    pub engine: EngineConfig,
    pub replication: ReplicationConfig,
    pub keyspaces: Vec<KeyspaceConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            seed_nodes: vec![DEFAULT_SEED_NODE.to_string()],
            timeouts: TimeoutConfig::default(),
            engine: EngineConfig::default(),
            replication: ReplicationConfig::default(),
            keyspaces: vec![KeyspaceConfig::default()],
        }
    }
}

impl ClusterConfig {
    /// Configuration for tests: no replication lag, tight timeouts
    pub fn test() -> Self {
        ClusterConfig {
            timeouts: TimeoutConfig::test(),
            engine: EngineConfig::test(),
            replication: ReplicationConfig::test(),
            ..Default::default()
        }
    }

    pub fn with_keyspace(mut self, keyspace: KeyspaceConfig) -> Self {
        self.keyspaces.retain(|k| k.name != keyspace.name);
        self.keyspaces.push(keyspace);
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: ClusterConfig = toml::from_str(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: ClusterConfig = toml::from_str(&raw)?;
        config.apply_env();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(nodes) = lookup("DOCSTORE_SEED_NODES") {
            self.seed_nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(d) = millis("DOCSTORE_CONNECT_TIMEOUT_MS") {
            self.timeouts.connect = d;
        }
        if let Some(d) = millis("DOCSTORE_KV_TIMEOUT_MS") {
            self.timeouts.kv = d;
        }
        if let Some(d) = millis("DOCSTORE_VIEW_TIMEOUT_MS") {
            self.timeouts.view = d;
        }
        if let Some(d) = millis("DOCSTORE_DURABILITY_TIMEOUT_MS") {
            self.timeouts.durability = d;
        }
    }

    fn normalize(&mut self) {
        if self.seed_nodes.is_empty() {
            self.seed_nodes.push(DEFAULT_SEED_NODE.to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for keyspace in &self.keyspaces {
            if keyspace.name.is_empty() {
                return Err(Error::Config("keyspace name must not be empty".into()));
            }
            if !seen.insert(keyspace.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate keyspace: {}",
                    keyspace.name
                )));
            }
            if keyspace.replicas > MAX_REPLICAS {
                return Err(Error::Config(format!(
                    "keyspace {} has {} replicas, maximum is {}",
                    keyspace.name, keyspace.replicas, MAX_REPLICAS
                )));
            }
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("connect", t.connect),
            ("kv", t.kv),
            ("view", t.view),
            ("disconnect", t.disconnect),
            ("durability", t.durability),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} timeout must be non-zero", name)));
            }
        }

        if self.engine.sweep_interval.is_zero() {
            return Err(Error::Config("sweep_interval must be non-zero".into()));
        }
        if self.engine.default_lock_time.is_zero() {
            return Err(Error::Config("default_lock_time must be non-zero".into()));
        }
        if self.engine.default_lock_time > self.engine.max_lock_time {
            return Err(Error::Config(
                "default_lock_time exceeds max_lock_time".into(),
            ));
        }
        if let Some(faults) = &self.replication.faults {
            if !(0.0..=1.0).contains(&faults.drop_probability) {
                return Err(Error::Config(
                    "drop_probability must be within 0.0..=1.0".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Client-side deadlines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "duration_millis")]
    pub connect: Duration,
    #[serde(with = "duration_millis")]
    pub kv: Duration,
    #[serde(with = "duration_millis")]
    pub view: Duration,
    #[serde(with = "duration_millis")]
    pub disconnect: Duration,
    /// Default wait for persist_to / replicate_to acknowledgements
    #[serde(with = "duration_millis")]
    pub durability: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            connect: Duration::from_secs(5),
            kv: Duration::from_millis(2500),
            view: Duration::from_secs(75),
            disconnect: Duration::from_secs(5),
            durability: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    pub fn test() -> Self {
        TimeoutConfig {
            connect: Duration::from_secs(1),
            kv: Duration::from_secs(1),
            view: Duration::from_secs(5),
            disconnect: Duration::from_secs(1),
            durability: Duration::from_millis(500),
        }
    }
}

/// What a decrement does when it would go below zero
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CounterFloor {
    /// Clamp at zero
    #[default]
    Zero,
    /// Allow negative values down to i64::MIN
    Unbounded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub counter_floor: CounterFloor,
    /// Lease used when get_and_lock is called with 0 or an out-of-range time
    #[serde(with = "duration_millis")]
    pub default_lock_time: Duration,
    #[serde(with = "duration_millis")]
    pub max_lock_time: Duration,
    /// How often the background sweeper reclaims expired keys
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            counter_floor: CounterFloor::Zero,
            default_lock_time: Duration::from_secs(15),
            max_lock_time: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    pub fn test() -> Self {
        EngineConfig {
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Lag before a mutation lands in replica memory
    #[serde(with = "duration_millis")]
    pub replication_delay: Duration,
    /// Lag before a node reports a mutation as persisted
    #[serde(with = "duration_millis")]
    pub persistence_delay: Duration,
    /// How long nodes keep tombstones and expired records before the sweeper drops them
    #[serde(with = "duration_millis")]
    pub tombstone_retention: Duration,
    pub faults: Option<FaultConfig>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            replication_delay: Duration::ZERO,
            persistence_delay: Duration::ZERO,
            tombstone_retention: Duration::from_secs(60),
            faults: None,
        }
    }
}

impl ReplicationConfig {
    pub fn test() -> Self {
        ReplicationConfig::default()
    }
}

/// Seeded fault injection for replica acknowledgements
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FaultConfig {
    pub seed: u64,
    /// Probability that a replica silently drops a mutation
    pub drop_probability: f64,
    /// Upper bound of random extra latency per apply
    #[serde(with = "duration_millis")]
    pub max_extra_delay: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        FaultConfig {
            seed: 0,
            drop_probability: 0.01,
            max_extra_delay: Duration::from_millis(5),
        }
    }
}

/// One named keyspace served by the cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyspaceConfig {
    pub name: String,
    pub password: String,
    pub replicas: u8,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        KeyspaceConfig {
            name: "default".to_string(),
            password: String::new(),
            replicas: 1,
        }
    }
}

impl KeyspaceConfig {
    pub fn new(name: impl Into<String>, replicas: u8) -> Self {
        KeyspaceConfig {
            name: name.into(),
            password: String::new(),
            replicas,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.seed_nodes, vec!["127.0.0.1".to_string()]);
        assert_eq!(config.timeouts.kv, Duration::from_millis(2500));
        assert_eq!(config.timeouts.view, Duration::from_secs(75));
        assert_eq!(config.engine.default_lock_time, Duration::from_secs(15));
        assert_eq!(config.keyspaces[0].name, "default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            seed_nodes = []

            [timeouts]
            kv = 750

            [engine]
            counter_floor = "unbounded"

            [replication]
            tombstone_retention = 2000

            [[keyspaces]]
            name = "users"
            password = "secret"
            replicas = 2
        "#;
        let config = ClusterConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.seed_nodes, vec!["127.0.0.1".to_string()]);
        assert_eq!(config.timeouts.kv, Duration::from_millis(750));
        assert_eq!(config.timeouts.connect, Duration::from_secs(5));
        assert_eq!(config.engine.counter_floor, CounterFloor::Unbounded);
        assert_eq!(config.replication.tombstone_retention, Duration::from_secs(2));
        assert_eq!(config.keyspaces.len(), 1);
        assert_eq!(config.keyspaces[0].replicas, 2);
    }

    #[test]
    fn test_validate_rejects_bad_keyspaces() {
        let too_many = ClusterConfig::default().with_keyspace(KeyspaceConfig::new("big", 4));
        assert!(too_many.validate().is_err());

        let mut dup = ClusterConfig::default();
        dup.keyspaces.push(KeyspaceConfig::default());
        assert!(dup.validate().is_err());

        let mut zero = ClusterConfig::default();
        zero.timeouts.kv = Duration::ZERO;
        assert!(zero.validate().is_err());

        let mut no_lease = ClusterConfig::default();
        no_lease.engine.default_lock_time = Duration::ZERO;
        assert!(no_lease.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DOCSTORE_KV_TIMEOUT_MS", "100"),
            ("DOCSTORE_SEED_NODES", "10.0.0.1, 10.0.0.2"),
            ("DOCSTORE_VIEW_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ClusterConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.timeouts.kv, Duration::from_millis(100));
        assert_eq!(config.timeouts.view, Duration::from_secs(75));
        assert_eq!(config.seed_nodes, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[keyspaces]]\nname = \"orders\"\nreplicas = 3").unwrap();

        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(config.keyspaces[0].name, "orders");
        assert_eq!(config.keyspaces[0].replicas, 3);

        assert!(ClusterConfig::load("/nonexistent/docstore.toml").is_err());
    }
}
