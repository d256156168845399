//! Configuration
//!
//! Loaded from a TOML file, then overridden by environment variables:
//! - `FEATURESTORE_ROOT`: store root directory
//! - `FEATURESTORE_PARTITION_SIZE`: default partition size (default: 10000)
//! - `FEATURESTORE_WORKER_CONCURRENCY`: concurrent units per worker pool (default: 4)
//! - `FEATURESTORE_WORKER_ID`: worker id (default: generated)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::DEFAULT_PARTITION_SIZE;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment variable present but unparsable
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Maximum concurrent unit executions
    pub concurrency: usize,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            concurrency: 4,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set maximum concurrency
    pub fn with_concurrency(mut self, max: usize) -> Self {
        self.concurrency = max.max(1);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Feature store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureStoreConfig {
    /// Root directory of feature files, batch arguments and the catalog
    pub root_dir: PathBuf,

    /// Partition size for features without a batch size
    pub default_partition_size: u64,

    pub worker: WorkerConfig,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./featurestore-data"),
            default_partition_size: DEFAULT_PARTITION_SIZE,
            worker: WorkerConfig::default(),
        }
    }
}

impl FeatureStoreConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML file if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        base.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(root) = lookup("FEATURESTORE_ROOT") {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(size) = parse_env(&lookup, "FEATURESTORE_PARTITION_SIZE")? {
            self = self.with_default_partition_size(size);
        }
        if let Some(concurrency) = parse_env(&lookup, "FEATURESTORE_WORKER_CONCURRENCY")? {
            self.worker = self.worker.with_concurrency(concurrency);
        }
        if let Some(id) = lookup("FEATURESTORE_WORKER_ID") {
            self.worker.worker_id = id;
        }
        Ok(self)
    }

    pub fn with_root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = root.into();
        self
    }

    pub fn with_default_partition_size(mut self, size: u64) -> Self {
        self.default_partition_size = size.max(1);
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

fn parse_env<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
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
