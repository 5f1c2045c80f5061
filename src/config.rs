//! Repository configuration
//!
//! Every tunable lives in [`RepoConfig`] with its default in one `Default`
//! impl. [`RepoConfig::from_env`] overlays environment variables, and
//! [`RepoConfig::validate`] rejects values the engine cannot work with.

use crate::store::DiskSpec;
use crate::{Error, Result};
use std::time::Duration;

/// 1 MiB chunks
pub const CHUNK_1MIB: usize = 1024 * 1024;

/// 10 MiB chunks
pub const CHUNK_10MIB: usize = 10 * 1024 * 1024;

/// Largest accepted chunk size
pub const MAX_CHUNK_SIZE: usize = CHUNK_10MIB;

/// Default fan-out of file DAG nodes
pub const DEFAULT_MAX_LINKS: usize = 174;

/// Upper bound on fan-out, keeps an encoded file node well under 64 KiB
pub const MAX_LINKS_LIMIT: usize = 1024;

/// Default live-node watermark of the staging tree
pub const DEFAULT_LIVE_NODE_WATERMARK: usize = 256 << 10;

/// Default number of pending blocks per write batch
pub const DEFAULT_BATCH_MAX_NODES: usize = 128;

/// Default byte size of pending blocks per write batch
pub const DEFAULT_BATCH_MAX_BYTES: usize = 100 << 20;

/// Default interval between storage usage scans
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default usage percentage at which a repository counts as full
pub const DEFAULT_THRESHOLD: f64 = 70.0;

/// Limits of the in-memory staging tree used during one import
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingConfig {
    /// Flush once this many nodes are live in memory
    pub live_node_watermark: usize,
    /// Flush once this many sealed blocks are pending
    pub batch_max_nodes: usize,
    /// Flush once pending blocks hold this many bytes
    pub batch_max_bytes: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        StagingConfig {
            live_node_watermark: DEFAULT_LIVE_NODE_WATERMARK,
            batch_max_nodes: DEFAULT_BATCH_MAX_NODES,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
        }
    }
}

/// Import parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportConfig {
    pub chunk_size: usize,
    pub max_links_per_node: usize,
    pub staging: StagingConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            chunk_size: CHUNK_1MIB,
            max_links_per_node: DEFAULT_MAX_LINKS,
            staging: StagingConfig::default(),
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size)?;
        if !(2..=MAX_LINKS_LIMIT).contains(&self.max_links_per_node) {
            return Err(Error::InvalidInput(format!(
                "max links per node must be within 2..={}, got {}",
                MAX_LINKS_LIMIT, self.max_links_per_node
            )));
        }
        let staging = &self.staging;
        if staging.live_node_watermark == 0
            || staging.batch_max_nodes == 0
            || staging.batch_max_bytes == 0
        {
            return Err(Error::InvalidInput(
                "staging limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check a chunk size is usable
pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(Error::InvalidInput(format!(
            "chunk size must be within 1..={}, got {}",
            MAX_CHUNK_SIZE, chunk_size
        )));
    }
    Ok(())
}

/// Storage usage monitor parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UsageConfig {
    pub scan_interval: Duration,
    /// Percentage (0, 100] at which the repository reports full
    pub threshold: f64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        UsageConfig {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl UsageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval.is_zero() {
            return Err(Error::InvalidInput(
                "scan interval must be positive".to_string(),
            ));
        }
        if !(self.threshold > 0.0 && self.threshold <= 100.0) {
            return Err(Error::InvalidInput(format!(
                "threshold must be within (0, 100], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Everything needed to open a repository
#[derive(Clone, Debug, PartialEq)]
pub struct RepoConfig {
    /// Identifier of the device backing the repository
    pub uuid: String,
    /// Capacity budget in bytes
    pub max_storage: u64,
    /// Backend descriptor used when the repository is first initialized
    pub disk_spec: DiskSpec,
    /// Write blocks even if already present
    pub write_through: bool,
    /// Addresses whose presence the block store remembers, 0 to disable
    pub block_cache_size: usize,
    pub import: ImportConfig,
    pub usage: UsageConfig,
}

impl Default for RepoConfig {
    fn default() -> Self {
        RepoConfig {
            uuid: String::new(),
            max_storage: 100 * 1024 * 1024 * 1024,
            disk_spec: DiskSpec::default(),
            write_through: true,
            block_cache_size: 0,
            import: ImportConfig::default(),
            usage: UsageConfig::default(),
        }
    }
}

impl RepoConfig {
    /// Defaults overlaid with `BLOCKREPO_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = RepoConfig::default();

        if let Some(chunk_size) = env_parse::<usize>("BLOCKREPO_CHUNK_SIZE")? {
            config.import.chunk_size = chunk_size;
        }
        if let Some(max_storage) = env_parse::<u64>("BLOCKREPO_MAX_STORAGE")? {
            config.max_storage = max_storage;
        }
        if let Some(secs) = env_parse::<u64>("BLOCKREPO_SCAN_INTERVAL_SECS")? {
            config.usage.scan_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_parse::<f64>("BLOCKREPO_THRESHOLD")? {
            config.usage.threshold = threshold;
        }
        if let Some(size) = env_parse::<usize>("BLOCKREPO_BLOCK_CACHE_SIZE")? {
            config.block_cache_size = size;
        }
        if let Ok(uuid) = std::env::var("BLOCKREPO_UUID") {
            config.uuid = uuid;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_storage == 0 {
            return Err(Error::InvalidInput(
                "max storage must be positive".to_string(),
            ));
        }
        self.import.validate()?;
        self.usage.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, value, e))),
        Err(_) => Ok(None),
    }
}
