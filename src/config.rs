use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Direct-I/O write buffer sizing for the shard-data builder, §6.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TableBuilderConfig {
    pub block_size: usize,
    pub write_buffer_size: usize,
}

impl Default for TableBuilderConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            write_buffer_size: 64 * 1024,
        }
    }
}

/// Full engine configuration (§6, §10.1). Loadable from TOML or built
/// programmatically; every field has a sensible default so tests can
/// override only what they care about.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory for data (`.sst`) and sidecar (`.idx`) files.
    pub dir: PathBuf,
    /// Whether commits fsync before acknowledgement.
    pub sync_writes: bool,
    /// Target bytes per memtable; governs switching.
    pub max_memtable_size: usize,
    /// Soft bound on frozen memtables before stalling producers.
    pub num_memtables: usize,
    /// Number of column families.
    pub num_cfs: usize,
    pub table_builder: TableBuilderConfig,
    /// `tracing` filter directive, e.g. `"info"` or `"shardkv=debug"`.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            sync_writes: false,
            max_memtable_size: 64 * 1024 * 1024,
            num_memtables: 8,
            num_cfs: 1,
            table_builder: TableBuilderConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: EngineConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }
}
