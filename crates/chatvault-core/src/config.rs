//! Configuration and data directory management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Paths to all ChatVault data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Per-chat directories live here (`data/chats/<chat_id>/`).
    pub chats: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            chats: root.join("chats"),
            root,
        };
        std::fs::create_dir_all(&paths.chats)?;
        Ok(paths)
    }

    /// `<chats>/<chat_id>/`
    pub fn chat_dir(&self, chat_id: &str) -> PathBuf {
        self.chats.join(chat_id)
    }

    /// `<chats>/<chat_id>/metadata.json`
    pub fn chat_metadata(&self, chat_id: &str) -> PathBuf {
        self.chat_dir(chat_id).join("metadata.json")
    }

    /// `<chats>/<chat_id>/messages.db/`
    pub fn chat_db(&self, chat_id: &str) -> PathBuf {
        self.chat_dir(chat_id).join("messages.db")
    }
}

/// HNSW graph parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Max neighbors per node per layer (doubled at layer 0).
    pub m: usize,
    /// Candidate list size while inserting.
    pub ef_construction: usize,
    /// Candidate list size while querying.
    pub ef_search: usize,
    /// Highest layer a node can be assigned to.
    pub max_level: usize,
    /// Layer-decay normalization constant. Not read by the coin-flip level sampler.
    pub ml: f64,
    /// RNG seed for level sampling.
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            max_level: 16,
            ml: 1.0 / (16f64).ln(),
            seed: 42,
        }
    }
}

/// When and how the approximate index replaces exact scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnSettings {
    /// Rebuild indexes at `open_chat` and keep them current on writes.
    pub enabled: bool,
    /// A pool switches to ANN retrieval once it holds this many vectors.
    pub threshold: usize,
    pub index: IndexConfig,
}

impl Default for AnnSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 2048,
            index: IndexConfig::default(),
        }
    }
}

/// Top-level ChatVault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatVaultConfig {
    /// Data directory paths.
    pub data_paths: DataPaths,
    pub ann: AnnSettings,
    /// Delay before an assistant reply's embedding is written back.
    pub backfill_delay: Duration,
    /// How long a second handle on a locked chat database waits for the lock.
    pub busy_timeout: Duration,
}

impl ChatVaultConfig {
    pub const DEFAULT_BACKFILL_DELAY: Duration = Duration::from_millis(500);
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Configuration with defaults rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            data_paths: DataPaths::new(data_dir)?,
            ann: AnnSettings::default(),
            backfill_delay: Self::DEFAULT_BACKFILL_DELAY,
            busy_timeout: Self::DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Create configuration from environment and defaults.
    ///
    /// An override that is set but does not parse is a configuration error.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_lookup(data_dir, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        data_dir: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config =
            Self::new(data_dir).map_err(|e| Error::storage("create_data_dir", e))?;

        if let Some(enabled) = parse_var::<bool>(&lookup, "CHATVAULT_ANN_ENABLED")? {
            config.ann.enabled = enabled;
        }
        if let Some(threshold) = parse_var::<usize>(&lookup, "CHATVAULT_ANN_THRESHOLD")? {
            config.ann.threshold = threshold;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "CHATVAULT_BACKFILL_DELAY_MS")? {
            config.backfill_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "CHATVAULT_BUSY_TIMEOUT_MS")? {
            config.busy_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse() {
        Ok(v) => {
            debug!("{} overridden from environment", name);
            Ok(Some(v))
        }
        Err(_) => Err(Error::Config(format!("invalid value for {}: {:?}", name, raw))),
    }
}
