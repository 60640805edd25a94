use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::durable::LogDb;
use crate::error::{DataError, DataResult};
use crate::memory::MemoryDb;
use crate::traits::Db;
use crate::wal::SyncMode;

/// Default directory for database files.
pub const DEFAULT_DATA_DIR: &str = ".cxo";

/// File name of the log inside the data directory.
pub const LOG_FILE: &str = "cxo.log";

/// How much of the root chain `add_root` checks beyond the structural rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    /// Accept any non-zero `prev` at `seq > 0`. Continuity is left to the
    /// replication layer, which verifies signatures.
    #[default]
    Trusting,
    /// Also reject a root whose `prev` disagrees with the root at `seq - 1`,
    /// or whose hash disagrees with `prev` of the root at `seq + 1`, when
    /// those roots are present.
    Strict,
}

/// Database configuration.
///
/// Every field has a default, so a TOML file only needs to name what it
/// changes:
///
/// ```toml
/// data_dir = "/var/lib/cxo"
/// chain = "strict"
/// sync_mode = { mode = "every_write" }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Keep everything in memory; nothing touches the disk.
    pub in_memory: bool,
    /// Directory holding database files.
    pub data_dir: PathBuf,
    /// Explicit log path. Defaults to `<data_dir>/cxo.log`.
    pub db_path: Option<PathBuf>,
    /// Flush/sync strategy of the log.
    pub sync_mode: SyncMode,
    /// Root chain checks on insertion.
    pub chain: ChainPolicy,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            in_memory: false,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            db_path: None,
            sync_mode: SyncMode::default(),
            chain: ChainPolicy::default(),
        }
    }
}

impl DbConfig {
    /// A configuration for a purely in-memory database.
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Default::default()
        }
    }

    /// Path of the log file.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(LOG_FILE))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> DataResult<Self> {
        toml::from_str(s).map_err(|e| DataError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> DataResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Open the configured backend.
    pub fn open(&self) -> DataResult<Arc<dyn Db>> {
        if self.in_memory {
            info!(chain = ?self.chain, "opening in-memory database");
            return Ok(Arc::new(MemoryDb::with_policy(self.chain)));
        }
        fs::create_dir_all(&self.data_dir)?;
        let db = LogDb::open(&self.db_path(), self.sync_mode, self.chain)?;
        Ok(Arc::new(db))
    }
}
