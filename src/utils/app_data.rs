use crate::index::types::{
    IndexConfig, NgramLength, DEFAULT_MAX_BUFFER_BYTES, DEFAULT_MAX_FILENAME_LENGTH,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "bytegram";
const CONFIG_FILE: &str = "config.json";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bytes per n-gram (3 or 4)
    #[serde(default)]
    pub ngram_length: NgramLength,

    /// Buffered postings bytes that trigger a shard flush
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: u64,

    /// Catalog slot width for new indexes, NUL padding included
    #[serde(default = "default_max_filename_length")]
    pub max_filename_length: u16,

    /// Files per shard before a flush is forced (0 = unlimited)
    #[serde(default)]
    pub max_files_per_shard: u32,

    /// Worker threads for indexing and search.
    /// If 0, uses the number of CPU cores
    #[serde(default)]
    pub threads: usize,

    /// Record only the file name in the catalog rather than the path as given
    #[serde(default = "default_store_basename")]
    pub store_basename: bool,
}

fn default_max_buffer_bytes() -> u64 {
    DEFAULT_MAX_BUFFER_BYTES
}

fn default_max_filename_length() -> u16 {
    DEFAULT_MAX_FILENAME_LENGTH
}

fn default_store_basename() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ngram_length: NgramLength::default(),
            max_buffer_bytes: default_max_buffer_bytes(),
            max_filename_length: default_max_filename_length(),
            max_files_per_shard: 0,
            threads: 0,
            store_basename: default_store_basename(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        match get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load config from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Get the effective thread count (resolves 0 to CPU count)
    pub fn effective_threads(&self) -> usize {
        resolve_threads(self.threads)
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            ngram_length: self.ngram_length,
            max_buffer_bytes: self.max_buffer_bytes,
            max_filename_length: self.max_filename_length,
            max_files_per_shard: self.max_files_per_shard,
        }
    }
}

/// 0 means one thread per CPU
pub fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        threads
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Option<PathBuf> {
    get_app_data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Option<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    base.map(|b| b.join(APP_NAME))
}
