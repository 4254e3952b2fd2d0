use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// How cache files are brought into memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Map the file read-only.
    #[default]
    Mmap,
    /// Read the whole file into an owned buffer.
    Buffered,
}

/// Where metadata caches live and how they are read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one file per cache, named after the cache.
    pub cache_dir: PathBuf,
    pub read_mode: ReadMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".objmeta/cache"),
            read_mode: ReadMode::default(),
        }
    }
}

impl CacheConfig {
    /// Default settings rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> CacheResult<Self> {
        toml::from_str(s).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> CacheResult<String> {
        toml::to_string(self).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Path of the file backing the cache called `name`.
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }
}
