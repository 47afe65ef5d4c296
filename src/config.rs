//! Runtime configuration
//!
//! Values come from an optional TOML file; command line flags override
//! them afterwards. Every key is optional:
//!
//! ```toml
//! root = "/srv/generated"
//! database = "/var/lib/image-index/images.db"
//! scan_interval_secs = 60
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Seconds between two recent-window scans
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory tree holding the generated images
    pub root: PathBuf,
    /// SQLite index file; `None` means the per-user default location
    pub database: Option<PathBuf>,
    pub scan_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
            database: None,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Load a config file. `None` returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Where the index database lives.
    ///
    /// Defaults to the user's data directory:
    /// - Linux: ~/.local/share/image-index/images.db
    /// - macOS: ~/Library/Application Support/image-index/images.db
    /// - Windows: %APPDATA%\image-index\images.db
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoDataDir)?;
        path.push("image-index");
        path.push("images.db");
        Ok(path)
    }

    pub fn scan_interval(&self) -> Duration {
        // A zero interval would make tokio's interval panic
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}
