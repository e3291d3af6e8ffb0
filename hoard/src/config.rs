//! Configuration for the history core.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::interface::HistoryError;
use crate::models::{NormalizeOptions, DEFAULT_PREVIEW_CHARS};

pub const DEFAULT_MAX_UNPINNED_ITEMS: usize = 100;

/// Runtime configuration. Missing fields in a config file take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Cap on unpinned rows (default: 100). A cap stored in the database wins.
    pub max_unpinned_items: usize,

    /// Delay between clipboard polls in milliseconds (default: 500).
    pub poll_interval_ms: u64,

    /// Whether text differing only in case is a distinct item (default: true).
    pub dedup_case_sensitive: bool,

    /// Upper bound on a single clipboard read (default: 250).
    pub source_read_timeout_ms: u64,

    /// How long a copy-back stays recognizable as our own write (default: 2000).
    pub echo_window_ms: u64,

    /// Preview length in characters (default: 100).
    pub preview_chars: usize,

    /// How long a writer waits for the store before giving up with `Busy` (default: 200).
    pub busy_wait_ms: u64,

    /// Database file. Defaults to `<data dir>/hoard/history.sqlite`.
    pub database_path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_unpinned_items: DEFAULT_MAX_UNPINNED_ITEMS,
            poll_interval_ms: 500,
            dedup_case_sensitive: true,
            source_read_timeout_ms: 250,
            echo_window_ms: 2000,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            busy_wait_ms: 200,
            database_path: None,
        }
    }
}

impl HistoryConfig {
    /// Load configuration from a JSON file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| HistoryError::Config(format!("failed to read config: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HistoryError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| HistoryError::Config(format!("failed to create config dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| HistoryError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| HistoryError::Config(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), HistoryError> {
        if self.max_unpinned_items == 0 {
            return Err(HistoryError::Config("max_unpinned_items must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(HistoryError::Config("poll_interval_ms must be positive".into()));
        }
        if self.preview_chars == 0 {
            return Err(HistoryError::Config("preview_chars must be positive".into()));
        }
        Ok(())
    }

    /// Configured database path, or the platform default.
    pub fn resolved_database_path(&self) -> Result<PathBuf, HistoryError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => default_database_path(),
        }
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            case_sensitive: self.dedup_case_sensitive,
            preview_chars: self.preview_chars,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn source_read_timeout(&self) -> Duration {
        Duration::from_millis(self.source_read_timeout_ms)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }

    pub fn busy_wait(&self) -> Duration {
        Duration::from_millis(self.busy_wait_ms)
    }
}

pub fn default_data_dir() -> Result<PathBuf, HistoryError> {
    dirs::data_dir()
        .map(|dir| dir.join("hoard"))
        .ok_or_else(|| HistoryError::Config("could not determine data directory".into()))
}

pub fn default_database_path() -> Result<PathBuf, HistoryError> {
    Ok(default_data_dir()?.join("history.sqlite"))
}

pub fn default_config_path() -> Result<PathBuf, HistoryError> {
    dirs::config_dir()
        .map(|dir| dir.join("hoard").join("config.json"))
        .ok_or_else(|| HistoryError::Config("could not determine config directory".into()))
}
