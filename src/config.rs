use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collection::{Keyed, OrderedCollection};
use crate::constants::{
    ALWAYS_VISIBLE_FOLDERS, DEFAULT_BATCH_SIZE, DEFAULT_INITIAL_BATCHES,
    DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_SYNC_INTERVAL_MS, DEFAULT_UNDO_MS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Configured mail accounts, in display order
    #[serde(default)]
    pub accounts: OrderedCollection<AccountConfig>,
    /// Extra folders shown as board columns, in display order
    #[serde(default)]
    pub columns: OrderedCollection<String>,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Unique account key; prefixes every canonical message id
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl AccountConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
        }
    }

    /// Get the display name or fall back to the account key
    pub fn display_name_or_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

impl Keyed for AccountConfig {
    fn key(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Emails requested per fetch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Batches loaded on the first fetch of a folder
    #[serde(default = "default_initial_batches")]
    pub initial_batches: u32,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Undo window for star/move/archive/trash
    #[serde(default = "default_undo_ms")]
    pub undo_ms: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Merge top-level threads sharing a normalized subject
    #[serde(default)]
    pub group_threads_by_subject: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            initial_batches: default_initial_batches(),
            sync_interval_ms: default_sync_interval_ms(),
            undo_ms: default_undo_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            group_threads_by_subject: false,
        }
    }
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_initial_batches() -> u32 {
    DEFAULT_INITIAL_BATCHES
}

fn default_sync_interval_ms() -> u64 {
    DEFAULT_SYNC_INTERVAL_MS
}

fn default_undo_ms() -> u64 {
    DEFAULT_UNDO_MS
}

fn default_max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("mailboard");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn account_keys(&self) -> Vec<String> {
        self.accounts.keys().map(str::to_string).collect()
    }

    /// Folders that back primary navigation
    pub fn always_visible_folders(&self) -> Vec<String> {
        ALWAYS_VISIBLE_FOLDERS.iter().map(|f| f.to_string()).collect()
    }

    pub fn is_always_visible(folder: &str) -> bool {
        ALWAYS_VISIBLE_FOLDERS.contains(&folder)
    }

    /// Every folder that gets a column: navigation aliases first, then the
    /// configured board columns.
    pub fn visible_folders(&self) -> Vec<String> {
        let mut folders = self.always_visible_folders();
        for column in &self.columns {
            if !folders.contains(column) {
                folders.push(column.clone());
            }
        }
        folders
    }

    pub fn undo_delay(&self) -> Duration {
        Duration::from_millis(self.system.undo_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.system.sync_interval_ms)
    }

    /// Batch size used the first time a folder is loaded
    pub fn initial_batch_size(&self) -> u32 {
        self.system.batch_size * self.system.initial_batches.max(1)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            anyhow::bail!(
                "Configuration file not found at {}\n\
                 Please create a config file. Example:\n\n\
                 columns = [\"todo\", \"waiting\"]\n\n\
                 [[accounts]]\n\
                 name = \"work\"\n\n\
                 [system]\n\
                 undo_ms = 5000",
                path.display()
            );
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .accounts
            .validate()
            .with_context(|| format!("Invalid accounts in config file: {}", path.display()))?;
        config
            .columns
            .validate()
            .with_context(|| format!("Invalid columns in config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
