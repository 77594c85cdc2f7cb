use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStorage;
use crate::strategy::DEFAULT_NETWORK_TIMEOUT;

/// Asset manifest and worker settings, as written in `shellcache.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL the worker controls; asset identifiers resolve against it
  pub scope: Url,
  /// Deployment label; combined with the date to form the generation tag
  pub epoch: String,
  /// Page served when a navigation fails with nothing cached for it
  #[serde(default = "default_start_url")]
  pub start_url: String,
  #[serde(default)]
  pub core_assets: Vec<String>,
  #[serde(default)]
  pub static_assets: Vec<String>,
  /// Budget for the network leg of network-first, in milliseconds
  #[serde(default = "default_network_timeout_ms")]
  pub network_timeout_ms: u64,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file holding the partitions (defaults to the user data dir)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// `tracing-subscriber` filter directives, e.g. `shellcache=debug`
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      directory: None,
    }
  }
}

fn default_start_url() -> String {
  "./index.html".to_string()
}

fn default_network_timeout_ms() -> u64 {
  DEFAULT_NETWORK_TIMEOUT.as_millis() as u64
}

fn default_log_filter() -> String {
  "shellcache=info".to_string()
}

/// Validated configuration with every identifier resolved to a URL.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub scope: Url,
  pub epoch: String,
  pub start_url: Url,
  pub core_assets: Vec<Url>,
  pub static_assets: Vec<Url>,
  pub network_timeout: Duration,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => p.to_path_buf(),
      Some(p) => return Err(eyre!("Config file not found: {}", p.display())),
      None => {
        let local = PathBuf::from("shellcache.yaml");
        if !local.exists() {
          return Err(eyre!(
            "No configuration file found. Create shellcache.yaml or pass an explicit path."
          ));
        }
        local
      }
    };

    Self::load_from_path(&path)
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Resolve asset identifiers against the scope and check the manifest.
  ///
  /// The start URL must be one of the core assets, and every asset must
  /// share the scope's origin.
  pub fn settings(&self) -> Result<WorkerSettings> {
    if self.epoch.trim().is_empty() {
      return Err(eyre!("epoch must not be empty"));
    }
    if self.network_timeout_ms == 0 {
      return Err(eyre!("network_timeout_ms must be greater than zero"));
    }

    let start_url = self.resolve(&self.start_url)?;
    let core_assets = self.resolve_all(&self.core_assets)?;
    let static_assets = self.resolve_all(&self.static_assets)?;

    if !core_assets.contains(&start_url) {
      return Err(eyre!(
        "start_url {} is not listed in core_assets",
        self.start_url
      ));
    }

    Ok(WorkerSettings {
      scope: self.scope.clone(),
      epoch: self.epoch.clone(),
      start_url,
      core_assets,
      static_assets,
      network_timeout: Duration::from_millis(self.network_timeout_ms),
    })
  }

  /// Open the SQLite partition store this config points at.
  pub fn open_storage(&self) -> Result<SqliteStorage> {
    let storage = match &self.storage.path {
      Some(path) => SqliteStorage::open_at(path),
      None => SqliteStorage::open(),
    };
    storage.map_err(|e| eyre!("Failed to open cache storage: {}", e))
  }

  fn resolve(&self, identifier: &str) -> Result<Url> {
    let url = self
      .scope
      .join(identifier)
      .map_err(|e| eyre!("Invalid asset identifier {:?}: {}", identifier, e))?;

    if url.origin() != self.scope.origin() {
      return Err(eyre!(
        "Asset {} is outside the scope origin {}",
        url,
        self.scope.origin().ascii_serialization()
      ));
    }

    Ok(url)
  }

  fn resolve_all(&self, identifiers: &[String]) -> Result<Vec<Url>> {
    identifiers.iter().map(|id| self.resolve(id)).collect()
  }
}
