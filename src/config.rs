use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::storage::SqliteStorage;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Where the journal and cache databases live (default: $XDG_DATA_HOME/moonmood)
  pub data_dir: Option<PathBuf>,
  #[serde(default)]
  pub log: LogConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Filter directive, e.g. "debug" or "moonmood=trace". RUST_LOG wins when set.
  pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every partition of this app
  pub family: String,
  /// Bump whenever the caching policy changes
  pub version: u32,
  /// Base URL that relative `fetch` paths resolve against
  pub origin: Option<Url>,
  /// Give up on the network for page loads after this many seconds
  pub network_timeout_secs: Option<u64>,
  pub pages_max_entries: usize,
  pub images_max_entries: usize,
  pub images_max_age_days: i64,
  /// App-shell URLs fetched into the precache partition on install.
  /// Relative paths resolve against `origin`.
  pub precache: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      family: "moonmood-offline".to_string(),
      version: 1,
      origin: None,
      network_timeout_secs: None,
      pages_max_entries: 50,
      images_max_entries: 60,
      images_max_age_days: 30,
      precache: Vec::new(),
    }
  }
}

impl CacheConfig {
  /// Full, versioned name of the partition for `kind`.
  pub fn partition_name(&self, kind: &str) -> String {
    format!("{}-v{}-{}", self.family, self.version, kind)
  }

  /// Whether `name` belongs to this app, whatever its version.
  pub fn owns_partition(&self, name: &str) -> bool {
    name.starts_with(&format!("{}-", self.family))
  }

  /// Absolute URLs of the precache list.
  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    self
      .precache
      .iter()
      .map(|entry| self.resolve(entry))
      .collect()
  }

  /// Parse `input` as an absolute URL, or join it onto `origin`.
  pub fn resolve(&self, input: &str) -> Result<Url> {
    match Url::parse(input) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => {
        let origin = self
          .origin
          .as_ref()
          .ok_or_else(|| eyre!("Relative URL {} needs cache.origin in the config", input))?;
        origin
          .join(input)
          .map_err(|e| eyre!("Invalid URL {}: {}", input, e))
      }
      Err(e) => Err(eyre!("Invalid URL {}: {}", input, e)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./moonmood.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/moonmood/config.yaml
  ///
  /// With no file anywhere the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("moonmood.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("moonmood").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    config.cache.precache_urls()?;
    Ok(config)
  }

  /// Resolved data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => SqliteStorage::default_data_dir(),
    }
  }
}
