use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::placement::{PlacementConfig, Size};

/// About a century.
const MAX_RETENTION_MS: u128 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Configuration snapshot read by the preview pipeline.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Master switch; when off, hover events are ignored
  pub enabled: bool,
  /// Debounce between hover-enter and the fetch
  pub hover_delay_ms: u64,
  /// How long a cached record stays fresh
  pub cache_ttl_ms: u64,
  pub prefetch_enabled: bool,
  /// Ceiling on network fetches running at once
  pub max_concurrent_fetches: usize,
  pub fetch_timeout_ms: u64,
  /// Cap on outstanding prefetches
  pub prefetch_batch_size: usize,
  pub prefetch_interval_ms: u64,
  /// Entries stale for this many TTLs are pruned
  pub prune_grace: i32,
  /// Keep the cache across restarts
  pub persist_cache: bool,
  /// Cache database location (defaults to the data directory)
  pub cache_path: Option<PathBuf>,
  pub user_agent: String,
  pub placement: PlacementConfig,
  /// Size of the preview widget used for placement
  pub preview: Size,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      enabled: true,
      hover_delay_ms: 300,
      cache_ttl_ms: 24 * 60 * 60 * 1000,
      prefetch_enabled: false,
      max_concurrent_fetches: 4,
      fetch_timeout_ms: 5_000,
      prefetch_batch_size: 2,
      prefetch_interval_ms: 2_000,
      prune_grace: 7,
      persist_cache: true,
      cache_path: None,
      user_agent: concat!("itabs/", env!("CARGO_PKG_VERSION")).to_string(),
      placement: PlacementConfig::default(),
      preview: Size {
        width: 360.0,
        height: 240.0,
      },
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./itabs.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/itabs/config.yaml
  ///
  /// Without any file the defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("itabs.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("itabs").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Reject values the pipeline cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.cache_ttl_ms == 0 {
      return Err(eyre!("cache_ttl_ms must be greater than zero"));
    }
    if self.fetch_timeout_ms == 0 {
      return Err(eyre!("fetch_timeout_ms must be greater than zero"));
    }
    if self.max_concurrent_fetches == 0 {
      return Err(eyre!("max_concurrent_fetches must be at least 1"));
    }
    if self.prefetch_batch_size == 0 {
      return Err(eyre!("prefetch_batch_size must be at least 1"));
    }
    if self.prefetch_interval_ms == 0 {
      return Err(eyre!("prefetch_interval_ms must be greater than zero"));
    }
    if self.prune_grace < 1 {
      return Err(eyre!("prune_grace must be at least 1"));
    }
    // Pruning computes ttl * (prune_grace + 1) as a date offset
    let retention_ms = u128::from(self.cache_ttl_ms) * (self.prune_grace as u128 + 1);
    if retention_ms > MAX_RETENTION_MS {
      return Err(eyre!(
        "cache_ttl_ms * (prune_grace + 1) must not exceed {} ms",
        MAX_RETENTION_MS
      ));
    }
    if self.preview.width <= 0.0 || self.preview.height <= 0.0 {
      return Err(eyre!("preview width and height must be positive"));
    }
    if self.placement.margin < 0.0 || self.placement.gap < 0.0 {
      return Err(eyre!("placement margin and gap must not be negative"));
    }
    Ok(())
  }

  pub fn hover_delay(&self) -> Duration {
    Duration::from_millis(self.hover_delay_ms)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_millis(self.fetch_timeout_ms)
  }

  pub fn prefetch_interval(&self) -> Duration {
    Duration::from_millis(self.prefetch_interval_ms)
  }

  pub fn cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(self.cache_ttl_ms).unwrap_or(i64::MAX))
  }

  /// Resolved cache database path.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache_path {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

/// Per-user data directory for the cache and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("itabs"))
}
