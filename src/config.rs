use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::db::Database;
use crate::router::Routes;

/// Environment variable that overrides `delivery.endpoint`.
pub const ENDPOINT_ENV: &str = "POSTLANE_ENDPOINT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub delivery: DeliveryConfig,
  pub cache: CacheConfig,
  pub mock_api: MockApiConfig,
  pub connectivity: ConnectivityConfig,
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
  /// Remote endpoint messages are POSTed to
  pub endpoint: String,
  pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
  fn default() -> Self {
    Self {
      endpoint: "https://httpbin.org/post".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub prefix: String,
  /// Bumping this rotates the cache generation
  pub version: String,
  /// Base URL that precache and fallback paths resolve against
  pub origin: String,
  /// Fetched on install; the fallback document is always added
  pub precache: Vec<String>,
  pub fallback: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "postlane".to_string(),
      version: "v1".to_string(),
      origin: "http://localhost:8080".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/offline.html".to_string(),
      ],
      fallback: "/offline.html".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockApiConfig {
  pub path: String,
  /// Probability in [0, 1] that the simulated backend answers 500
  pub failure_rate: f64,
}

impl Default for MockApiConfig {
  fn default() -> Self {
    Self {
      path: "/api/send-message".to_string(),
      failure_rate: 0.2,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Defaults to the delivery endpoint
  pub probe_url: Option<String>,
  pub interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database file (default: $XDG_DATA_HOME/postlane/postlane.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./postlane.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/postlane/config.yaml
  ///
  /// With no file found the built-in defaults are used.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
      config.delivery.endpoint = endpoint;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("postlane.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("postlane").join("config.yaml");
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
    // An empty file deserializes to null rather than an empty mapping
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  fn validate(&self) -> Result<()> {
    self.endpoint()?;
    self.routes()?;
    if !(0.0..=1.0).contains(&self.mock_api.failure_rate) {
      return Err(eyre!(
        "mock_api.failure_rate must be between 0 and 1, got {}",
        self.mock_api.failure_rate
      ));
    }
    if self.connectivity.interval_secs == 0 {
      return Err(eyre!("connectivity.interval_secs must be at least 1"));
    }
    Ok(())
  }

  pub fn endpoint(&self) -> Result<Url> {
    Url::parse(&self.delivery.endpoint)
      .map_err(|e| eyre!("Invalid delivery.endpoint {}: {}", self.delivery.endpoint, e))
  }

  pub fn probe_url(&self) -> Result<Url> {
    match &self.connectivity.probe_url {
      Some(url) => {
        Url::parse(url).map_err(|e| eyre!("Invalid connectivity.probe_url {}: {}", url, e))
      }
      None => self.endpoint(),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.delivery.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.interval_secs)
  }

  /// Cache generation name for the configured version.
  pub fn generation(&self) -> String {
    format!("{}-{}", self.cache.prefix, self.cache.version)
  }

  pub fn routes(&self) -> Result<Routes> {
    let origin = Url::parse(&self.cache.origin)
      .map_err(|e| eyre!("Invalid cache.origin {}: {}", self.cache.origin, e))?;
    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid cache path {}: {}", path, e))
    };

    let fallback = resolve(&self.cache.fallback)?;
    let mut precache = self
      .cache
      .precache
      .iter()
      .map(|p| resolve(p))
      .collect::<Result<Vec<_>>>()?;
    if !precache.contains(&fallback) {
      precache.push(fallback.clone());
    }

    Ok(Routes {
      mock_path: self.mock_api.path.clone(),
      fallback,
      precache,
      generation: self.generation(),
    })
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => Database::default_path()
        .ok_or_else(|| eyre!("Could not determine data directory; set storage.path")),
    }
  }
}
