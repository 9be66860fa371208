use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::router::Policy;
use crate::sync::PartialAckPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  /// Ordered routing rules, first match wins
  #[serde(default = "default_routes")]
  pub routes: Vec<RouteConfig>,
  /// Policy for requests no rule matches
  #[serde(default)]
  pub default_policy: Policy,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Database file (defaults to $XDG_DATA_HOME/offq/offq.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Batch ingest endpoint used by flush
  #[serde(default = "default_ingest_path")]
  pub ingest_path: String,
  /// Path requested to detect regained connectivity
  #[serde(default = "default_probe_path")]
  pub probe_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
  /// Exact path, or a prefix when it ends with `*`
  pub pattern: String,
  /// Restrict the rule to one method (case-insensitive)
  pub method: Option<String>,
  pub policy: Policy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Generation tag; bump it to roll out a new set of static resources
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Resources fetched on install
  #[serde(default)]
  pub manifest: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Name of the background wake signal registered with the host
  #[serde(default = "default_wake_tag")]
  pub wake_tag: String,
  #[serde(default = "default_wake_interval_secs")]
  pub wake_interval_secs: u64,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
  #[serde(default)]
  pub partial_ack: PartialAckPolicy,
}

fn default_routes() -> Vec<RouteConfig> {
  vec![
    RouteConfig {
      pattern: "/api/review*".to_string(),
      method: Some("POST".to_string()),
      policy: Policy::WriteIntercept,
    },
    RouteConfig {
      pattern: "/api/*".to_string(),
      method: None,
      policy: Policy::Network,
    },
  ]
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_ingest_path() -> String {
  "/api/sync".to_string()
}

fn default_probe_path() -> String {
  "/".to_string()
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_wake_tag() -> String {
  "offq-sync".to_string()
}

fn default_wake_interval_secs() -> u64 {
  300
}

fn default_probe_interval_secs() -> u64 {
  15
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8080".to_string(),
      timeout_secs: default_timeout_secs(),
      ingest_path: default_ingest_path(),
      probe_path: default_probe_path(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      manifest: Vec::new(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      wake_tag: default_wake_tag(),
      wake_interval_secs: default_wake_interval_secs(),
      probe_interval_secs: default_probe_interval_secs(),
      partial_ack: PartialAckPolicy::default(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      server: ServerConfig::default(),
      routes: default_routes(),
      default_policy: Policy::default(),
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offq/config.yaml
  ///
  /// `OFFQ_SERVER_URL` overrides `server.url` afterwards.
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
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/offq/config.yaml\n\
                 See config.example.yaml for the format."
        ))
      }
    };

    if let Ok(url) = std::env::var("OFFQ_SERVER_URL") {
      config.server.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offq.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offq"))
  }

  /// Resolved database path.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("offq.db")),
    }
  }
}
