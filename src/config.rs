use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cache::InvalidationPolicy;

/// Environment variable holding the API bearer token.
pub const TOKEN_ENV: &str = "PRODMAN_API_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Per-entity overrides of the built-in cache policies
  #[serde(default)]
  pub resources: ResourcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base url of the management API, e.g. "http://localhost:3001/api"
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:3001/api".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Keep the query cache on disk between runs
  pub persist: bool,
  /// Cache database location (defaults to $XDG_DATA_HOME/prodman/cache.db)
  pub path: Option<PathBuf>,
  pub fetch_timeout_secs: u64,
  /// Extra attempts after a failed read
  pub retries: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      persist: true,
      path: None,
      fetch_timeout_secs: 30,
      retries: 1,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
  pub employees: Option<PolicyOverride>,
  pub projects: Option<PolicyOverride>,
  pub invoices: Option<PolicyOverride>,
  pub departments: Option<PolicyOverride>,
  pub contract_types: Option<PolicyOverride>,
  pub users: Option<PolicyOverride>,
}

/// Cache policy fields to replace; absent fields keep the built-in value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
  pub stale_time_secs: Option<i64>,
  pub invalidation: Option<InvalidationPolicy>,
  pub keep_previous_data: Option<bool>,
}

impl ResourcesConfig {
  /// Overrides for the entity with the given cache entity type.
  pub fn get(&self, entity_type: &str) -> Option<&PolicyOverride> {
    match entity_type {
      "employees" => self.employees.as_ref(),
      "projects" => self.projects.as_ref(),
      "invoices" => self.invoices.as_ref(),
      "departments" => self.departments.as_ref(),
      "contract_types" => self.contract_types.as_ref(),
      "users" => self.users.as_ref(),
      _ => None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./prodman.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/prodman/config.yaml
  ///
  /// Without a config file the built-in defaults are used.
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
      None => {
        debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("prodman.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("prodman").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    debug!(path = %path.display(), "loading config");
    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!(e))
  }

  /// Get the API token from the environment, if any.
  pub fn get_api_token() -> Option<String> {
    std::env::var(TOKEN_ENV)
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
