use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::TtlPolicy;
use crate::coordinator::DEFAULT_COALESCE_WINDOW;
use crate::realtime::DEFAULT_CAPACITY;
use crate::reporter::DEFAULT_DEBOUNCE;
use crate::resources::ResourceKind;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub errors: ErrorsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
  /// REST base URL, e.g. https://staff.example.com/api
  pub url: String,
  /// WebSocket URL of the push channel
  pub push_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Per-resource TTL overrides keyed by resource name
  pub ttl_secs: BTreeMap<String, u64>,
  pub analytics_ttl_secs: u64,
  pub coalesce_window_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: BTreeMap::new(),
      analytics_ttl_secs: 300,
      coalesce_window_secs: DEFAULT_COALESCE_WINDOW.as_secs(),
    }
  }
}

impl CacheConfig {
  pub fn ttl_policy(&self) -> TtlPolicy {
    self
      .ttl_secs
      .iter()
      .filter_map(|(name, secs)| Some((name.parse::<ResourceKind>().ok()?, *secs)))
      .fold(
        TtlPolicy::default().with_analytics_ttl(Duration::from_secs(self.analytics_ttl_secs)),
        |policy, (kind, secs)| policy.with_ttl(kind, Duration::from_secs(secs)),
      )
  }

  pub fn coalesce_window(&self) -> Duration {
    Duration::from_secs(self.coalesce_window_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  /// Entries kept before the oldest is dropped
  pub capacity: usize,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
  pub debounce_ms: u64,
}

impl Default for ErrorsConfig {
  fn default() -> Self {
    Self {
      debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
    }
  }
}

impl ErrorsConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }
}

/// How to authenticate against the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
  Token {
    token: String,
    user_id: String,
    role: String,
  },
  Login { email: String, password: String },
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./staffsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/staffsync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/staffsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("staffsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("staffsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.api.url.trim().is_empty() {
      return Err(eyre!("api.url must be set"));
    }
    for name in self.cache.ttl_secs.keys() {
      name
        .parse::<ResourceKind>()
        .map_err(|e| eyre!("cache.ttl_secs: {}", e))?;
    }
    if self.notifications.capacity == 0 {
      return Err(eyre!("notifications.capacity must be at least 1"));
    }
    Ok(())
  }

  /// Read credentials from the environment.
  ///
  /// STAFFSYNC_TOKEN wins (with STAFFSYNC_USER_ID and an optional
  /// STAFFSYNC_ROLE naming its owner); otherwise STAFFSYNC_EMAIL and
  /// STAFFSYNC_PASSWORD are used for a login round-trip.
  pub fn credentials() -> Result<Credentials> {
    if let Ok(token) = std::env::var("STAFFSYNC_TOKEN") {
      let user_id = std::env::var("STAFFSYNC_USER_ID")
        .map_err(|_| eyre!("STAFFSYNC_TOKEN is set but STAFFSYNC_USER_ID is not."))?;
      let role = std::env::var("STAFFSYNC_ROLE").unwrap_or_else(|_| "employee".to_string());
      return Ok(Credentials::Token {
        token,
        user_id,
        role,
      });
    }
    match (
      std::env::var("STAFFSYNC_EMAIL"),
      std::env::var("STAFFSYNC_PASSWORD"),
    ) {
      (Ok(email), Ok(password)) => Ok(Credentials::Login { email, password }),
      _ => Err(eyre!(
        "No credentials found. Set STAFFSYNC_TOKEN, or STAFFSYNC_EMAIL and STAFFSYNC_PASSWORD."
      )),
    }
  }
}
