use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Cache generation baked into this build. Bumping it invalidates every
/// cache written by a previous deploy.
pub const CACHE_VERSION: &str = "catalog-management-v1.12";

/// Background sync tag routed to the sync coordinator.
pub const SYNC_TAG: &str = "sync-catalogs";

const SHELL_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/manifest.json",
  "/favicon.svg",
  "/icons/icon-72x72.png",
  "/icons/icon-96x96.png",
  "/icons/icon-128x128.png",
  "/icons/icon-144x144.png",
  "/icons/icon-152x152.png",
  "/icons/icon-192x192.png",
  "/icons/icon-384x384.png",
  "/icons/icon-512x512.png",
];

const STATIC_EXTENSIONS: &[&str] = &[".js", ".css", ".png", ".jpg", ".svg"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the client application, e.g. "https://catalogs.example.com"
  pub origin: Option<String>,
  pub cache_version: String,
  /// Path fragment that marks API traffic
  pub api_prefix: String,
  /// Root-relative paths cached atomically at install time
  pub shell_assets: Vec<String>,
  pub static_extensions: Vec<String>,
  pub sync_tag: String,
  /// Route opened by the `explore` notification action
  pub explore_route: String,
  /// Where cache.db, queue.db and logs live (defaults to $XDG_DATA_HOME/catalog-offline)
  pub data_dir: Option<PathBuf>,
  /// Per-request timeout in seconds; unset means the transport default
  pub request_timeout_secs: Option<u64>,
  pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Catalog Management".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/badge-72x72.png".to_string(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: None,
      cache_version: CACHE_VERSION.to_string(),
      api_prefix: "/api/".to_string(),
      shell_assets: SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
      static_extensions: STATIC_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
      sync_tag: SYNC_TAG.to_string(),
      explore_route: "/catalogs".to_string(),
      data_dir: None,
      request_timeout_secs: None,
      notification: NotificationConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./catalog-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/catalog-offline/config.yaml
  /// 4. Built-in defaults
  ///
  /// CATALOG_OFFLINE_ORIGIN overrides `origin` in every case.
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
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("CATALOG_OFFLINE_ORIGIN") {
      config.origin = Some(origin);
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("catalog-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("catalog-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
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

  fn validate(&self) -> Result<()> {
    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }
    if self.api_prefix.is_empty() {
      return Err(eyre!("api_prefix must not be empty"));
    }
    if let Some(p) = self.shell_assets.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("Shell asset '{}' must be root-relative", p));
    }
    Ok(())
  }

  /// The application origin as a URL.
  pub fn origin_url(&self) -> Result<Url> {
    let origin = self.origin.as_deref().ok_or_else(|| {
      eyre!("No origin configured. Set `origin` in the config file or CATALOG_OFFLINE_ORIGIN.")
    })?;
    Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))
  }

  /// Resolve an absolute URL or a path relative to the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    match Url::parse(target) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .origin_url()?
        .join(target)
        .map_err(|e| eyre!("Invalid path '{}': {}", target, e)),
      Err(e) => Err(eyre!("Invalid URL '{}': {}", target, e)),
    }
  }

  /// Absolute URLs of the shell manifest, in manifest order.
  pub fn shell_asset_urls(&self) -> Result<Vec<Url>> {
    self.shell_assets.iter().map(|p| self.resolve(p)).collect()
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.request_timeout_secs.map(Duration::from_secs)
  }

  /// Data directory for the durable stores and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("catalog-offline"))
  }
}
