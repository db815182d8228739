//! Request classification: decides which strategy handles a request.

use reqwest::Method;

use crate::config::Config;
use crate::http::Request;

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
  /// Not ours: passes straight through, never cached or queued
  Ignore,
  /// Non-GET against the API; queued for replay if the network is down
  Mutation,
  /// GET against the API; network first, cache fallback
  ApiRead,
  /// Script, stylesheet, image or shell asset; cache first
  StaticAsset,
  /// Any other GET; cache first, app shell on an offline miss
  Navigation,
}

#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefix: String,
  static_extensions: Vec<String>,
  shell_assets: Vec<String>,
}

impl Classifier {
  pub fn new(
    api_prefix: impl Into<String>,
    static_extensions: Vec<String>,
    shell_assets: Vec<String>,
  ) -> Self {
    Self {
      api_prefix: api_prefix.into(),
      static_extensions: static_extensions
        .into_iter()
        .map(|e| e.to_ascii_lowercase())
        .collect(),
      shell_assets,
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(
      config.api_prefix.clone(),
      config.static_extensions.clone(),
      config.shell_assets.clone(),
    )
  }

  /// Classify a request. Total: every request maps to exactly one variant.
  pub fn classify(&self, request: &Request) -> Classification {
    let path = request.url.path();
    let is_api = path.contains(&self.api_prefix);

    if request.method != Method::GET {
      return if is_api {
        Classification::Mutation
      } else {
        Classification::Ignore
      };
    }

    if !matches!(request.url.scheme(), "http" | "https") {
      return Classification::Ignore;
    }

    if is_api {
      return Classification::ApiRead;
    }

    if self.is_static(path) {
      return Classification::StaticAsset;
    }

    Classification::Navigation
  }

  fn is_static(&self, path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    self.static_extensions.iter().any(|ext| lower.ends_with(ext))
      || self.shell_assets.iter().any(|asset| asset == path)
  }
}
