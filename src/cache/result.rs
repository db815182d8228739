//! Result of a strategy run, including where the response came from.

use chrono::{DateTime, Utc};

use crate::classify::Classification;
use crate::http::Response;

/// A response handed back to the host, with metadata about its source.
#[derive(Debug, Clone)]
pub struct FetchResult {
  /// The response the caller sees
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// How the request was classified
  pub classification: Classification,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl FetchResult {
  /// A fresh response from the network.
  pub fn from_network(response: Response, classification: Classification) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      classification,
      cached_at: None,
    }
  }

  /// A cache hit served without touching the network.
  pub fn from_cache(
    response: Response,
    cached_at: DateTime<Utc>,
    classification: Classification,
  ) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      classification,
      cached_at: Some(cached_at),
    }
  }

  /// A cached response served because the network failed.
  pub fn offline(
    response: Response,
    cached_at: DateTime<Utc>,
    classification: Classification,
  ) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      classification,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Cache-first hit, no network round trip
  Cache,
  /// Network unavailable, serving the last cached snapshot
  Offline,
}
