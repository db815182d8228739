//! Request/response values that flow through the offline layer.
//!
//! These are deliberately plain data: the network and cache backends convert
//! to and from them so every component can be tested without a transport.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{OfflineError, OfflineResult};

/// Ordered header list. Order and duplicates are preserved as received.
pub type Headers = Vec<(String, String)>;

/// An outbound request issued by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Parse a method name and absolute URL.
  pub fn parse(method: &str, url: &str) -> OfflineResult<Self> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
      .map_err(|_| OfflineError::InvalidRequest(format!("bad method '{}'", method)))?;
    let url =
      Url::parse(url).map_err(|e| OfflineError::InvalidRequest(format!("bad url '{}': {}", url, e)))?;
    Ok(Self::new(method, url))
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }
}

/// A response, either fresh from the network or replayed from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn ok(body: impl Into<Vec<u8>>) -> Self {
    Self::new(200, body)
  }

  /// 2xx, the only statuses allowed into the cache.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Canonical identity of a cacheable request.
///
/// Only GET requests have one, so a non-GET request cannot reach the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  url: String,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Option<Self> {
    if request.method == Method::GET {
      Some(Self::for_url(&request.url))
    } else {
      None
    }
  }

  /// Key for a GET of `url`. The fragment never reaches the server, so it is dropped.
  pub fn for_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      url: url.to_string(),
    }
  }

  pub fn method(&self) -> &'static str {
    "GET"
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 of method + url, used as the storage primary key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}
