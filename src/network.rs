//! Transport to the remote API.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::{OfflineError, OfflineResult};
use crate::http::{Request, Response};

/// Something that can put a request on the wire.
///
/// Any HTTP status counts as a response. A request that never got a status
/// back is `NetworkUnavailable`; one whose body broke off after the status
/// arrived is `ResponseInterrupted`, since the server has already seen it.
#[async_trait]
pub trait Network: Send + Sync {
  async fn send(&self, request: &Request) -> OfflineResult<Response>;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  /// Create a client. `timeout` of None leaves it to the transport.
  pub fn new(timeout: Option<Duration>) -> OfflineResult<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| OfflineError::NetworkUnavailable(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn send(&self, request: &Request) -> OfflineResult<Response> {
    debug!(method = %request.method, url = %request.url, "network request");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| OfflineError::ResponseInterrupted {
        status,
        reason: e.to_string(),
      })?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
