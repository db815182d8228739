//! Error types for the offline layer.
//!
//! Every component returns `OfflineResult<T>`. The dispatcher is the only
//! place where these errors are swallowed (after logging).

use thiserror::Error;

/// Result type alias for offline layer operations
pub type OfflineResult<T> = Result<T, OfflineError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfflineError {
  /// Transport-level failure: DNS, refused connection, timeout, TLS.
  #[error("Network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The server answered with a status line but the body never fully arrived.
  /// The request did reach the remote side.
  #[error("Response with status {status} was cut off: {reason}")]
  ResponseInterrupted { status: u16, reason: String },

  /// The durable store (cache database or mutation queue) could not be read or written.
  #[error("Durable store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("Failed to fetch shell asset {url}: {reason}")]
  InstallAssetFetchFailure { url: String, reason: String },

  #[error("Replay of queued mutation {id} failed: {reason}")]
  ReplayFailure { id: i64, reason: String },

  #[error("Cannot {action} while worker is {state}")]
  InvalidTransition { action: &'static str, state: String },

  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  /// The host refused or failed a notification/window/clients call.
  #[error("Host call failed: {0}")]
  Host(String),

  #[error("Request cancelled")]
  Cancelled,
}

impl OfflineError {
  /// Whether the error means the remote side was never reached.
  pub fn is_network(&self) -> bool {
    matches!(self, OfflineError::NetworkUnavailable(_))
  }

  /// Whether no usable response came back, reached or not.
  pub fn is_transport(&self) -> bool {
    matches!(
      self,
      OfflineError::NetworkUnavailable(_) | OfflineError::ResponseInterrupted { .. }
    )
  }
}

impl From<rusqlite::Error> for OfflineError {
  fn from(e: rusqlite::Error) -> Self {
    OfflineError::StoreUnavailable(e.to_string())
  }
}

impl From<serde_json::Error> for OfflineError {
  fn from(e: serde_json::Error) -> Self {
    OfflineError::StoreUnavailable(format!("Failed to (de)serialize stored value: {}", e))
  }
}

impl From<reqwest::Error> for OfflineError {
  fn from(e: reqwest::Error) -> Self {
    OfflineError::NetworkUnavailable(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sqlite_errors_map_to_store_unavailable() {
    let err: OfflineError = rusqlite::Error::InvalidQuery.into();
    assert!(matches!(err, OfflineError::StoreUnavailable(_)));
  }

  #[test]
  fn test_is_network() {
    assert!(OfflineError::NetworkUnavailable("refused".into()).is_network());
    assert!(!OfflineError::Cancelled.is_network());
  }

  #[test]
  fn test_interrupted_response_reached_server() {
    let err = OfflineError::ResponseInterrupted {
      status: 201,
      reason: "connection reset".into(),
    };
    assert!(!err.is_network());
    assert!(err.is_transport());
  }
}
