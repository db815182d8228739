//! Install/activate lifecycle of a cache generation.

use futures::future::try_join_all;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::error::{OfflineError, OfflineResult};
use crate::host::Host;
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Started, current generation not installed yet
  Parsed,
  Installing,
  /// Shell cached in the current generation
  Installed,
  Activating,
  Activated,
  /// Last install failed; a new install attempt is allowed
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Summary of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
  /// Stale generations that were deleted
  pub deleted: Vec<String>,
}

pub struct Lifecycle {
  generation: String,
  shell_assets: Vec<Url>,
  state: Mutex<WorkerState>,
  cache: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  host: Arc<dyn Host>,
}

impl Lifecycle {
  /// Create the lifecycle for `generation`.
  ///
  /// A generation whose shell install completed in an earlier process counts
  /// as installed, so a restart can activate without re-fetching the shell.
  /// Entries cached by ordinary fetches do not make it installed.
  pub fn new(
    generation: impl Into<String>,
    shell_assets: Vec<Url>,
    cache: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
  ) -> Self {
    let generation = generation.into();
    let installed = match cache.is_installed(&generation) {
      Ok(installed) => installed,
      Err(e) => {
        warn!(error = %e, "could not read install state");
        false
      }
    };

    Self {
      generation,
      shell_assets,
      state: Mutex::new(if installed {
        WorkerState::Installed
      } else {
        WorkerState::Parsed
      }),
      cache,
      network,
      host,
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn state(&self) -> WorkerState {
    *self.lock_state()
  }

  /// Fetch the whole shell manifest and cache it in one transaction.
  ///
  /// Any failed or non-2xx asset fails the install and nothing is written.
  pub async fn install(&self) -> OfflineResult<()> {
    self.transition(
      "install",
      &[
        WorkerState::Parsed,
        WorkerState::Redundant,
        WorkerState::Installed,
        WorkerState::Activated,
      ],
      WorkerState::Installing,
    )?;
    info!(generation = %self.generation, assets = self.shell_assets.len(), "installing");

    match self.populate().await {
      Ok(()) => {
        // Skip waiting: nothing holds an installed generation back from activating
        self.set_state(WorkerState::Installed);
        info!(generation = %self.generation, "installed");
        Ok(())
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  /// Delete every generation but the current one, then claim open clients.
  pub async fn activate(&self) -> OfflineResult<Activation> {
    self.transition(
      "activate",
      &[WorkerState::Installed, WorkerState::Activated],
      WorkerState::Activating,
    )?;

    let activation = match self.cleanup() {
      Ok(activation) => activation,
      Err(e) => {
        self.set_state(WorkerState::Installed);
        return Err(e);
      }
    };

    self.set_state(WorkerState::Activated);
    if let Err(e) = self.host.claim_clients().await {
      warn!(error = %e, "failed to claim clients");
    }

    info!(generation = %self.generation, deleted = ?activation.deleted, "activated");
    Ok(activation)
  }

  async fn populate(&self) -> OfflineResult<()> {
    let fetches = self.shell_assets.iter().map(|url| self.fetch_asset(url));
    let entries = try_join_all(fetches).await?;

    self.cache.install(&self.generation, &entries)
  }

  async fn fetch_asset(&self, url: &Url) -> OfflineResult<(RequestKey, Response)> {
    let failure = |reason: String| OfflineError::InstallAssetFetchFailure {
      url: url.to_string(),
      reason,
    };

    let response = self
      .network
      .send(&Request::get(url.clone()))
      .await
      .map_err(|e| failure(e.to_string()))?;

    if !response.is_success() {
      return Err(failure(format!("status {}", response.status)));
    }
    Ok((RequestKey::for_url(url), response))
  }

  fn cleanup(&self) -> OfflineResult<Activation> {
    let mut deleted = Vec::new();
    for tag in self.cache.generations()? {
      if tag != self.generation {
        info!(generation = %tag, "deleting stale cache generation");
        self.cache.delete_generation(&tag)?;
        deleted.push(tag);
      }
    }
    Ok(Activation { deleted })
  }

  fn transition(
    &self,
    action: &'static str,
    from: &[WorkerState],
    to: WorkerState,
  ) -> OfflineResult<()> {
    let mut state = self.lock_state();
    if !from.contains(&*state) {
      return Err(OfflineError::InvalidTransition {
        action,
        state: state.to_string(),
      });
    }
    *state = to;
    Ok(())
  }

  fn set_state(&self, to: WorkerState) {
    *self.lock_state() = to;
  }

  fn lock_state(&self) -> std::sync::MutexGuard<'_, WorkerState> {
    // State is a plain Copy value, so a poisoned lock still holds a valid one
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteCache;
  use crate::host::testing::{HostCall, RecordingHost};
  use crate::network::testing::StubNetwork;

  const GEN: &str = "catalog-management-v2";

  fn urls(paths: &[&str]) -> Vec<Url> {
    paths
      .iter()
      .map(|p| Url::parse("https://app.test").unwrap().join(p).unwrap())
      .collect()
  }

  fn lifecycle(
    paths: &[&str],
    cache: Arc<SqliteCache>,
    network: Arc<StubNetwork>,
    host: Arc<RecordingHost>,
  ) -> Lifecycle {
    Lifecycle::new(GEN, urls(paths), cache, network, host)
  }

  #[tokio::test]
  async fn test_install_caches_shell() {
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let network = Arc::new(StubNetwork::new());
    network.route("GET", "https://app.test/", Response::ok("<html>"));
    network.route("GET", "https://app.test/index.html", Response::ok("<html>"));
    let lc = lifecycle(
      &["/", "/index.html"],
      cache.clone(),
      network,
      Arc::new(RecordingHost::new()),
    );

    assert_eq!(lc.state(), WorkerState::Parsed);
    lc.install().await.unwrap();
    assert_eq!(lc.state(), WorkerState::Installed);
    assert_eq!(cache.entry_count(GEN).unwrap(), 2);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let network = Arc::new(StubNetwork::new());
    network.route("GET", "https://app.test/", Response::ok("<html>"));
    network.fail("https://app.test/index.html");
    let lc = lifecycle(
      &["/", "/index.html"],
      cache.clone(),
      network,
      Arc::new(RecordingHost::new()),
    );

    let err = lc.install().await.unwrap_err();
    assert!(matches!(err, OfflineError::InstallAssetFetchFailure { .. }));
    assert_eq!(lc.state(), WorkerState::Redundant);
    assert_eq!(cache.entry_count(GEN).unwrap(), 0);
    assert!(cache
      .get(GEN, &RequestKey::for_url(&urls(&["/"])[0]))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let network = Arc::new(StubNetwork::new());
    // /manifest.json is not routed, so the stub answers 404
    network.route("GET", "https://app.test/", Response::ok("<html>"));
    let lc = lifecycle(
      &["/", "/manifest.json"],
      cache.clone(),
      network,
      Arc::new(RecordingHost::new()),
    );

    assert!(lc.install().await.is_err());
    assert!(cache.generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_retry_after_failed_install() {
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let network = Arc::new(StubNetwork::new());
    network.route("GET", "https://app.test/", Response::ok("<html>"));
    network.fail("https://app.test/");
    let lc = lifecycle(
      &["/"],
      cache.clone(),
      network.clone(),
      Arc::new(RecordingHost::new()),
    );

    assert!(lc.install().await.is_err());
    network.heal("https://app.test/");
    lc.install().await.unwrap();
    assert_eq!(cache.entry_count(GEN).unwrap(), 1);
  }

  #[tokio::test]
  async fn test_activate_deletes_stale_generations() {
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let key = RequestKey::for_url(&urls(&["/index.html"])[0]);
    cache.put("catalog-management-v1", &key, &Response::ok("old")).unwrap();
    cache.install(GEN, &[(key, Response::ok("new"))]).unwrap();
    let host = Arc::new(RecordingHost::new());
    let lc = lifecycle(
      &[],
      cache.clone(),
      Arc::new(StubNetwork::new()),
      host.clone(),
    );

    // Installed by an earlier process
    assert_eq!(lc.state(), WorkerState::Installed);
    let activation = lc.activate().await.unwrap();

    assert_eq!(activation.deleted, vec!["catalog-management-v1".to_string()]);
    assert_eq!(cache.generations().unwrap(), vec![GEN.to_string()]);
    assert_eq!(lc.state(), WorkerState::Activated);
    assert_eq!(host.calls(), vec![HostCall::Claim]);
  }

  #[tokio::test]
  async fn test_activate_before_install_rejected() {
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let lc = lifecycle(
      &["/"],
      cache,
      Arc::new(StubNetwork::new()),
      Arc::new(RecordingHost::new()),
    );

    let err = lc.activate().await.unwrap_err();
    assert!(matches!(err, OfflineError::InvalidTransition { action: "activate", .. }));
  }

  #[tokio::test]
  async fn test_cached_fetches_do_not_count_as_installed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let cache = SqliteCache::open(&path).unwrap();
      let api = Url::parse("https://app.test/api/v1/catalogs/").unwrap();
      cache.put(GEN, &RequestKey::for_url(&api), &Response::ok("[]")).unwrap();
    }

    let lc = lifecycle(
      &["/"],
      Arc::new(SqliteCache::open(&path).unwrap()),
      Arc::new(StubNetwork::new()),
      Arc::new(RecordingHost::new()),
    );
    assert_eq!(lc.state(), WorkerState::Parsed);
    let err = lc.activate().await.unwrap_err();
    assert!(matches!(err, OfflineError::InvalidTransition { action: "activate", .. }));
  }

  #[tokio::test]
  async fn test_install_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let network = Arc::new(StubNetwork::new());
    network.route("GET", "https://app.test/", Response::ok("<html>"));

    {
      let lc = lifecycle(
        &["/"],
        Arc::new(SqliteCache::open(&path).unwrap()),
        network.clone(),
        Arc::new(RecordingHost::new()),
      );
      lc.install().await.unwrap();
    }

    let lc = lifecycle(
      &["/"],
      Arc::new(SqliteCache::open(&path).unwrap()),
      network,
      Arc::new(RecordingHost::new()),
    );
    assert_eq!(lc.state(), WorkerState::Installed);
    lc.activate().await.unwrap();
  }
}
