//! Fetch strategy engine: picks a strategy per classification and keeps the
//! cache up to date as a side effect.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use super::result::FetchResult;
use super::storage::{CacheStorage, CachedResponse};
use crate::classify::{Classification, Classifier};
use crate::error::{OfflineError, OfflineResult};
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;
use crate::queue::MutationQueue;

/// Shell documents tried, in order, when an offline navigation misses.
const SHELL_FALLBACKS: &[&str] = &["/index.html", "/"];

/// Routes every intercepted request through the right strategy.
///
/// Cache writes are detached: the response is returned as soon as it
/// arrives and the store happens on a tracked background task.
pub struct FetchEngine {
  classifier: Classifier,
  /// Current cache generation
  generation: String,
  cache: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  queue: Arc<dyn MutationQueue>,
  writes: TaskTracker,
}

impl FetchEngine {
  pub fn new(
    classifier: Classifier,
    generation: impl Into<String>,
    cache: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    queue: Arc<dyn MutationQueue>,
  ) -> Self {
    Self {
      classifier,
      generation: generation.into(),
      cache,
      network,
      queue,
      writes: TaskTracker::new(),
    }
  }

  pub fn classifier(&self) -> &Classifier {
    &self.classifier
  }

  /// Handle one intercepted request.
  ///
  /// Errors that have a cache fallback never reach the caller; everything
  /// else comes back exactly as the network reported it.
  pub async fn handle(
    &self,
    request: &Request,
    cancel: &CancellationToken,
  ) -> OfflineResult<FetchResult> {
    let classification = self.classifier.classify(request);
    debug!(method = %request.method, url = %request.url, ?classification, "fetch");

    match classification {
      Classification::Ignore => {
        let response = self.send(request, cancel).await?;
        Ok(FetchResult::from_network(response, classification))
      }
      Classification::Mutation => self.mutate(request, cancel).await,
      Classification::ApiRead => self.network_first(request, classification, cancel).await,
      Classification::StaticAsset | Classification::Navigation => {
        self.cache_first(request, classification, cancel).await
      }
    }
  }

  /// Wait for every background cache write started so far.
  pub async fn settle(&self) {
    self.writes.close();
    self.writes.wait().await;
    self.writes.reopen();
  }

  /// Network first, cached snapshot for the exact key when offline.
  async fn network_first(
    &self,
    request: &Request,
    classification: Classification,
    cancel: &CancellationToken,
  ) -> OfflineResult<FetchResult> {
    let key = cache_key(request)?;

    match self.send(request, cancel).await {
      Ok(response) => {
        if response.is_success() {
          self.store_detached(key, response.clone());
        }
        Ok(FetchResult::from_network(response, classification))
      }
      Err(e) if e.is_transport() => match self.lookup(&key) {
        Some(cached) => {
          info!(url = %request.url, "network unavailable, serving cached response");
          Ok(FetchResult::offline(
            cached.response,
            cached.cached_at,
            classification,
          ))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }

  /// Cache first, network on a miss.
  async fn cache_first(
    &self,
    request: &Request,
    classification: Classification,
    cancel: &CancellationToken,
  ) -> OfflineResult<FetchResult> {
    let key = cache_key(request)?;

    if let Some(cached) = self.lookup(&key) {
      return Ok(FetchResult::from_cache(
        cached.response,
        cached.cached_at,
        classification,
      ));
    }

    match self.send(request, cancel).await {
      Ok(response) => {
        if response.is_success() {
          self.store_detached(key, response.clone());
        }
        Ok(FetchResult::from_network(response, classification))
      }
      Err(e) if e.is_transport() && classification == Classification::Navigation => {
        match self.shell_fallback(&request.url) {
          Some(result) => Ok(result),
          None => Err(e),
        }
      }
      Err(e) => Err(e),
    }
  }

  /// Forward a mutation; queue it for replay if it never reached the API.
  ///
  /// The caller still sees the failure: queueing is a side channel. A
  /// response that broke off after its status is not queued, the server
  /// already has the request.
  async fn mutate(
    &self,
    request: &Request,
    cancel: &CancellationToken,
  ) -> OfflineResult<FetchResult> {
    match self.send(request, cancel).await {
      Ok(response) => Ok(FetchResult::from_network(response, Classification::Mutation)),
      Err(e) if e.is_network() => {
        match self.queue.enqueue(request) {
          Ok(id) => {
            info!(id, method = %request.method, url = %request.url, "queued mutation for background sync")
          }
          Err(qe) => warn!(error = %qe, url = %request.url, "failed to queue mutation"),
        }
        Err(e)
      }
      Err(e) => Err(e),
    }
  }

  async fn send(&self, request: &Request, cancel: &CancellationToken) -> OfflineResult<Response> {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(OfflineError::Cancelled),
      result = self.network.send(request) => result,
    }
  }

  /// Cache lookup in the current generation. A broken cache reads as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.cache.get(&self.generation, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(error = %e, url = key.url(), "cache lookup failed");
        None
      }
    }
  }

  fn shell_fallback(&self, url: &Url) -> Option<FetchResult> {
    SHELL_FALLBACKS.iter().find_map(|path| {
      let shell = url.join(path).ok()?;
      let cached = self.lookup(&RequestKey::for_url(&shell))?;
      info!(url = %url, shell = %shell, "offline navigation, serving app shell");
      Some(FetchResult::offline(
        cached.response,
        cached.cached_at,
        Classification::Navigation,
      ))
    })
  }

  fn store_detached(&self, key: RequestKey, response: Response) {
    let cache = Arc::clone(&self.cache);
    let generation = self.generation.clone();
    self.writes.spawn_blocking(move || {
      if let Err(e) = cache.put(&generation, &key, &response) {
        warn!(error = %e, url = key.url(), "failed to store response in cache");
      }
    });
  }
}

fn cache_key(request: &Request) -> OfflineResult<RequestKey> {
  RequestKey::for_request(request)
    .ok_or_else(|| OfflineError::InvalidRequest(format!("{} is not cacheable", request.method)))
}
