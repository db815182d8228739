//! Background sync: replays queued mutations when the host says the network
//! is back.
//!
//! There is no internal retry timer. Whatever is left in the queue waits for
//! the host's next sync trigger. Triggers that overlap are serialized, so a
//! queued entry is never in flight twice.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OfflineError, OfflineResult};
use crate::network::Network;
use crate::queue::{MutationQueue, QueuedMutation};

/// Outcome of one sync trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Entries found in the queue
  pub attempted: usize,
  /// Entries replayed and removed
  pub replayed: usize,
  /// Entries left in the queue for the next trigger
  pub failed: usize,
}

pub struct SyncCoordinator {
  tag: String,
  queue: Arc<dyn MutationQueue>,
  network: Arc<dyn Network>,
  /// Held for a whole drain
  draining: Mutex<()>,
}

impl SyncCoordinator {
  pub fn new(
    tag: impl Into<String>,
    queue: Arc<dyn MutationQueue>,
    network: Arc<dyn Network>,
  ) -> Self {
    Self {
      tag: tag.into(),
      queue,
      network,
      draining: Mutex::new(()),
    }
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  /// Handle a sync trigger. Returns None for tags this coordinator does not own.
  pub async fn on_sync(&self, tag: &str) -> OfflineResult<Option<SyncReport>> {
    if tag != self.tag {
      info!(tag, "ignoring sync for unknown tag");
      return Ok(None);
    }
    self.drain().await.map(Some)
  }

  /// Replay every queued mutation once.
  ///
  /// Replays start concurrently; their results are applied to the queue in
  /// enqueue order. A failed entry stays put and does not stop the batch.
  /// A trigger that arrives mid-drain waits and then sees what is left.
  pub async fn drain(&self) -> OfflineResult<SyncReport> {
    let _draining = match self.draining.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!("sync already in progress, waiting");
        self.draining.lock().await
      }
    };

    let pending = self.queue.peek_all()?;
    if pending.is_empty() {
      return Ok(SyncReport::default());
    }

    info!(count = pending.len(), "replaying queued mutations");
    let results = join_all(pending.iter().map(|m| self.replay(m))).await;

    let mut report = SyncReport {
      attempted: pending.len(),
      ..SyncReport::default()
    };

    for (mutation, result) in pending.iter().zip(results) {
      match result {
        Ok(()) => match self.queue.remove(mutation.id) {
          Ok(()) => report.replayed += 1,
          Err(e) => {
            // Delivered but still queued: it will be replayed again next time
            warn!(id = mutation.id, error = %e, "failed to remove replayed mutation");
            report.failed += 1;
          }
        },
        Err(e) => {
          warn!(error = %e, "background sync failed");
          report.failed += 1;
        }
      }
    }

    info!(replayed = report.replayed, failed = report.failed, "sync finished");
    Ok(report)
  }

  async fn replay(&self, mutation: &QueuedMutation) -> OfflineResult<()> {
    let failure = |reason: String| OfflineError::ReplayFailure {
      id: mutation.id,
      reason,
    };

    let request = mutation.to_request().map_err(|e| failure(e.to_string()))?;
    let response = match self.network.send(&request).await {
      Ok(response) => response,
      // The server took it; replaying again would apply it twice
      Err(OfflineError::ResponseInterrupted { status, .. }) if (200..300).contains(&status) => {
        return Ok(())
      }
      Err(e) => return Err(failure(e.to_string())),
    };

    if response.is_success() {
      Ok(())
    } else {
      Err(failure(format!("server answered {}", response.status)))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Request, Response};
  use crate::network::testing::StubNetwork;
  use crate::queue::testing::UnavailableQueue;
  use crate::queue::SqliteQueue;
  use reqwest::Method;
  use std::time::Duration;
  use url::Url;

  fn post(path: &str, body: &str) -> Request {
    Request::new(
      Method::POST,
      Url::parse(&format!("https://app.test{}", path)).unwrap(),
    )
    .with_body(body)
  }

  fn setup() -> (SyncCoordinator, Arc<SqliteQueue>, Arc<StubNetwork>) {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    let network = Arc::new(StubNetwork::new());
    let coordinator = SyncCoordinator::new("sync-catalogs", queue.clone(), network.clone());
    (coordinator, queue, network)
  }

  #[tokio::test]
  async fn test_unknown_tag_ignored() {
    let (coordinator, queue, network) = setup();
    queue.enqueue(&post("/api/v1/catalogs/", "a")).unwrap();

    assert_eq!(coordinator.on_sync("sync-suppliers").await.unwrap(), None);
    assert_eq!(network.calls(), 0);
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_empty_queue() {
    let (coordinator, _queue, network) = setup();
    let report = coordinator.on_sync("sync-catalogs").await.unwrap().unwrap();
    assert_eq!(report, SyncReport::default());
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_failed_entry_keeps_position() {
    let (coordinator, queue, network) = setup();
    for path in ["/api/v1/a", "/api/v1/b", "/api/v1/c"] {
      network.route("POST", &format!("https://app.test{}", path), Response::new(201, ""));
    }
    network.fail("https://app.test/api/v1/b");

    queue.enqueue(&post("/api/v1/a", "A")).unwrap();
    let b = queue.enqueue(&post("/api/v1/b", "B")).unwrap();
    queue.enqueue(&post("/api/v1/c", "C")).unwrap();

    let report = coordinator.on_sync("sync-catalogs").await.unwrap().unwrap();
    assert_eq!(
      report,
      SyncReport {
        attempted: 3,
        replayed: 2,
        failed: 1
      }
    );

    let left = queue.peek_all().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, b);
    assert_eq!(left[0].url, "https://app.test/api/v1/b");
  }

  #[tokio::test]
  async fn test_server_rejection_stays_queued() {
    let (coordinator, queue, network) = setup();
    network.route(
      "POST",
      "https://app.test/api/v1/catalogs/",
      Response::new(500, "boom"),
    );
    queue.enqueue(&post("/api/v1/catalogs/", "x")).unwrap();

    let report = coordinator.drain().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_duplicates_both_removed() {
    let (coordinator, queue, network) = setup();
    let unrelated = queue.enqueue(&post("/api/v1/other", "keep")).unwrap();
    network.fail("https://app.test/api/v1/other");
    network.route("POST", "https://app.test/api/v1/catalogs/", Response::ok(""));

    let request = post("/api/v1/catalogs/", "same");
    queue.enqueue(&request).unwrap();
    queue.enqueue(&request).unwrap();

    let report = coordinator.drain().await.unwrap();
    assert_eq!(report.replayed, 2);

    let left: Vec<i64> = queue.peek_all().unwrap().iter().map(|m| m.id).collect();
    assert_eq!(left, vec![unrelated]);
  }

  #[tokio::test]
  async fn test_failure_retried_on_next_trigger() {
    let (coordinator, queue, network) = setup();
    let url = "https://app.test/api/v1/catalogs/";
    network.route("POST", url, Response::new(201, ""));
    network.fail(url);
    queue.enqueue(&post("/api/v1/catalogs/", "later")).unwrap();

    coordinator.drain().await.unwrap();
    assert_eq!(queue.len().unwrap(), 1);

    network.heal(url);
    let report = coordinator.drain().await.unwrap();
    assert_eq!(report.replayed, 1);
    assert!(queue.is_empty().unwrap());
    assert_eq!(network.received().len(), 1);
  }

  #[tokio::test]
  async fn test_overlapping_triggers_replay_once() {
    let (coordinator, queue, network) = setup();
    network.route("POST", "https://app.test/api/v1/catalogs/", Response::new(201, ""));
    network.set_delay(Duration::from_millis(50));
    queue.enqueue(&post("/api/v1/catalogs/", "once")).unwrap();

    let (first, second) = tokio::join!(
      coordinator.on_sync("sync-catalogs"),
      coordinator.on_sync("sync-catalogs")
    );
    let replayed = first.unwrap().unwrap().replayed + second.unwrap().unwrap().replayed;

    assert_eq!(replayed, 1);
    assert_eq!(network.received().len(), 1);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_interrupted_success_counts_as_delivered() {
    let (coordinator, queue, network) = setup();
    let url = "https://app.test/api/v1/catalogs/";
    network.route("POST", url, Response::new(201, ""));
    network.interrupt(url);
    queue.enqueue(&post("/api/v1/catalogs/", "x")).unwrap();

    let report = coordinator.drain().await.unwrap();
    assert_eq!(report.replayed, 1);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_interrupted_rejection_stays_queued() {
    let (coordinator, queue, network) = setup();
    let url = "https://app.test/api/v1/catalogs/";
    network.route("POST", url, Response::new(503, ""));
    network.interrupt(url);
    queue.enqueue(&post("/api/v1/catalogs/", "x")).unwrap();

    let report = coordinator.drain().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_store_unavailable() {
    let coordinator = SyncCoordinator::new(
      "sync-catalogs",
      Arc::new(UnavailableQueue),
      Arc::new(StubNetwork::new()),
    );
    let err = coordinator.on_sync("sync-catalogs").await.unwrap_err();
    assert!(matches!(err, OfflineError::StoreUnavailable(_)));
  }
}
