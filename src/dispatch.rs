//! Single entry point for host events.
//!
//! Each event is routed to its component. Handler errors are logged and
//! turned into an `Outcome`; nothing a handler does can take the dispatcher
//! down, and handlers for independent events run concurrently.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::cache::FetchEngine;
use crate::classify::Classifier;
use crate::context::Context;
use crate::error::{OfflineError, OfflineResult};
use crate::event::{Envelope, Event, EventHandler, Outcome};
use crate::lifecycle::Lifecycle;
use crate::notify::Notifier;
use crate::sync::SyncCoordinator;

pub struct Dispatcher {
  context: Context,
  engine: FetchEngine,
  lifecycle: Lifecycle,
  sync: SyncCoordinator,
  notifier: Notifier,
}

impl Dispatcher {
  /// Wire every component to the shared context.
  pub fn new(context: Context) -> OfflineResult<Self> {
    let config = &context.config;
    let shell_assets = config
      .shell_asset_urls()
      .map_err(|e| OfflineError::InvalidRequest(e.to_string()))?;

    let engine = FetchEngine::new(
      Classifier::from_config(config),
      config.cache_version.clone(),
      Arc::clone(&context.cache),
      Arc::clone(&context.network),
      Arc::clone(&context.queue),
    );
    let lifecycle = Lifecycle::new(
      config.cache_version.clone(),
      shell_assets,
      Arc::clone(&context.cache),
      Arc::clone(&context.network),
      Arc::clone(&context.host),
    );
    let sync = SyncCoordinator::new(
      config.sync_tag.clone(),
      Arc::clone(&context.queue),
      Arc::clone(&context.network),
    );
    let notifier = Notifier::new(
      config.notification.clone(),
      config.explore_route.clone(),
      Arc::clone(&context.host),
    );

    Ok(Self {
      context,
      engine,
      lifecycle,
      sync,
      notifier,
    })
  }

  pub fn context(&self) -> &Context {
    &self.context
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  /// Handle one event to completion.
  pub async fn dispatch(&self, event: Event) -> Outcome {
    let name = event.name();
    debug!(event = name, "dispatch");

    let outcome = match event {
      Event::Install => self.lifecycle.install().await.map(|()| Outcome::Installed),
      Event::Activate => self.lifecycle.activate().await.map(Outcome::Activated),
      Event::Fetch { request, cancel } => {
        let result = self.engine.handle(&request, &cancel).await;
        if let Err(e) = &result {
          debug!(url = %request.url, error = %e, "fetch failed");
        }
        Ok(Outcome::Fetched(result))
      }
      Event::Sync { tag } => self.sync(&tag).await,
      Event::Push { payload } => self
        .notifier
        .on_push(payload.as_deref())
        .await
        .map(|intent| Outcome::Notified(Some(intent))),
      Event::NotificationClick { action } => self
        .notifier
        .on_notification_click(action.as_deref())
        .await
        .map(|()| Outcome::Notified(None)),
    };

    outcome.unwrap_or_else(|e| {
      error!(event = name, error = %e, "event handler failed");
      Outcome::Failed(e)
    })
  }

  async fn sync(&self, tag: &str) -> OfflineResult<Outcome> {
    let report = self.sync.on_sync(tag).await?;
    if let Some(report) = &report {
      if let Err(e) = self.notifier.on_sync_complete(report).await {
        warn!(error = %e, "failed to show sync notification");
      }
    }
    Ok(Outcome::Synced(report))
  }

  /// Serve events until every sender is dropped.
  ///
  /// Every event runs on its own task; a panicking handler is reported as
  /// `Outcome::Aborted` instead of ending the loop.
  pub async fn run(self: Arc<Self>, mut events: EventHandler) {
    while let Some(Envelope { event, reply }) = events.next().await {
      let dispatcher = Arc::clone(&self);
      let name = event.name();

      tokio::spawn(async move {
        let handler = tokio::spawn(async move { dispatcher.dispatch(event).await });
        let outcome = match handler.await {
          Ok(outcome) => outcome,
          Err(e) => {
            error!(event = name, error = %e, "event handler aborted");
            Outcome::Aborted(e.to_string())
          }
        };
        if let Some(reply) = reply {
          let _ = reply.send(outcome);
        }
      });
    }
    debug!("event channel closed");
  }

  /// Wait for background cache writes before the process exits.
  pub async fn shutdown(&self) {
    self.engine.settle().await;
  }
}
