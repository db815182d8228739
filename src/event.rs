use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::cache::FetchResult;
use crate::error::{OfflineError, OfflineResult};
use crate::http::Request;
use crate::lifecycle::Activation;
use crate::notify::NotificationIntent;
use crate::sync::SyncReport;

/// Events delivered by the host environment
#[derive(Debug)]
pub enum Event {
  /// First activation of this build: cache the shell
  Install,
  /// Retire stale generations and take over clients
  Activate,
  /// An intercepted outbound request
  Fetch {
    request: Request,
    cancel: CancellationToken,
  },
  /// Connectivity restored or a periodic sync opportunity
  Sync { tag: String },
  /// Push message with its raw text payload
  Push { payload: Option<String> },
  /// Click on a notification, with the chosen action if any
  NotificationClick { action: Option<String> },
}

impl Event {
  pub fn fetch(request: Request) -> Self {
    Event::Fetch {
      request,
      cancel: CancellationToken::new(),
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch { .. } => "fetch",
      Event::Sync { .. } => "sync",
      Event::Push { .. } => "push",
      Event::NotificationClick { .. } => "notificationclick",
    }
  }
}

/// What handling an event produced
#[derive(Debug)]
pub enum Outcome {
  Installed,
  Activated(Activation),
  /// The host gets the fetch result as-is, failure included
  Fetched(OfflineResult<FetchResult>),
  /// None when the tag belongs to someone else
  Synced(Option<SyncReport>),
  Notified(Option<NotificationIntent>),
  /// The handler failed; already logged
  Failed(OfflineError),
  /// The handler panicked; already logged
  Aborted(String),
}

pub(crate) struct Envelope {
  pub event: Event,
  pub reply: Option<oneshot::Sender<Outcome>>,
}

/// Sending half: how the host hands events to the dispatcher
#[derive(Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
  /// Deliver an event and get a receiver for its outcome.
  ///
  /// Returns None if the dispatcher has shut down.
  pub fn send(&self, event: Event) -> Option<oneshot::Receiver<Outcome>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope {
        event,
        reply: Some(reply),
      })
      .ok()?;
    Some(rx)
  }

  /// Deliver an event without waiting for its outcome.
  pub fn emit(&self, event: Event) -> bool {
    self.tx.send(Envelope { event, reply: None }).is_ok()
  }
}

/// Receiving half, consumed by the dispatcher loop
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Envelope>,
}

impl EventHandler {
  /// Create a connected sender/handler pair
  pub fn channel() -> (EventSender, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, Self { rx })
  }

  /// Receive the next event; None once every sender is gone
  pub(crate) async fn next(&mut self) -> Option<Envelope> {
    self.rx.recv().await
  }
}
