//! The host environment: whatever shows notifications, opens windows and
//! owns the client pages this layer serves.

use async_trait::async_trait;
use tracing::info;

use crate::error::OfflineResult;
use crate::notify::NotificationIntent;

#[async_trait]
pub trait Host: Send + Sync {
  /// Take control of already-open clients so a new generation applies without a reload.
  async fn claim_clients(&self) -> OfflineResult<()>;

  async fn show_notification(&self, intent: &NotificationIntent) -> OfflineResult<()>;

  async fn close_notification(&self) -> OfflineResult<()>;

  /// Open (or focus) a client window at a route.
  async fn open_window(&self, route: &str) -> OfflineResult<()>;
}

/// Host for the command-line driver: prints notifications and navigation
/// requests instead of rendering them.
pub struct ConsoleHost;

#[async_trait]
impl Host for ConsoleHost {
  async fn claim_clients(&self) -> OfflineResult<()> {
    info!("claimed clients");
    Ok(())
  }

  async fn show_notification(&self, intent: &NotificationIntent) -> OfflineResult<()> {
    info!(title = %intent.title, "showing notification");
    println!("[{}] {}", intent.title, intent.body);
    let actions: Vec<String> = intent
      .actions
      .iter()
      .map(|a| format!("{} ({})", a.title, a.action))
      .collect();
    if !actions.is_empty() {
      println!("  actions: {}", actions.join(", "));
    }
    Ok(())
  }

  async fn close_notification(&self) -> OfflineResult<()> {
    info!("notification closed");
    Ok(())
  }

  async fn open_window(&self, route: &str) -> OfflineResult<()> {
    info!(route, "opening window");
    println!("open {}", route);
    Ok(())
  }
}
