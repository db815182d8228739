//! User-visible notifications for push messages and completed syncs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::NotificationConfig;
use crate::error::OfflineResult;
use crate::host::Host;
use crate::sync::SyncReport;

pub const ACTION_EXPLORE: &str = "explore";
pub const ACTION_CLOSE: &str = "close";

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u32,
}

/// What to show. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationIntent {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

pub struct Notifier {
  config: NotificationConfig,
  explore_route: String,
  host: Arc<dyn Host>,
}

impl Notifier {
  pub fn new(
    config: NotificationConfig,
    explore_route: impl Into<String>,
    host: Arc<dyn Host>,
  ) -> Self {
    Self {
      config,
      explore_route: explore_route.into(),
      host,
    }
  }

  /// Show a push message. The payload is used verbatim as the body.
  pub async fn on_push(&self, payload: Option<&str>) -> OfflineResult<NotificationIntent> {
    let intent = self.intent(payload.unwrap_or_default().to_string());
    debug!(body = %intent.body, "push received");
    self.host.show_notification(&intent).await?;
    Ok(intent)
  }

  /// Handle a click on a notification or one of its actions.
  pub async fn on_notification_click(&self, action: Option<&str>) -> OfflineResult<()> {
    self.host.close_notification().await?;

    if action == Some(ACTION_EXPLORE) {
      self.host.open_window(&self.explore_route).await?;
    }
    Ok(())
  }

  /// Tell the user queued changes went through. Silent when nothing was replayed.
  pub async fn on_sync_complete(
    &self,
    report: &SyncReport,
  ) -> OfflineResult<Option<NotificationIntent>> {
    if report.replayed == 0 {
      return Ok(None);
    }

    let mut body = format!(
      "{} offline change{} synchronized",
      report.replayed,
      if report.replayed == 1 { "" } else { "s" }
    );
    if report.failed > 0 {
      body.push_str(&format!(", {} still pending", report.failed));
    }

    let intent = self.intent(body);
    self.host.show_notification(&intent).await?;
    Ok(Some(intent))
  }

  fn intent(&self, body: String) -> NotificationIntent {
    NotificationIntent {
      title: self.config.title.clone(),
      body,
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibrate: vec![100, 50, 100],
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: 1,
      },
      actions: vec![
        NotificationAction {
          action: ACTION_EXPLORE.to_string(),
          title: "View Details".to_string(),
          icon: "/icons/checkmark.png".to_string(),
        },
        NotificationAction {
          action: ACTION_CLOSE.to_string(),
          title: "Close".to_string(),
          icon: "/icons/xmark.png".to_string(),
        },
      ],
    }
  }
}
