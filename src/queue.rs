//! Durable FIFO queue of mutations that could not reach the API.
//!
//! Entries are immutable once written. Order is insertion order (the
//! autoincrement id), so replay never reorders dependent mutations.

use chrono::{DateTime, Utc};
use reqwest::Method;
use rusqlite::params;
use serde::Serialize;
use std::path::Path;
use url::Url;

use crate::cache::parse_datetime;
use crate::db::Database;
use crate::error::{OfflineError, OfflineResult};
use crate::http::{Headers, Request};

/// One queued request, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedMutation {
  pub id: i64,
  pub method: String,
  pub url: String,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

impl QueuedMutation {
  /// Rebuild the original request for replay.
  pub fn to_request(&self) -> OfflineResult<Request> {
    let method = Method::from_bytes(self.method.as_bytes())
      .map_err(|_| OfflineError::InvalidRequest(format!("bad stored method '{}'", self.method)))?;
    let url = Url::parse(&self.url)
      .map_err(|e| OfflineError::InvalidRequest(format!("bad stored url '{}': {}", self.url, e)))?;

    Ok(Request {
      method,
      url,
      headers: self.headers.clone(),
      body: self.body.clone(),
    })
  }
}

/// Queue contract. Removal is by id and idempotent.
pub trait MutationQueue: Send + Sync {
  /// Persist a request; returns its queue id.
  fn enqueue(&self, request: &Request) -> OfflineResult<i64>;

  /// Every queued entry in enqueue order.
  fn peek_all(&self) -> OfflineResult<Vec<QueuedMutation>>;

  /// Remove an entry. Removing an id that is already gone is not an error.
  fn remove(&self, id: i64) -> OfflineResult<()>;

  fn len(&self) -> OfflineResult<usize>;

  fn is_empty(&self) -> OfflineResult<bool> {
    Ok(self.len()? == 0)
  }
}

/// SQLite-backed queue. Survives process restarts when opened on a file.
pub struct SqliteQueue {
  db: Database,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queued_mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL
);
"#;

impl SqliteQueue {
  pub fn open(path: &Path) -> OfflineResult<Self> {
    Ok(Self {
      db: Database::open(path, QUEUE_SCHEMA)?,
    })
  }

  pub fn open_in_memory() -> OfflineResult<Self> {
    Ok(Self {
      db: Database::open_in_memory(QUEUE_SCHEMA)?,
    })
  }
}

impl MutationQueue for SqliteQueue {
  fn enqueue(&self, request: &Request) -> OfflineResult<i64> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&request.headers)?;

    conn.execute(
      "INSERT INTO queued_mutations (method, url, headers, body, enqueued_at)
       VALUES (?, ?, ?, ?, ?)",
      params![
        request.method.as_str(),
        request.url.as_str(),
        headers,
        request.body,
        Utc::now().to_rfc3339()
      ],
    )?;

    Ok(conn.last_insert_rowid())
  }

  fn peek_all(&self) -> OfflineResult<Vec<QueuedMutation>> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare(
      "SELECT id, method, url, headers, body, enqueued_at FROM queued_mutations ORDER BY id",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Option<Vec<u8>>>(4)?,
          row.get::<_, String>(5)?,
        ))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    rows
      .into_iter()
      .map(
        |(id, method, url, headers, body, enqueued_at)| -> OfflineResult<QueuedMutation> {
          Ok(QueuedMutation {
            id,
            method,
            url,
            headers: serde_json::from_str(&headers)?,
            body,
            enqueued_at: parse_datetime(&enqueued_at)?,
          })
        },
      )
      .collect()
  }

  fn remove(&self, id: i64) -> OfflineResult<()> {
    let conn = self.db.conn()?;
    conn.execute("DELETE FROM queued_mutations WHERE id = ?", params![id])?;
    Ok(())
  }

  fn len(&self) -> OfflineResult<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM queued_mutations", [], |row| {
      row.get(0)
    })?;
    Ok(count as usize)
  }
}
