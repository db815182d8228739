//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use crate::db::Database;
use crate::error::{OfflineError, OfflineResult};
use crate::http::{RequestKey, Response};

/// A response read back from the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Versioned named containers of cached responses.
///
/// Each generation is an independent namespace; entries are only ever
/// removed by deleting their whole generation.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, generation: &str) -> OfflineResult<()>;

  /// All known generation tags, oldest first.
  fn generations(&self) -> OfflineResult<Vec<String>>;

  /// Delete a generation and everything in it. Returns false if it did not exist.
  fn delete_generation(&self, generation: &str) -> OfflineResult<bool>;

  /// Store (or overwrite) one entry.
  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> OfflineResult<()>;

  /// Store a batch of entries and mark the generation installed, in one
  /// transaction: all or none.
  fn install(&self, generation: &str, entries: &[(RequestKey, Response)]) -> OfflineResult<()>;

  /// Whether `install` has completed for this generation. Entries written
  /// with `put` alone do not count.
  fn is_installed(&self, generation: &str) -> OfflineResult<bool>;

  /// Look up an entry in one generation.
  fn get(&self, generation: &str, key: &RequestKey) -> OfflineResult<Option<CachedResponse>>;

  /// Number of entries in a generation.
  fn entry_count(&self, generation: &str) -> OfflineResult<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteCache {
  db: Database,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- installed_at is only set by a completed shell install
CREATE TABLE IF NOT EXISTS cache_generations (
    tag TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    installed_at TEXT
);

-- One row per cached GET, keyed by sha256(method + url)
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (generation, key_hash)
);
"#;

impl SqliteCache {
  pub fn open(path: &Path) -> OfflineResult<Self> {
    Ok(Self {
      db: Database::open(path, CACHE_SCHEMA)?,
    })
  }

  pub fn open_in_memory() -> OfflineResult<Self> {
    Ok(Self {
      db: Database::open_in_memory(CACHE_SCHEMA)?,
    })
  }
}

fn insert_generation(conn: &rusqlite::Connection, generation: &str) -> OfflineResult<()> {
  conn.execute(
    "INSERT OR IGNORE INTO cache_generations (tag, created_at) VALUES (?, ?)",
    params![generation, Utc::now().to_rfc3339()],
  )?;
  Ok(())
}

fn insert_entry(
  conn: &rusqlite::Connection,
  generation: &str,
  key: &RequestKey,
  response: &Response,
) -> OfflineResult<()> {
  if !response.is_success() {
    return Err(OfflineError::InvalidRequest(format!(
      "refusing to cache status {} for {}",
      response.status,
      key.url()
    )));
  }

  let headers = serde_json::to_string(&response.headers)?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries (generation, key_hash, url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?)",
    params![
      generation,
      key.cache_hash(),
      key.url(),
      response.status,
      headers,
      response.body,
      Utc::now().to_rfc3339()
    ],
  )?;
  Ok(())
}

impl CacheStorage for SqliteCache {
  fn open_generation(&self, generation: &str) -> OfflineResult<()> {
    let conn = self.db.conn()?;
    insert_generation(&conn, generation)
  }

  fn generations(&self) -> OfflineResult<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare("SELECT tag FROM cache_generations ORDER BY created_at, tag")?;
    let tags = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(tags)
  }

  fn delete_generation(&self, generation: &str) -> OfflineResult<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )?;
    let removed = tx.execute(
      "DELETE FROM cache_generations WHERE tag = ?",
      params![generation],
    )?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> OfflineResult<()> {
    let mut conn = self.db.conn()?;
    let tx = conn.transaction()?;
    insert_generation(&tx, generation)?;
    insert_entry(&tx, generation, key, response)?;
    tx.commit()?;
    Ok(())
  }

  fn install(&self, generation: &str, entries: &[(RequestKey, Response)]) -> OfflineResult<()> {
    let mut conn = self.db.conn()?;
    // Dropping the transaction without commit rolls back
    let tx = conn.transaction()?;
    insert_generation(&tx, generation)?;
    for (key, response) in entries {
      insert_entry(&tx, generation, key, response)?;
    }
    tx.execute(
      "UPDATE cache_generations SET installed_at = ? WHERE tag = ?",
      params![Utc::now().to_rfc3339(), generation],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn is_installed(&self, generation: &str) -> OfflineResult<bool> {
    let conn = self.db.conn()?;
    let installed_at: Option<Option<String>> = conn
      .query_row(
        "SELECT installed_at FROM cache_generations WHERE tag = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()?;
    Ok(matches!(installed_at, Some(Some(_))))
  }

  fn get(&self, generation: &str, key: &RequestKey) -> OfflineResult<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND key_hash = ?",
        params![generation, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)?;
        let cached_at = parse_datetime(&cached_at)?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn entry_count(&self, generation: &str) -> OfflineResult<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
      params![generation],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }
}

/// Parse an RFC 3339 timestamp written by this module.
pub(crate) fn parse_datetime(s: &str) -> OfflineResult<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| OfflineError::StoreUnavailable(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(url: &str) -> RequestKey {
    RequestKey::for_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn test_put_then_get() {
    let cache = SqliteCache::open_in_memory().unwrap();
    let mut response = Response::ok(b"[{\"id\":1}]".to_vec());
    response.headers.push(("content-type".into(), "application/json".into()));

    cache
      .put("v1", &key("https://app.test/api/v1/catalogs/"), &response)
      .unwrap();

    let cached = cache
      .get("v1", &key("https://app.test/api/v1/catalogs/"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, response);
    assert_eq!(cache.generations().unwrap(), vec!["v1".to_string()]);
  }

  #[test]
  fn test_put_overwrites() {
    let cache = SqliteCache::open_in_memory().unwrap();
    let k = key("https://app.test/api/v1/catalogs/");
    cache.put("v1", &k, &Response::ok("old")).unwrap();
    cache.put("v1", &k, &Response::ok("new")).unwrap();

    assert_eq!(cache.entry_count("v1").unwrap(), 1);
    assert_eq!(cache.get("v1", &k).unwrap().unwrap().response.body, b"new");
  }

  #[test]
  fn test_generations_are_isolated() {
    let cache = SqliteCache::open_in_memory().unwrap();
    let k = key("https://app.test/index.html");
    cache.put("v1", &k, &Response::ok("one")).unwrap();

    assert!(cache.get("v2", &k).unwrap().is_none());
  }

  #[test]
  fn test_refuses_unsuccessful_status() {
    let cache = SqliteCache::open_in_memory().unwrap();
    let k = key("https://app.test/api/v1/catalogs/");
    assert!(cache.put("v1", &k, &Response::new(500, "boom")).is_err());
    assert!(cache.get("v1", &k).unwrap().is_none());
  }

  #[test]
  fn test_install_is_atomic() {
    let cache = SqliteCache::open_in_memory().unwrap();
    let entries = vec![
      (key("https://app.test/"), Response::ok("shell")),
      (key("https://app.test/index.html"), Response::new(404, "missing")),
    ];

    assert!(cache.install("v1", &entries).is_err());
    assert_eq!(cache.entry_count("v1").unwrap(), 0);
    assert!(cache.generations().unwrap().is_empty());
    assert!(!cache.is_installed("v1").unwrap());
  }

  #[test]
  fn test_put_does_not_mark_installed() {
    let cache = SqliteCache::open_in_memory().unwrap();
    cache
      .put("v1", &key("https://app.test/api/v1/catalogs/"), &Response::ok("[]"))
      .unwrap();
    assert!(!cache.is_installed("v1").unwrap());

    cache
      .install("v1", &[(key("https://app.test/"), Response::ok("shell"))])
      .unwrap();
    assert!(cache.is_installed("v1").unwrap());
    assert!(!cache.is_installed("v2").unwrap());
  }

  #[test]
  fn test_write_after_install_keeps_marker() {
    let cache = SqliteCache::open_in_memory().unwrap();
    cache
      .install("v1", &[(key("https://app.test/"), Response::ok("shell"))])
      .unwrap();
    cache
      .put("v1", &key("https://app.test/app.js"), &Response::ok("js"))
      .unwrap();
    assert!(cache.is_installed("v1").unwrap());
  }

  #[test]
  fn test_delete_generation() {
    let cache = SqliteCache::open_in_memory().unwrap();
    let k = key("https://app.test/index.html");
    cache.put("v1", &k, &Response::ok("old")).unwrap();
    cache.put("v2", &k, &Response::ok("new")).unwrap();

    assert!(cache.delete_generation("v1").unwrap());
    assert!(!cache.delete_generation("v1").unwrap());
    assert_eq!(cache.generations().unwrap(), vec!["v2".to_string()]);
    assert_eq!(cache.get("v2", &k).unwrap().unwrap().response.body, b"new");
  }

  #[test]
  fn test_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let k = key("https://app.test/index.html");

    {
      let cache = SqliteCache::open(&path).unwrap();
      cache.put("v1", &k, &Response::ok("shell")).unwrap();
    }

    let cache = SqliteCache::open(&path).unwrap();
    assert_eq!(cache.get("v1", &k).unwrap().unwrap().response.body, b"shell");
  }
}
