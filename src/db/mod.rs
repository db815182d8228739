use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{OfflineError, OfflineResult};

/// A SQLite connection with its schema applied, shared behind a mutex.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create a database file and run `schema` against it.
  pub fn open(path: &Path, schema: &str) -> OfflineResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        OfflineError::StoreUnavailable(format!("Failed to create database directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      OfflineError::StoreUnavailable(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn, schema)
  }

  /// Private, non-durable database. Used by tests and throwaway contexts.
  pub fn open_in_memory(schema: &str) -> OfflineResult<Self> {
    Self::with_connection(Connection::open_in_memory()?, schema)
  }

  fn with_connection(conn: Connection, schema: &str) -> OfflineResult<Self> {
    conn
      .execute_batch(schema)
      .map_err(|e| OfflineError::StoreUnavailable(format!("Failed to run migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Lock the connection for a unit of work.
  pub fn conn(&self) -> OfflineResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| OfflineError::StoreUnavailable(format!("Lock poisoned: {}", e)))
  }
}
