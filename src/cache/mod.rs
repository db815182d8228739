//! Offline request cache.
//!
//! This module provides:
//! - Versioned cache generations in a durable SQLite store
//! - Network-first fetching with cache fallback for API reads
//! - Cache-first fetching for static assets and navigations
//! - Capture of failed mutations into the sync queue

mod layer;
mod result;
mod storage;

pub use layer::FetchEngine;
pub use result::{FetchResult, ResponseSource};
pub use storage::{CacheStorage, CachedResponse, SqliteCache};

pub(crate) use storage::parse_datetime;
