//! Shared handles injected into every component.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStorage, SqliteCache};
use crate::config::Config;
use crate::host::Host;
use crate::network::{HttpNetwork, Network};
use crate::queue::{MutationQueue, SqliteQueue};

/// Everything the offline layer shares across handlers.
///
/// The cache store and the mutation queue are the only mutable shared
/// state; both are safe to use from concurrently running handlers.
#[derive(Clone)]
pub struct Context {
  pub config: Config,
  pub cache: Arc<dyn CacheStorage>,
  pub queue: Arc<dyn MutationQueue>,
  pub network: Arc<dyn Network>,
  pub host: Arc<dyn Host>,
}

impl Context {
  pub fn new(
    config: Config,
    cache: Arc<dyn CacheStorage>,
    queue: Arc<dyn MutationQueue>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
  ) -> Self {
    Self {
      config,
      cache,
      queue,
      network,
      host,
    }
  }

  /// Open the durable stores under the configured data directory and build
  /// a real HTTP client.
  pub fn open(config: Config, host: Arc<dyn Host>) -> Result<Self> {
    let data_dir = config.data_dir()?;

    let cache = SqliteCache::open(&data_dir.join("cache.db"))
      .map_err(|e| eyre!("Failed to open cache store: {}", e))?;
    let queue = SqliteQueue::open(&data_dir.join("queue.db"))
      .map_err(|e| eyre!("Failed to open mutation queue: {}", e))?;
    let network = HttpNetwork::new(config.request_timeout())
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    info!(data_dir = %data_dir.display(), generation = %config.cache_version, "context opened");

    Ok(Self::new(
      config,
      Arc::new(cache),
      Arc::new(queue),
      Arc::new(network),
      host,
    ))
  }
}
