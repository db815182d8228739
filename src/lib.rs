//! Offline request cache and background sync for the catalog management client.
//!
//! Requests from the host application are classified and served either
//! network-first (API reads) or cache-first (shell and static assets).
//! Mutations that cannot reach the API are queued durably and replayed when
//! the host reports that connectivity is back.

pub mod cache;
pub mod classify;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod notify;
pub mod queue;
pub mod sync;
