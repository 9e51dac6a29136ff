//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be cached.
///
/// Implementors are plain records with a server-assigned integer id.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Server-assigned identifier (temporary, negative ids are used for
  /// optimistic records that the server has not confirmed yet)
  fn id(&self) -> i64;

  /// Entity type name, also the root segment of its query keys (e.g., "employees")
  fn entity_type() -> &'static str;
}

/// Result of a read, shaped like a UI read hook: `{data, is_loading, error}`
/// plus metadata about where the data came from.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
  /// The data, if any is available
  pub data: Option<T>,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the network
  pub fetched_at: Option<DateTime<Utc>>,
  /// No data yet and a fetch is in progress
  pub is_loading: bool,
  /// A fetch is in progress (possibly in the background)
  pub is_fetching: bool,
  /// Last fetch error for this query
  pub error: Option<String>,
}

impl<T> QueryResult<T> {
  /// Nothing to show yet, first fetch in progress.
  pub fn loading() -> Self {
    Self {
      data: None,
      source: CacheSource::Empty,
      fetched_at: None,
      is_loading: true,
      is_fetching: true,
      error: None,
    }
  }

  /// Create a new result from fresh network data.
  pub fn from_network(data: T, fetched_at: DateTime<Utc>) -> Self {
    Self {
      data: Some(data),
      source: CacheSource::Network,
      fetched_at: Some(fetched_at),
      is_loading: false,
      is_fetching: false,
      error: None,
    }
  }

  /// Create a new result from cached data.
  pub fn from_cache(
    data: T,
    fetched_at: DateTime<Utc>,
    source: CacheSource,
    error: Option<String>,
  ) -> Self {
    Self {
      data: Some(data),
      source,
      fetched_at: Some(fetched_at),
      is_loading: false,
      is_fetching: matches!(source, CacheSource::CacheStale | CacheSource::Offline),
      error,
    }
  }

  /// A fetch failed and nothing was cached.
  pub fn failed(error: String) -> Self {
    Self {
      data: None,
      source: CacheSource::Empty,
      fetched_at: None,
      is_loading: false,
      is_fetching: false,
      error: Some(error),
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

/// Indicates where the data of a [`QueryResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale or invalidated; a background refetch was started
  CacheStale,
  /// Last refetch failed, serving the last known-good value
  Offline,
  /// Data of the previous key, kept while the current key loads
  Placeholder,
  /// No data
  Empty,
}
