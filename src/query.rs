//! Polling observer over a single cached query.
//!
//! A `Query<T>` is what a long-lived view holds on to. It reads through the
//! shared [`QueryClient`], so every observer of the same key sees the same
//! cached data, and it delivers results through a channel that the view
//! drains on each tick.
//!
//! # Example
//!
//! ```ignore
//! let mut query = handle.list_query(&filters);
//!
//! // Start fetching
//! query.fetch();
//!
//! // In the tick handler
//! if query.poll() {
//!     render(query.result());
//! }
//!
//! // Switching filters keeps the old rows on screen while the new ones load
//! query.set_key(keys.list(&new_filters), fetcher);
//! ```

use chrono::Duration;
use color_eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::cache::{CacheSource, QueryClient, QueryKey, QueryResult};

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Default staleness window when none is configured.
const DEFAULT_STALE_TIME: i64 = 60;

pub struct Query<T> {
  client: QueryClient,
  key: QueryKey,
  fetcher: FetcherFn<T>,
  stale_time: Duration,
  keep_previous_data: bool,
  result: QueryResult<T>,
  receiver: Option<mpsc::UnboundedReceiver<QueryResult<T>>>,
  task: Option<AbortHandle>,
}

impl<T> Query<T>
where
  T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
  pub fn new<F, Fut>(client: QueryClient, key: QueryKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      client,
      key,
      fetcher: boxed(fetcher),
      stale_time: Duration::seconds(DEFAULT_STALE_TIME),
      keep_previous_data: false,
      result: QueryResult::loading(),
      receiver: None,
      task: None,
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Keep the previous key's data visible while a new key loads.
  pub fn keep_previous_data(mut self, keep: bool) -> Self {
    self.keep_previous_data = keep;
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn result(&self) -> &QueryResult<T> {
    &self.result
  }

  pub fn data(&self) -> Option<&T> {
    self.result.data.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.result.is_loading
  }

  /// Read the current key through the cache. A fetch already in flight is
  /// left alone.
  pub fn fetch(&mut self) {
    if self.receiver.is_some() {
      return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let client = self.client.clone();
    let key = self.key.clone();
    let stale_time = self.stale_time;
    let fetcher = Arc::clone(&self.fetcher);

    let spawned = self.client.spawn_task(async move {
      let result = match client
        .fetch_query(&key, stale_time, move || fetcher())
        .await
      {
        Ok(result) => result,
        Err(e) => QueryResult::failed(e.to_string()),
      };
      // The observer may have moved to another key
      let _ = tx.send(result);
    });

    match spawned {
      Ok(handle) => {
        self.receiver = Some(rx);
        self.task = Some(handle);
        if self.result.data.is_some() {
          self.result.is_fetching = true;
        } else {
          self.result = QueryResult::loading();
        }
      }
      Err(e) => {
        warn!(key = %self.key, error = %e, "failed to start query");
        self.result = QueryResult::failed(e.to_string());
      }
    }
  }

  /// Point the observer at another key and fetch it.
  pub fn set_key<F, Fut>(&mut self, key: QueryKey, fetcher: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if key == self.key {
      return;
    }
    debug!(from = %self.key, to = %key, "query key changed");

    self.cancel();
    self.key = key;
    self.fetcher = boxed(fetcher);

    let previous = self.result.data.take();
    self.result = match previous {
      Some(data) if self.keep_previous_data => QueryResult {
        data: Some(data),
        source: CacheSource::Placeholder,
        fetched_at: None,
        is_loading: false,
        is_fetching: true,
        error: None,
      },
      _ => QueryResult::loading(),
    };
    self.fetch();
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the result changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.finish();
        // A failed refetch should not blank out what is on screen
        if result.data.is_none() && result.is_error() && self.result.data.is_some() {
          self.result.error = result.error;
          self.result.is_fetching = false;
        } else {
          self.result = result;
        }
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.finish();
        self.result.is_loading = false;
        self.result.is_fetching = false;
        self.result.error = Some("Query was cancelled".to_string());
        true
      }
    }
  }

  /// Drop the fetch in flight, if any.
  pub fn cancel(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
    self.receiver = None;
  }

  fn finish(&mut self) {
    self.receiver = None;
    self.task = None;
  }
}

fn boxed<T, F, Fut>(fetcher: F) -> FetcherFn<T>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  Arc::new(move || fetcher().boxed())
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("result", &self.result)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}
