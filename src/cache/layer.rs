//! Query client: the process-wide cache that reads, writes and invalidates go through.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::key::QueryKey;
use super::storage::{CacheEntry, CacheStorage};
use super::traits::{CacheSource, QueryResult};

/// Upper bound for a single fetch attempt.
pub const DEFAULT_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Retries after a failed fetch attempt.
pub const DEFAULT_RETRIES: u32 = 1;

/// Type-erased fetcher, kept per key so invalidated queries can be refetched.
type Refetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Cache client shared by every resource.
///
/// Cloning is cheap; all clones share the same cache.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

struct Inner {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
  fetch_timeout: std::time::Duration,
  retries: u32,
  /// Fetchers of queries that have been read in this process
  refetchers: Mutex<HashMap<QueryKey, Refetcher>>,
  /// Bumped on cancellation; a fetch only commits if the generation is unchanged
  generations: Mutex<HashMap<QueryKey, u64>>,
  /// Running background refetches
  background: Mutex<HashMap<QueryKey, AbortHandle>>,
  /// All background work, awaited by `drain`
  tasks: Mutex<JoinSet<()>>,
}

/// Builder for [`QueryClient`].
pub struct QueryClientBuilder {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
  fetch_timeout: std::time::Duration,
  retries: u32,
}

impl QueryClientBuilder {
  #[allow(dead_code)]
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn fetch_timeout(mut self, timeout: std::time::Duration) -> Self {
    self.fetch_timeout = timeout;
    self
  }

  pub fn retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  pub fn build(self) -> QueryClient {
    QueryClient {
      inner: Arc::new(Inner {
        storage: self.storage,
        clock: self.clock,
        fetch_timeout: self.fetch_timeout,
        retries: self.retries,
        refetchers: Mutex::new(HashMap::new()),
        generations: Mutex::new(HashMap::new()),
        background: Mutex::new(HashMap::new()),
        tasks: Mutex::new(JoinSet::new()),
      }),
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
  mutex.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

impl QueryClient {
  /// Create a client with default timeout, retries and the system clock.
  #[allow(dead_code)]
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self::builder(storage).build()
  }

  pub fn builder(storage: Arc<dyn CacheStorage>) -> QueryClientBuilder {
    QueryClientBuilder {
      storage,
      clock: Arc::new(SystemClock),
      fetch_timeout: DEFAULT_FETCH_TIMEOUT,
      retries: DEFAULT_RETRIES,
    }
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.inner.clock.now()
  }

  /// Read a query with stale-while-revalidate semantics.
  ///
  /// 1. Fresh entry: returned as is, no network call
  /// 2. Stale or invalidated entry: returned immediately, refetched in the background
  /// 3. No entry: fetched, stored and returned
  ///
  /// Fetch failures never discard cached data; they surface in `QueryResult::error`.
  pub async fn fetch_query<T, F, Fut>(
    &self,
    key: &QueryKey,
    stale_time: Duration,
    fetcher: F,
  ) -> Result<QueryResult<T>>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let refetcher = erase(fetcher);
    lock(&self.inner.refetchers)?.insert(key.clone(), Arc::clone(&refetcher));

    if let Some(entry) = self.inner.storage.get(key)? {
      let data: T = decode(key, entry.data)?;

      if !entry.invalidated && !self.is_stale(entry.fetched_at, stale_time) {
        debug!(key = %key, "cache hit");
        return Ok(QueryResult::from_cache(
          data,
          entry.fetched_at,
          CacheSource::CacheFresh,
          entry.error,
        ));
      }

      debug!(key = %key, invalidated = entry.invalidated, "serving stale data, revalidating");
      self.spawn_refetch(key.clone(), refetcher)?;
      let source = if entry.error.is_some() {
        CacheSource::Offline
      } else {
        CacheSource::CacheStale
      };
      return Ok(QueryResult::from_cache(data, entry.fetched_at, source, entry.error));
    }

    // No cache, must fetch from network
    let generation = self.generation(key)?;
    match self.run_fetch(key, &refetcher).await {
      Ok(value) => {
        let fetched_at = self.now();
        self.commit(key, generation, value.clone())?;
        Ok(QueryResult::from_network(decode(key, value)?, fetched_at))
      }
      Err(e) => {
        warn!(key = %key, error = %e, "fetch failed with nothing cached");
        Ok(QueryResult::failed(e.to_string()))
      }
    }
  }

  /// Get the cached data for an exact key.
  pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<T>> {
    match self.inner.storage.get(key)? {
      Some(entry) => Ok(Some(decode(key, entry.data)?)),
      None => Ok(None),
    }
  }

  /// Replace the cached data for a key; the entry counts as freshly fetched.
  pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, data: &T) -> Result<()> {
    let value =
      serde_json::to_value(data).map_err(|e| eyre!("Failed to serialize data for {}: {}", key, e))?;
    self
      .inner
      .storage
      .put(key, &CacheEntry::fresh(value, self.now()))
  }

  /// Copy every entry under `prefix`.
  pub fn snapshot(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>> {
    self.inner.storage.entries_with_prefix(prefix)
  }

  /// Put snapshot entries back exactly as they were.
  ///
  /// Every entry is attempted; the first failure is returned.
  pub fn restore(&self, snapshot: &[(QueryKey, CacheEntry)]) -> Result<()> {
    let mut first_error = None;
    for (key, entry) in snapshot {
      if let Err(e) = self.inner.storage.put(key, entry) {
        warn!(key = %key, error = %e, "failed to restore cached entry");
        first_error.get_or_insert(e);
      }
    }
    first_error.map_or(Ok(()), Err)
  }

  /// True if the entry exists and has been invalidated.
  #[allow(dead_code)]
  pub fn is_invalidated(&self, key: &QueryKey) -> Result<bool> {
    Ok(
      self
        .inner
        .storage
        .get(key)?
        .is_some_and(|entry| entry.invalidated),
    )
  }

  /// Cancel in-flight fetches for every key under `prefix`.
  ///
  /// Background tasks are aborted, and any fetch that still completes is discarded.
  pub fn cancel_queries(&self, prefix: &QueryKey) -> Result<()> {
    {
      let mut generations = lock(&self.inner.generations)?;
      for (_, generation) in generations.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
        *generation += 1;
      }
    }

    let mut background = lock(&self.inner.background)?;
    background.retain(|key, handle| {
      if key.starts_with(prefix) {
        debug!(key = %key, "cancelling background refetch");
        handle.abort();
        false
      } else {
        true
      }
    });
    Ok(())
  }

  /// Mark every entry under `prefix` invalid so the next read refetches.
  pub fn invalidate_queries(&self, prefix: &QueryKey) -> Result<usize> {
    let marked = self.inner.storage.mark_invalid(prefix)?;
    debug!(prefix = %prefix, marked, "invalidated queries");
    Ok(marked)
  }

  /// Refetch every cached query under `prefix` that was read in this process.
  ///
  /// Failures are recorded on the entries, not returned.
  pub async fn refetch_queries(&self, prefix: &QueryKey) -> Result<()> {
    let cached: Vec<QueryKey> = self
      .inner
      .storage
      .entries_with_prefix(prefix)?
      .into_iter()
      .map(|(key, _)| key)
      .collect();

    let targets: Vec<(QueryKey, Refetcher)> = {
      let refetchers = lock(&self.inner.refetchers)?;
      cached
        .into_iter()
        .filter_map(|key| {
          let refetcher = Arc::clone(refetchers.get(&key)?);
          Some((key, refetcher))
        })
        .collect()
    };

    let mut with_generation = Vec::with_capacity(targets.len());
    for (key, refetcher) in targets {
      let generation = self.generation(&key)?;
      with_generation.push((key, refetcher, generation));
    }

    join_all(
      with_generation
        .into_iter()
        .map(|(key, refetcher, generation)| async move {
          self.refetch_into(&key, &refetcher, generation).await;
        }),
    )
    .await;

    Ok(())
  }

  /// Run `future` in the background; `drain` waits for it.
  pub fn spawn_task<Fut>(&self, future: Fut) -> Result<AbortHandle>
  where
    Fut: Future<Output = ()> + Send + 'static,
  {
    let mut tasks = lock(&self.inner.tasks)?;
    // Finished tasks stay in the set until joined; reap them here since
    // `drain` only runs at exit
    while let Some(joined) = tasks.try_join_next() {
      if let Err(e) = joined {
        if e.is_panic() {
          warn!(error = %e, "background cache task panicked");
        }
      }
    }
    Ok(tasks.spawn(future))
  }

  /// Wait for every background refetch and settlement to finish.
  pub async fn drain(&self) -> Result<()> {
    loop {
      let mut tasks = std::mem::take(&mut *lock(&self.inner.tasks)?);
      if tasks.is_empty() {
        return Ok(());
      }
      while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
          if e.is_panic() {
            warn!(error = %e, "background cache task panicked");
          }
        }
      }
    }
  }

  /// Drop every cached query. Used on logout.
  pub fn clear(&self) -> Result<()> {
    for (_, handle) in lock(&self.inner.background)?.drain() {
      handle.abort();
    }
    for generation in lock(&self.inner.generations)?.values_mut() {
      *generation += 1;
    }
    lock(&self.inner.refetchers)?.clear();
    self.inner.storage.clear()
  }

  fn is_stale(&self, fetched_at: DateTime<Utc>, stale_time: Duration) -> bool {
    self.now() - fetched_at > stale_time
  }

  fn generation(&self, key: &QueryKey) -> Result<u64> {
    Ok(*lock(&self.inner.generations)?.entry(key.clone()).or_insert(0))
  }

  /// Start a background refetch unless one is already running for `key`.
  fn spawn_refetch(&self, key: QueryKey, refetcher: Refetcher) -> Result<()> {
    let mut background = lock(&self.inner.background)?;
    if background.get(&key).is_some_and(|h| !h.is_finished()) {
      return Ok(());
    }

    let generation = self.generation(&key)?;
    let client = self.clone();
    let task_key = key.clone();
    let handle = self.spawn_task(async move {
      client.refetch_into(&task_key, &refetcher, generation).await;
      if let Ok(mut background) = lock(&client.inner.background) {
        background.remove(&task_key);
      }
    })?;
    background.insert(key, handle);
    Ok(())
  }

  async fn refetch_into(&self, key: &QueryKey, refetcher: &Refetcher, generation: u64) {
    let stored = match self.run_fetch(key, refetcher).await {
      Ok(value) => self.commit(key, generation, value),
      Err(e) => {
        warn!(key = %key, error = %e, "refetch failed, keeping cached data");
        self.record_error(key, generation, e.to_string())
      }
    };
    if let Err(e) = stored {
      warn!(key = %key, error = %e, "failed to update cache");
    }
  }

  /// Fetch with timeout, retrying failed attempts up to `retries` times.
  async fn run_fetch(&self, key: &QueryKey, refetcher: &Refetcher) -> Result<Value> {
    let mut attempt = 0;
    loop {
      let outcome = match tokio::time::timeout(self.inner.fetch_timeout, refetcher()).await {
        Ok(result) => result,
        Err(_) => Err(eyre!(
          "Request timed out after {} seconds",
          self.inner.fetch_timeout.as_secs()
        )),
      };

      match outcome {
        Ok(value) => return Ok(value),
        Err(e) if attempt < self.inner.retries => {
          attempt += 1;
          debug!(key = %key, attempt, error = %e, "fetch failed, retrying");
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Store fetched data unless the fetch was cancelled in the meantime.
  fn commit(&self, key: &QueryKey, generation: u64, value: Value) -> Result<bool> {
    let generations = lock(&self.inner.generations)?;
    if generations.get(key).copied().unwrap_or(0) != generation {
      debug!(key = %key, "discarding result of cancelled fetch");
      return Ok(false);
    }
    self
      .inner
      .storage
      .put(key, &CacheEntry::fresh(value, self.now()))?;
    Ok(true)
  }

  fn record_error(&self, key: &QueryKey, generation: u64, error: String) -> Result<bool> {
    let generations = lock(&self.inner.generations)?;
    if generations.get(key).copied().unwrap_or(0) != generation {
      return Ok(false);
    }
    if let Some(mut entry) = self.inner.storage.get(key)? {
      entry.error = Some(error);
      self.inner.storage.put(key, &entry)?;
    }
    Ok(true)
  }
}

fn erase<T, F, Fut>(fetcher: F) -> Refetcher
where
  T: Serialize + Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  Arc::new(move || {
    let fut = fetcher();
    async move {
      let data = fut.await?;
      serde_json::to_value(&data).map_err(|e| eyre!("Failed to serialize query data: {}", e))
    }
    .boxed()
  })
}

fn decode<T: DeserializeOwned>(key: &QueryKey, value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| eyre!("Failed to decode cached data for {}: {}", key, e))
}
