//! Optimistic mutations with snapshot rollback.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use tracing::{debug, info, warn};

use super::key::QueryKey;
use super::layer::QueryClient;
use super::settlement::{InvalidationPolicy, Settlement};
use crate::notify::{Notification, Notifier};

/// One optimistic write against the cached lists under a prefix.
///
/// Protocol, in order:
/// 1. cancel in-flight fetches under the list prefix
/// 2. snapshot every cached list under it
/// 3. splice the provisional change into each list
/// 4. send the request
/// 5. on failure restore the snapshot and notify the error
/// 6. on success notify the confirmation
/// 7. settle: invalidate the targets, whatever the outcome
///
/// Once the request has been sent its outcome is what `execute` returns.
/// Cache failures during rollback or settlement are logged and leave the
/// entries to be refetched on a later read.
pub struct Mutation<'a> {
  client: &'a QueryClient,
  notifier: &'a dyn Notifier,
  lists: QueryKey,
  settlement: Settlement,
  success_title: String,
  success_message: String,
  error_title: String,
}

impl<'a> Mutation<'a> {
  pub fn new(
    client: &'a QueryClient,
    notifier: &'a dyn Notifier,
    lists: QueryKey,
    policy: InvalidationPolicy,
  ) -> Self {
    let settlement = Settlement::new(policy).target(lists.clone());
    Self {
      client,
      notifier,
      lists,
      settlement,
      success_title: "Saved".to_string(),
      success_message: String::new(),
      error_title: "Request failed".to_string(),
    }
  }

  /// Also invalidate `key` on settlement.
  pub fn invalidate(mut self, key: QueryKey) -> Self {
    self.settlement = self.settlement.target(key);
    self
  }

  pub fn on_success(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
    self.success_title = title.into();
    self.success_message = message.into();
    self
  }

  pub fn on_error(mut self, title: impl Into<String>) -> Self {
    self.error_title = title.into();
    self
  }

  /// Run the mutation. `splice` computes the provisional list from a cached one.
  pub async fn execute<T, U, S, Fut>(self, splice: S, request: Fut) -> Result<U>
  where
    T: Serialize + DeserializeOwned,
    S: Fn(Vec<T>) -> Vec<T>,
    Fut: Future<Output = Result<U>>,
  {
    self.client.cancel_queries(&self.lists)?;

    let snapshot = self.client.snapshot(&self.lists)?;
    for (key, entry) in &snapshot {
      let current: Vec<T> = serde_json::from_value(entry.data.clone())
        .map_err(|e| eyre!("Failed to decode cached list {}: {}", key, e))?;
      self.client.set_query_data(key, &splice(current))?;
    }
    debug!(lists = %self.lists, patched = snapshot.len(), "applied optimistic update");

    let outcome = request.await;

    match &outcome {
      Ok(_) => {
        info!(title = %self.success_title, "mutation succeeded");
        self.notifier.notify(Notification::success(
          self.success_title.as_str(),
          self.success_message.as_str(),
        ));
      }
      Err(e) => {
        warn!(lists = %self.lists, error = %e, "mutation failed, rolling back");
        if let Err(restore_error) = self.client.restore(&snapshot) {
          warn!(lists = %self.lists, error = %restore_error, "rollback failed");
        }
        self
          .notifier
          .notify(Notification::error(self.error_title.as_str(), &e.to_string()));
      }
    }

    if let Err(e) = self.settlement.reconcile(self.client).await {
      warn!(lists = %self.lists, error = %e, "settlement failed");
    }
    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::{EntityKeys, Filters};
  use crate::cache::storage::{CacheEntry, CacheStorage, MemoryStorage};
  use crate::notify::{NotificationLevel, RecordingNotifier, GENERIC_ERROR};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;

  /// Memory storage whose writes or invalidations can be switched off.
  #[derive(Default)]
  struct FlakyStorage {
    inner: MemoryStorage,
    fail_puts: AtomicBool,
    fail_invalidation: AtomicBool,
  }

  impl CacheStorage for FlakyStorage {
    fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
      self.inner.get(key)
    }

    fn put(&self, key: &QueryKey, entry: &CacheEntry) -> Result<()> {
      if self.fail_puts.load(Ordering::SeqCst) {
        return Err(eyre!("disk I/O error"));
      }
      self.inner.put(key, entry)
    }

    fn entries_with_prefix(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>> {
      self.inner.entries_with_prefix(prefix)
    }

    fn mark_invalid(&self, prefix: &QueryKey) -> Result<usize> {
      if self.fail_invalidation.load(Ordering::SeqCst) {
        return Err(eyre!("database is locked"));
      }
      self.inner.mark_invalid(prefix)
    }

    fn clear(&self) -> Result<()> {
      self.inner.clear()
    }
  }

  fn flaky_setup() -> (QueryClient, Arc<FlakyStorage>, RecordingNotifier) {
    let storage = Arc::new(FlakyStorage::default());
    let client = QueryClient::new(storage.clone());
    client
      .set_query_data(&DEPARTMENTS.list(&Filters::new()), &vec!["a", "b"])
      .unwrap();
    (client, storage, RecordingNotifier::default())
  }

  const DEPARTMENTS: EntityKeys = EntityKeys::new("departments");

  fn setup() -> (QueryClient, RecordingNotifier) {
    let client = QueryClient::new(Arc::new(MemoryStorage::new()));
    let mut active = Filters::new();
    active.insert("active".to_string(), "true".to_string());
    client
      .set_query_data(&DEPARTMENTS.list(&Filters::new()), &vec!["a", "b"])
      .unwrap();
    client
      .set_query_data(&DEPARTMENTS.list(&active), &vec!["a"])
      .unwrap();
    (client, RecordingNotifier::default())
  }

  #[tokio::test]
  async fn test_splice_applies_to_every_cached_list() {
    let (client, notifier) = setup();
    let lists_seen_during_request = {
      let reader = client.clone();
      async move {
        let all: Vec<String> = reader
          .get_query_data(&DEPARTMENTS.list(&Filters::new()))?
          .unwrap_or_default();
        Ok::<_, color_eyre::Report>(all)
      }
    };

    let during: Vec<String> = Mutation::new(
      &client,
      &notifier,
      DEPARTMENTS.lists(),
      InvalidationPolicy::Awaited,
    )
    .execute(
      |mut list: Vec<String>| {
        list.push("c".to_string());
        list
      },
      lists_seen_during_request,
    )
    .await
    .unwrap();

    assert_eq!(during, vec!["a", "b", "c"]);
    let mut active = Filters::new();
    active.insert("active".to_string(), "true".to_string());
    assert_eq!(
      client
        .get_query_data::<Vec<String>>(&DEPARTMENTS.list(&active))
        .unwrap(),
      Some(vec!["a".to_string(), "c".to_string()])
    );
    assert!(client.is_invalidated(&DEPARTMENTS.list(&active)).unwrap());

    let notes = notifier.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotificationLevel::Success);
  }

  #[tokio::test]
  async fn test_failure_restores_exact_snapshot() {
    let (client, notifier) = setup();
    let before = client.snapshot(&DEPARTMENTS.lists()).unwrap();

    let result: Result<()> = Mutation::new(
      &client,
      &notifier,
      DEPARTMENTS.lists(),
      InvalidationPolicy::Awaited,
    )
    .on_error("Failed to delete department")
    .execute(
      |list: Vec<String>| list.into_iter().filter(|d| d != "a").collect(),
      async { Err(eyre!("department still has employees")) },
    )
    .await;

    assert!(result.is_err());
    let after: Vec<_> = client
      .snapshot(&DEPARTMENTS.lists())
      .unwrap()
      .into_iter()
      .map(|(key, mut entry)| {
        // settlement marks the restored entries invalid
        entry.invalidated = false;
        (key, entry)
      })
      .collect();
    let mut before_sorted = before;
    let mut after_sorted = after;
    before_sorted.sort_by_key(|(k, _)| k.to_string());
    after_sorted.sort_by_key(|(k, _)| k.to_string());
    assert_eq!(before_sorted, after_sorted);

    let notes = notifier.notifications();
    assert_eq!(notes[0].level, NotificationLevel::Error);
    assert_eq!(notes[0].title, "Failed to delete department");
    assert_eq!(notes[0].message, "department still has employees");
  }

  #[tokio::test]
  async fn test_empty_error_message_uses_fallback() {
    let (client, notifier) = setup();
    let _ = Mutation::new(
      &client,
      &notifier,
      DEPARTMENTS.lists(),
      InvalidationPolicy::FireAndForget,
    )
    .execute(|list: Vec<String>| list, async { Err::<(), _>(eyre!("")) })
    .await;
    client.drain().await.unwrap();

    assert_eq!(notifier.notifications()[0].message, GENERIC_ERROR);
  }

  #[tokio::test]
  async fn test_server_success_survives_settlement_failure() {
    let (client, storage, notifier) = flaky_setup();
    storage.fail_invalidation.store(true, Ordering::SeqCst);

    let created: u32 = Mutation::new(
      &client,
      &notifier,
      DEPARTMENTS.lists(),
      InvalidationPolicy::Awaited,
    )
    .execute(
      |mut list: Vec<String>| {
        list.push("c".to_string());
        list
      },
      async { Ok(42) },
    )
    .await
    .unwrap();

    assert_eq!(created, 42);
    assert_eq!(
      client
        .get_query_data::<Vec<String>>(&DEPARTMENTS.list(&Filters::new()))
        .unwrap(),
      Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
    assert_eq!(notifier.notifications()[0].level, NotificationLevel::Success);
  }

  #[tokio::test]
  async fn test_failed_rollback_still_settles_and_reports_server_error() {
    let (client, storage, notifier) = flaky_setup();
    let request = {
      let storage = storage.clone();
      async move {
        storage.fail_puts.store(true, Ordering::SeqCst);
        Err::<(), _>(eyre!("name already taken"))
      }
    };

    let err = Mutation::new(
      &client,
      &notifier,
      DEPARTMENTS.lists(),
      InvalidationPolicy::Awaited,
    )
    .execute(|list: Vec<String>| list, request)
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "name already taken");
    // The rollback could not be written, so settlement must still mark the list
    assert!(client.is_invalidated(&DEPARTMENTS.list(&Filters::new())).unwrap());
    assert_eq!(notifier.notifications()[0].message, "name already taken");
  }
}
