//! Cached, optimistic access to one entity type.
//!
//! `ResourceHandle` is what a screen (here: a CLI command) talks to. Reads go
//! through the query cache with the entity's staleness window; writes go
//! through the optimistic mutation protocol and settle by invalidating the
//! entity's lists, detail and statistics.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::cache::{
  Cacheable, EntityKeys, Filters, InvalidationPolicy, Mutation, QueryClient, QueryResult,
};
use crate::config::PolicyOverride;
use crate::notify::Notifier;
use crate::query::Query;

use super::types::Id;

/// An entity type the client can list, read and mutate.
pub trait Resource: Cacheable + PartialEq + Debug {
  type Create: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
  type Update: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
  type Stats: Serialize + DeserializeOwned + Clone + Default + Debug + Send + Sync + 'static;

  /// Singular human name, e.g. "contract type"
  fn label() -> &'static str;

  /// REST collection path, e.g. "contract-types"
  fn collection() -> &'static str;

  /// Record shown in lists before the server confirms a create. Server-only
  /// fields are left empty or zero.
  fn provisional(input: &Self::Create, temp_id: Id, now: DateTime<Utc>) -> Self;

  /// Merge the fields present in `patch`.
  fn apply_patch(&mut self, patch: &Self::Update, now: DateTime<Utc>);

  /// One-line summary for list output.
  fn display_name(&self) -> String;

  fn default_policy() -> ResourcePolicy;

  fn keys() -> EntityKeys {
    EntityKeys::new(Self::entity_type())
  }
}

/// REST operations of one entity type.
pub trait EntityApi<R: Resource>: Send + Sync + 'static {
  fn get_all(&self, filters: &Filters) -> impl Future<Output = Result<Vec<R>>> + Send;
  fn get_by_id(&self, id: Id) -> impl Future<Output = Result<R>> + Send;
  fn create(&self, input: &R::Create) -> impl Future<Output = Result<R>> + Send;
  fn update(&self, id: Id, patch: &R::Update) -> impl Future<Output = Result<R>> + Send;
  fn delete(&self, id: Id) -> impl Future<Output = Result<()>> + Send;
  fn stats(&self) -> impl Future<Output = Result<R::Stats>> + Send;
}

/// Cache behavior of one entity type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourcePolicy {
  /// How long fetched data counts as fresh
  pub stale_time: Duration,
  /// Whether mutations wait for the post-settlement refetch
  pub invalidation: InvalidationPolicy,
  /// Keep showing the previous list while a list with new filters loads
  pub keep_previous_data: bool,
}

impl ResourcePolicy {
  pub fn new(stale_time: Duration, invalidation: InvalidationPolicy) -> Self {
    Self {
      stale_time,
      invalidation,
      keep_previous_data: false,
    }
  }

  pub fn keep_previous_data(mut self) -> Self {
    self.keep_previous_data = true;
    self
  }

  /// Apply the configured overrides on top of this policy.
  pub fn with_override(mut self, overrides: Option<&PolicyOverride>) -> Self {
    if let Some(o) = overrides {
      if let Some(secs) = o.stale_time_secs {
        self.stale_time = Duration::seconds(secs);
      }
      if let Some(invalidation) = o.invalidation {
        self.invalidation = invalidation;
      }
      if let Some(keep) = o.keep_previous_data {
        self.keep_previous_data = keep;
      }
    }
    self
  }
}

/// State of the last mutation issued through a handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MutationStatus {
  #[default]
  Idle,
  Pending,
  Success,
  Error(String),
}

impl MutationStatus {
  pub fn is_pending(&self) -> bool {
    matches!(self, MutationStatus::Pending)
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      MutationStatus::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Read and mutation hooks for entity type `R`, backed by API `A`.
pub struct ResourceHandle<R: Resource, A: EntityApi<R>> {
  client: QueryClient,
  api: Arc<A>,
  notifier: Arc<dyn Notifier>,
  policy: ResourcePolicy,
  status: Arc<Mutex<MutationStatus>>,
  _marker: PhantomData<fn() -> R>,
}

impl<R: Resource, A: EntityApi<R>> Clone for ResourceHandle<R, A> {
  fn clone(&self) -> Self {
    Self {
      client: self.client.clone(),
      api: Arc::clone(&self.api),
      notifier: Arc::clone(&self.notifier),
      policy: self.policy,
      status: Arc::clone(&self.status),
      _marker: PhantomData,
    }
  }
}

impl<R: Resource, A: EntityApi<R>> ResourceHandle<R, A> {
  pub fn new(
    client: QueryClient,
    api: Arc<A>,
    notifier: Arc<dyn Notifier>,
    policy: ResourcePolicy,
  ) -> Self {
    Self {
      client,
      api,
      notifier,
      policy,
      status: Arc::new(Mutex::new(MutationStatus::Idle)),
      _marker: PhantomData,
    }
  }

  pub fn policy(&self) -> ResourcePolicy {
    self.policy
  }

  pub fn keys(&self) -> EntityKeys {
    R::keys()
  }

  /// List records matching `filters`.
  pub async fn list(&self, filters: &Filters) -> Result<QueryResult<Vec<R>>> {
    let api = Arc::clone(&self.api);
    let owned = filters.clone();
    self
      .client
      .fetch_query(&R::keys().list(filters), self.policy.stale_time, move || {
        let api = Arc::clone(&api);
        let filters = owned.clone();
        async move { api.get_all(&filters).await }
      })
      .await
  }

  /// Get a single record.
  pub async fn get(&self, id: Id) -> Result<QueryResult<R>> {
    let api = Arc::clone(&self.api);
    self
      .client
      .fetch_query(&R::keys().detail(id), self.policy.stale_time, move || {
        let api = Arc::clone(&api);
        async move { api.get_by_id(id).await }
      })
      .await
  }

  /// Aggregate statistics for the entity type.
  pub async fn stats(&self) -> Result<QueryResult<R::Stats>> {
    let api = Arc::clone(&self.api);
    self
      .client
      .fetch_query(&R::keys().stats(), self.policy.stale_time, move || {
        let api = Arc::clone(&api);
        async move { api.stats().await }
      })
      .await
  }

  /// Observer over a list query, for views that poll.
  pub fn list_query(&self, filters: &Filters) -> Query<Vec<R>> {
    let api = Arc::clone(&self.api);
    let owned = filters.clone();
    Query::new(self.client.clone(), R::keys().list(filters), move || {
      let api = Arc::clone(&api);
      let filters = owned.clone();
      async move { api.get_all(&filters).await }
    })
    .with_stale_time(self.policy.stale_time)
    .keep_previous_data(self.policy.keep_previous_data)
  }

  pub fn mutation_status(&self) -> MutationStatus {
    self
      .status
      .lock()
      .map(|s| s.clone())
      .unwrap_or_default()
  }

  /// Create a record; a provisional copy is appended to cached lists first.
  pub async fn create(&self, input: R::Create) -> Result<R> {
    let now = self.client.now();
    let provisional = R::provisional(&input, temp_id(now), now);
    let api = Arc::clone(&self.api);
    info!(entity = R::entity_type(), "creating");

    let mutation = self
      .mutation(
        format!("{} created", capitalize(R::label())),
        format!("The {} was created successfully.", R::label()),
      )
      .on_error(format!("Failed to create {}", R::label()));

    self
      .track(mutation.execute(
        move |mut list: Vec<R>| {
          list.push(provisional.clone());
          list
        },
        async move { api.create(&input).await },
      ))
      .await
  }

  /// Update a record; the patch is merged into cached lists first.
  pub async fn update(&self, id: Id, patch: R::Update) -> Result<R> {
    let now = self.client.now();
    let splice_patch = patch.clone();
    let api = Arc::clone(&self.api);
    info!(entity = R::entity_type(), id, "updating");

    let mutation = self
      .mutation(
        format!("{} updated", capitalize(R::label())),
        format!("The {} was updated successfully.", R::label()),
      )
      .on_error(format!("Failed to update {}", R::label()))
      .invalidate(R::keys().detail(id));

    self
      .track(mutation.execute(
        move |list: Vec<R>| {
          list
            .into_iter()
            .map(|mut record| {
              if record.id() == id {
                record.apply_patch(&splice_patch, now);
              }
              record
            })
            .collect()
        },
        async move { api.update(id, &patch).await },
      ))
      .await
  }

  /// Delete a record; it is removed from cached lists first.
  pub async fn delete(&self, id: Id) -> Result<()> {
    let api = Arc::clone(&self.api);
    info!(entity = R::entity_type(), id, "deleting");

    let mutation = self
      .mutation(
        format!("{} deleted", capitalize(R::label())),
        format!("The {} was deleted successfully.", R::label()),
      )
      .on_error(format!("Failed to delete {}", R::label()))
      .invalidate(R::keys().detail(id));

    self
      .track(mutation.execute(
        move |list: Vec<R>| list.into_iter().filter(|record| record.id() != id).collect(),
        async move { api.delete(id).await },
      ))
      .await
  }

  fn mutation(&self, title: String, message: String) -> Mutation<'_> {
    Mutation::new(
      &self.client,
      self.notifier.as_ref(),
      R::keys().lists(),
      self.policy.invalidation,
    )
    .invalidate(R::keys().stats())
    .on_success(title, message)
  }

  async fn track<T>(&self, mutation: impl Future<Output = Result<T>>) -> Result<T> {
    self.set_status(MutationStatus::Pending);
    let result = mutation.await;
    self.set_status(match &result {
      Ok(_) => MutationStatus::Success,
      Err(e) => MutationStatus::Error(e.to_string()),
    });
    result
  }

  fn set_status(&self, status: MutationStatus) {
    if let Ok(mut current) = self.status.lock() {
      *current = status;
    }
  }
}

/// Last temporary id handed out in this process.
static LAST_TEMP_ID: AtomicI64 = AtomicI64::new(0);

/// Id for a provisional record: the negated millisecond timestamp, moved
/// below any temporary id already handed out so two creates never share one.
fn temp_id(now: DateTime<Utc>) -> Id {
  let candidate = -now.timestamp_millis().max(1);
  let previous = LAST_TEMP_ID
    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
      Some(candidate.min(last - 1))
    })
    .unwrap_or_else(|last| last);
  candidate.min(previous - 1)
}

fn capitalize(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::mock::MockApi;
  use crate::api::types::{Employee, EmployeePatch, Invoice, NewEmployee, NewInvoice};
  use crate::cache::clock::ManualClock;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::notify::{NotificationLevel, RecordingNotifier};
  use chrono::NaiveDate;

  fn new_employee(first: &str, last: &str, email: &str) -> NewEmployee {
    NewEmployee {
      first_name: first.to_string(),
      last_name: last.to_string(),
      email: email.to_string(),
      phone: None,
      position: Some("Editor".to_string()),
      department_id: Some(1),
      contract_type_id: None,
      hourly_rate: None,
      hire_date: None,
      status: None,
    }
  }

  fn new_invoice(number: &str) -> NewInvoice {
    NewInvoice {
      invoice_number: number.to_string(),
      client_name: "Northwind".to_string(),
      amount: 1000.0,
      issue_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
      project_id: None,
      tax_amount: Some(210.0),
      status: None,
      due_date: None,
      allocations: Vec::new(),
    }
  }

  struct Fixture<R: Resource> {
    client: QueryClient,
    clock: Arc<ManualClock>,
    api: Arc<MockApi<R>>,
    notifier: Arc<RecordingNotifier>,
    handle: ResourceHandle<R, MockApi<R>>,
  }

  fn fixture<R: Resource>(api: MockApi<R>) -> Fixture<R> {
    let clock = Arc::new(ManualClock::new());
    let client = QueryClient::builder(Arc::new(MemoryStorage::new()))
      .clock(clock.clone())
      .build();
    let api = Arc::new(api);
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = ResourceHandle::new(
      client.clone(),
      Arc::clone(&api),
      notifier.clone(),
      R::default_policy(),
    );
    Fixture {
      client,
      clock,
      api,
      notifier,
      handle,
    }
  }

  fn seeded_employees() -> MockApi<Employee> {
    let api = MockApi::new();
    for (first, last) in [("Marta", "Diaz"), ("Jon", "Berg"), ("Ines", "Sousa")] {
      api.seed(&new_employee(first, last, &format!("{}@studio.test", first)));
    }
    api
  }

  #[tokio::test]
  async fn test_optimistic_create_then_server_canonical_list() {
    let f = fixture(seeded_employees().gated());
    let filters = Filters::new();
    let key = f.handle.keys().list(&filters);

    let initial = f.handle.list(&filters).await.unwrap();
    assert_eq!(initial.data.as_ref().map(Vec::len), Some(3));

    let handle = f.handle.clone();
    let task = tokio::spawn(async move {
      handle
        .create(new_employee("Ana", "Lopez", "ana@studio.test"))
        .await
    });

    // Request is in flight: provisional record visible
    f.api.wait_for_request().await;
    let during: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(during.len(), 4);
    let last = during.last().unwrap();
    assert_eq!(last.full_name(), "Ana Lopez");
    assert!(last.id < 0);
    assert_eq!(last.project_count, 0);
    assert!(f.handle.mutation_status().is_pending());

    f.api.release_request();
    let created = task.await.unwrap().unwrap();
    assert_eq!(created.id, 4);

    // Employees settle with an awaited refetch
    let after: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(after.len(), 4);
    assert!(after.iter().all(|e| e.id > 0));
    assert_eq!(after.last().unwrap().full_name(), "Ana Lopez");
    assert_eq!(f.api.list_calls(), 2);

    let read = f.handle.list(&filters).await.unwrap();
    assert_eq!(read.source, CacheSource::CacheFresh);
    assert_eq!(read.data, Some(after));
    assert_eq!(f.handle.mutation_status(), MutationStatus::Success);

    let notes = f.notifier.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotificationLevel::Success);
    assert_eq!(notes[0].title, "Employee created");
  }

  #[test]
  fn test_temp_ids_are_unique_within_a_millisecond() {
    let now = Utc::now();
    let first = temp_id(now);
    let second = temp_id(now);
    assert!(first < 0);
    assert!(second < first);
  }

  #[tokio::test]
  async fn test_concurrent_creates_get_distinct_provisional_ids() {
    let f = fixture(seeded_employees().gated());
    let filters = Filters::new();
    let key = f.handle.keys().list(&filters);
    f.handle.list(&filters).await.unwrap();

    // The clock does not move between the two creates
    let mut tasks = Vec::new();
    for (first, email) in [("Ana", "ana@studio.test"), ("Luis", "luis@studio.test")] {
      let handle = f.handle.clone();
      tasks.push(tokio::spawn(async move {
        handle.create(new_employee(first, "Lopez", email)).await
      }));
      f.api.wait_for_request().await;
    }

    let during: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(during.len(), 5);
    let provisional: Vec<Id> = during.iter().map(|e| e.id).filter(|id| *id < 0).collect();
    assert_eq!(provisional.len(), 2);
    assert_ne!(provisional[0], provisional[1]);

    f.api.release_request();
    f.api.release_request();
    for task in tasks {
      task.await.unwrap().unwrap();
    }

    let after: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(after.len(), 5);
    assert!(after.iter().all(|e| e.id > 0));
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_background_refetch_cannot_overwrite_create() {
    let f = fixture(seeded_employees().gated());
    let filters = Filters::new();
    let key = f.handle.keys().list(&filters);
    f.handle.list(&filters).await.unwrap();

    // A stale read starts a slow refetch of the list as it was before the create
    f.api.delay_lists(std::time::Duration::from_secs(10));
    f.clock.advance(Duration::minutes(6));
    let stale = f.handle.list(&filters).await.unwrap();
    assert_eq!(stale.source, CacheSource::CacheStale);
    tokio::task::yield_now().await;

    let handle = f.handle.clone();
    let task = tokio::spawn(async move {
      handle
        .create(new_employee("Ana", "Lopez", "ana@studio.test"))
        .await
    });
    f.api.wait_for_request().await;

    // Well past the refetch delay; the provisional record must still be there
    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    let during: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(during.len(), 4);
    assert!(during.last().unwrap().id < 0);

    f.api.release_request();
    task.await.unwrap().unwrap();

    let after: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(after.len(), 4);
    assert!(after.iter().all(|e| e.id > 0));
    assert_eq!(after.last().unwrap().full_name(), "Ana Lopez");
  }

  #[tokio::test]
  async fn test_failed_create_rolls_back_and_notifies() {
    let f = fixture(seeded_employees());
    let filters = Filters::new();
    let key = f.handle.keys().list(&filters);

    f.handle.list(&filters).await.unwrap();
    let before: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();

    f.api.fail_next("email already exists");
    let result = f
      .handle
      .create(new_employee("Ana", "Lopez", "marta@studio.test"))
      .await;

    assert_eq!(result.unwrap_err().to_string(), "email already exists");
    let after: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(after.len(), 3);

    let notes = f.notifier.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, NotificationLevel::Error);
    assert_eq!(notes[0].title, "Failed to create employee");
    assert_eq!(notes[0].message, "email already exists");
    assert_eq!(
      f.handle.mutation_status().error(),
      Some("email already exists")
    );
  }

  #[tokio::test]
  async fn test_update_merges_patch_and_invalidates_detail() {
    let f = fixture(seeded_employees().gated());
    let filters = Filters::new();
    let key = f.handle.keys().list(&filters);
    f.handle.list(&filters).await.unwrap();
    f.handle.get(2).await.unwrap();

    let handle = f.handle.clone();
    let task = tokio::spawn(async move {
      handle
        .update(
          2,
          EmployeePatch {
            position: Some("Colorist".to_string()),
            ..Default::default()
          },
        )
        .await
    });

    f.api.wait_for_request().await;
    let during: Vec<Employee> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(during[1].position.as_deref(), Some("Colorist"));
    assert_eq!(during[0].position.as_deref(), Some("Editor"));

    f.api.release_request();
    task.await.unwrap().unwrap();

    let detail = f.handle.get(2).await.unwrap();
    assert_eq!(detail.source, CacheSource::CacheFresh);
    assert_eq!(
      detail.data.unwrap().position.as_deref(),
      Some("Colorist")
    );
  }

  #[tokio::test]
  async fn test_delete_filters_out_record() {
    let f = fixture(seeded_employees());
    let filters = Filters::new();
    f.handle.list(&filters).await.unwrap();

    f.handle.delete(1).await.unwrap();

    let list = f.handle.list(&filters).await.unwrap().data.unwrap();
    assert_eq!(list.len(), 2);
    assert!(list.iter().all(|e| e.id != 1));
    assert_eq!(f.notifier.notifications()[0].title, "Employee deleted");
  }

  #[tokio::test]
  async fn test_invoice_settlement_does_not_wait_for_refetch() {
    let f = fixture(MockApi::<Invoice>::new());
    f.api.seed(&new_invoice("INV-1"));
    let filters = Filters::new();
    let key = f.handle.keys().list(&filters);
    f.handle.list(&filters).await.unwrap();
    f.handle.stats().await.unwrap();

    f.handle.create(new_invoice("INV-2")).await.unwrap();

    // Fire-and-forget: lists and stats are invalid, refetch not done yet
    assert!(f.client.is_invalidated(&key).unwrap());
    assert!(f.client.is_invalidated(&f.handle.keys().stats()).unwrap());
    assert_eq!(f.api.list_calls(), 1);

    f.client.drain().await.unwrap();
    assert_eq!(f.api.list_calls(), 2);
    let list: Vec<Invoice> = f.client.get_query_data(&key).unwrap().unwrap();
    assert_eq!(list.len(), 2);
    assert!(!f.client.is_invalidated(&key).unwrap());
  }

  #[tokio::test]
  async fn test_invoice_list_staleness_window() {
    let f = fixture(MockApi::<Invoice>::new());
    f.api.seed(&new_invoice("INV-1"));
    let filters = Filters::new();

    f.handle.list(&filters).await.unwrap();
    assert_eq!(f.api.list_calls(), 1);

    f.clock.advance(Duration::seconds(60));
    let cached = f.handle.list(&filters).await.unwrap();
    assert_eq!(cached.source, CacheSource::CacheFresh);
    f.client.drain().await.unwrap();
    assert_eq!(f.api.list_calls(), 1);

    f.clock.advance(Duration::seconds(90));
    let stale = f.handle.list(&filters).await.unwrap();
    assert_eq!(stale.source, CacheSource::CacheStale);
    f.client.drain().await.unwrap();
    assert_eq!(f.api.list_calls(), 2);
  }

  #[test]
  fn test_policy_override() {
    let policy = ResourcePolicy::new(Duration::minutes(2), InvalidationPolicy::FireAndForget)
      .with_override(Some(&PolicyOverride {
        stale_time_secs: Some(30),
        invalidation: Some(InvalidationPolicy::Awaited),
        keep_previous_data: None,
      }));
    assert_eq!(policy.stale_time, Duration::seconds(30));
    assert_eq!(policy.invalidation, InvalidationPolicy::Awaited);
    assert!(!policy.keep_previous_data);
  }

  #[test]
  fn test_capitalize() {
    assert_eq!(capitalize("contract type"), "Contract type");
    assert_eq!(capitalize(""), "");
  }
}
