//! In-process stand-in for the REST API, used by tests.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use super::error::{ApiError, ApiErrorKind};
use super::resources::{EntityApi, Resource};
use super::types::Id;
use crate::cache::Filters;

/// Holds mutating requests until the test releases them.
struct Gate {
  started: Notify,
  release: Notify,
}

pub struct MockApi<R: Resource> {
  records: Mutex<Vec<R>>,
  next_id: AtomicI64,
  list_calls: AtomicUsize,
  fail_next: Mutex<Option<String>>,
  list_delay: Mutex<Option<Duration>>,
  gate: Option<Gate>,
}

impl<R: Resource> MockApi<R> {
  pub fn new() -> Self {
    Self {
      records: Mutex::new(Vec::new()),
      next_id: AtomicI64::new(1),
      list_calls: AtomicUsize::new(0),
      fail_next: Mutex::new(None),
      list_delay: Mutex::new(None),
      gate: None,
    }
  }

  /// Make create/update/delete wait for `release_request`.
  pub fn gated(mut self) -> Self {
    self.gate = Some(Gate {
      started: Notify::new(),
      release: Notify::new(),
    });
    self
  }

  /// Insert a record as the server would.
  pub fn seed(&self, input: &R::Create) -> R {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let record = R::provisional(input, id, Utc::now());
    self.records.lock().unwrap().push(record.clone());
    record
  }

  /// Reject the next mutating request with a validation error.
  pub fn fail_next(&self, message: &str) {
    *self.fail_next.lock().unwrap() = Some(message.to_string());
  }

  /// Answer list requests after `delay`, with the records as they were when
  /// the request arrived.
  pub fn delay_lists(&self, delay: Duration) {
    *self.list_delay.lock().unwrap() = Some(delay);
  }

  pub fn list_calls(&self) -> usize {
    self.list_calls.load(Ordering::SeqCst)
  }

  pub async fn wait_for_request(&self) {
    if let Some(gate) = &self.gate {
      gate.started.notified().await;
    }
  }

  pub fn release_request(&self) {
    if let Some(gate) = &self.gate {
      gate.release.notify_one();
    }
  }

  async fn pass_gate(&self) -> Result<()> {
    if let Some(gate) = &self.gate {
      gate.started.notify_one();
      gate.release.notified().await;
    }
    let failure = self.fail_next.lock().unwrap().take();
    match failure {
      Some(message) => Err(
        ApiError {
          kind: ApiErrorKind::Validation,
          message,
        }
        .into(),
      ),
      None => Ok(()),
    }
  }

  fn not_found(id: Id) -> color_eyre::Report {
    eyre!(ApiError {
      kind: ApiErrorKind::NotFound,
      message: format!("{} {} not found", R::label(), id),
    })
  }
}

impl<R: Resource> EntityApi<R> for MockApi<R> {
  async fn get_all(&self, _filters: &Filters) -> Result<Vec<R>> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    let records = self.records.lock().unwrap().clone();
    let delay = *self.list_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    Ok(records)
  }

  async fn get_by_id(&self, id: Id) -> Result<R> {
    let found = self
      .records
      .lock()
      .unwrap()
      .iter()
      .find(|r| r.id() == id)
      .cloned();
    found.ok_or_else(|| Self::not_found(id))
  }

  async fn create(&self, input: &R::Create) -> Result<R> {
    self.pass_gate().await?;
    Ok(self.seed(input))
  }

  async fn update(&self, id: Id, patch: &R::Update) -> Result<R> {
    self.pass_gate().await?;
    let mut records = self.records.lock().unwrap();
    let record = records
      .iter_mut()
      .find(|r| r.id() == id)
      .ok_or_else(|| Self::not_found(id))?;
    record.apply_patch(patch, Utc::now());
    Ok(record.clone())
  }

  async fn delete(&self, id: Id) -> Result<()> {
    self.pass_gate().await?;
    let mut records = self.records.lock().unwrap();
    let before = records.len();
    records.retain(|r| r.id() != id);
    if records.len() == before {
      return Err(Self::not_found(id));
    }
    Ok(())
  }

  async fn stats(&self) -> Result<R::Stats> {
    Ok(R::Stats::default())
  }
}
