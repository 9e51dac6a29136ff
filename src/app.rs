use crate::api::types::{ContractType, Department, Employee, Id, Invoice, Project, User};
use crate::api::{ApiClient, Resource, ResourceHandle};
use crate::cache::{
  CacheSource, CacheStorage, Filters, MemoryStorage, QueryClient, QueryResult, SqliteStorage,
};
use crate::commands::EntityKind;
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::notify::{ConsoleNotifier, Notifier};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What to do with an entity type
#[derive(Debug, Clone)]
pub enum Action {
  List { filters: Filters, json: bool },
  Get { id: Id, json: bool },
  Stats,
  Create { data: String },
  Update { id: Id, data: String },
  Delete { id: Id },
  Watch { filters: Filters, interval: Duration },
}

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Shared query cache
  client: QueryClient,

  /// Management API client
  api: Arc<ApiClient>,

  notifier: Arc<dyn Notifier>,
}

impl App {
  /// Build the app. `persist` selects the on-disk cache over an in-memory one.
  pub fn new(config: Config, persist: bool) -> Result<Self> {
    let storage: Arc<dyn CacheStorage> = if persist {
      Arc::new(SqliteStorage::open(config.cache.path.as_deref())?)
    } else {
      debug!("using in-memory cache");
      Arc::new(MemoryStorage::new())
    };

    let client = QueryClient::builder(storage)
      .fetch_timeout(Duration::from_secs(config.cache.fetch_timeout_secs))
      .retries(config.cache.retries)
      .build();
    let api = Arc::new(ApiClient::new(&config)?);

    Ok(Self {
      config,
      client,
      api,
      notifier: Arc::new(ConsoleNotifier),
    })
  }

  /// Cached handle for entity type `R`, with the configured policy.
  pub fn resource<R: Resource>(&self) -> ResourceHandle<R, ApiClient> {
    let policy = R::default_policy().with_override(self.config.resources.get(R::entity_type()));
    ResourceHandle::new(
      self.client.clone(),
      Arc::clone(&self.api),
      Arc::clone(&self.notifier),
      policy,
    )
  }

  /// Run an action. Returns `false` if a mutation was rejected; the
  /// notifier has already reported it.
  pub async fn run(&self, entity: EntityKind, action: Action) -> Result<bool> {
    match entity {
      EntityKind::Employees => self.run_for::<Employee>(action).await,
      EntityKind::Projects => self.run_for::<Project>(action).await,
      EntityKind::Invoices => self.run_for::<Invoice>(action).await,
      EntityKind::Departments => self.run_for::<Department>(action).await,
      EntityKind::ContractTypes => self.run_for::<ContractType>(action).await,
      EntityKind::Users => self.run_for::<User>(action).await,
    }
  }

  /// Run an action, then wait for background work whatever its outcome.
  ///
  /// A drain failure only surfaces when the action itself succeeded.
  pub async fn execute(&self, entity: EntityKind, action: Action) -> Result<bool> {
    let outcome = self.run(entity, action).await;
    let drained = self.shutdown().await;
    let succeeded = outcome?;
    drained?;
    Ok(succeeded)
  }

  /// Drop every cached query.
  pub fn logout(&self) -> Result<()> {
    self.client.clear()?;
    info!("cache cleared");
    println!("Cache cleared.");
    Ok(())
  }

  /// Wait for background refetches and settlements before exit.
  pub async fn shutdown(&self) -> Result<()> {
    self.client.drain().await
  }

  async fn run_for<R: Resource>(&self, action: Action) -> Result<bool> {
    let handle = self.resource::<R>();

    match action {
      Action::List { filters, json } => {
        let result = handle.list(&filters).await?;
        report_source(&result);
        let records = into_data(result)?;
        if json {
          print_json(&records)?;
        } else {
          print_rows(&records);
        }
      }
      Action::Get { id, json } => {
        let result = handle.get(id).await?;
        report_source(&result);
        let record = into_data(result)?;
        if json {
          print_json(&record)?;
        } else {
          println!("{:>6}  {}", record.id(), record.display_name());
        }
      }
      Action::Stats => {
        let result = handle.stats().await?;
        report_source(&result);
        print_json(&into_data(result)?)?;
      }
      Action::Create { data } => {
        let input: R::Create = parse_payload(&data)?;
        match handle.create(input).await {
          Ok(record) => println!("{:>6}  {}", record.id(), record.display_name()),
          Err(_) => return Ok(false),
        }
      }
      Action::Update { id, data } => {
        let patch: R::Update = parse_payload(&data)?;
        match handle.update(id, patch).await {
          Ok(record) => println!("{:>6}  {}", record.id(), record.display_name()),
          Err(_) => return Ok(false),
        }
      }
      Action::Delete { id } => {
        if handle.delete(id).await.is_err() {
          return Ok(false);
        }
      }
      Action::Watch { filters, interval } => watch(&handle, &filters, interval).await?,
    }

    Ok(true)
  }
}

/// Poll a list query and reprint it whenever it changes, until Ctrl-C.
async fn watch<R: Resource>(
  handle: &ResourceHandle<R, ApiClient>,
  filters: &Filters,
  interval: Duration,
) -> Result<()> {
  let mut query = handle.list_query(filters);
  let mut events = EventHandler::new(interval);
  let mut shown: Option<Vec<R>> = None;
  info!(key = %query.key(), "watching");

  query.fetch();
  while let Some(event) = events.next().await {
    match event {
      Event::Tick => {
        if query.poll() {
          let result = query.result();
          if let Some(error) = &result.error {
            eprintln!("! {}", error);
          }
          if result.data.is_some() && result.data != shown {
            shown = result.data.clone();
            println!(
              "-- {} ({}) --",
              query.key(),
              chrono::Local::now().format("%H:%M:%S")
            );
            print_rows(shown.as_deref().unwrap_or_default());
          }
        }
        query.fetch();
      }
      Event::Interrupt => break,
    }
  }

  query.cancel();
  Ok(())
}

fn parse_payload<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
  serde_json::from_str(data).map_err(|e| eyre!("Invalid --data payload: {}", e))
}

fn into_data<T>(result: QueryResult<T>) -> Result<T> {
  match (result.data, result.error) {
    (Some(data), _) => Ok(data),
    (None, Some(error)) => Err(eyre!(error)),
    (None, None) => Err(eyre!("No data available")),
  }
}

fn report_source<T>(result: &QueryResult<T>) {
  match result.source {
    CacheSource::CacheStale => eprintln!("(cached, refreshing)"),
    CacheSource::Offline => eprintln!(
      "(offline, last refresh failed: {})",
      result.error.as_deref().unwrap_or("unknown error")
    ),
    _ => {}
  }
}

fn print_rows<R: Resource>(records: &[R]) {
  if records.is_empty() {
    println!("No {} found.", R::collection());
    return;
  }
  for record in records {
    println!("{:>6}  {}", record.id(), record.display_name());
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", out);
  Ok(())
}
