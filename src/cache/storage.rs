//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::QueryKey;

/// A single cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  /// Serialized query data
  pub data: Value,
  /// When the data was stored
  pub fetched_at: DateTime<Utc>,
  /// Marked outdated; the next read refetches
  pub invalidated: bool,
  /// Error of the last failed refetch, cleared on success
  pub error: Option<String>,
}

impl CacheEntry {
  pub fn fresh(data: Value, fetched_at: DateTime<Utc>) -> Self {
    Self {
      data,
      fetched_at,
      invalidated: false,
      error: None,
    }
  }
}

/// Trait for cache storage backends.
///
/// Holds exactly one entry per key.
pub trait CacheStorage: Send + Sync {
  /// Get the entry for a key.
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>>;

  /// Insert or replace the entry for a key.
  fn put(&self, key: &QueryKey, entry: &CacheEntry) -> Result<()>;

  /// All entries whose key starts with `prefix`.
  fn entries_with_prefix(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>>;

  /// Mark every entry under `prefix` invalid. Returns how many were marked.
  fn mark_invalid(&self, prefix: &QueryKey) -> Result<usize>;

  /// Drop everything.
  fn clear(&self) -> Result<()>;
}

/// Process-local storage, lost when the process exits.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<QueryKey, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn put(&self, key: &QueryKey, entry: &CacheEntry) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(key.clone(), entry.clone());
    Ok(())
  }

  fn entries_with_prefix(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      entries
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect(),
    )
  }

  fn mark_invalid(&self, prefix: &QueryKey) -> Result<usize> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut marked = 0;
    for (_, entry) in entries.iter_mut().filter(|(key, _)| key.starts_with(prefix)) {
      entry.invalidated = true;
      marked += 1;
    }
    Ok(marked)
  }

  fn clear(&self) -> Result<()> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .clear();
    Ok(())
  }
}

/// SQLite-based cache storage, so cached queries outlive a single CLI run.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives in memory.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("prodman").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// Load rows that may match `prefix`, narrowed by entity type.
  fn load_rows(conn: &Connection, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>> {
    let mut stmt = conn
      .prepare(
        "SELECT query_key, data, fetched_at, invalidated, error FROM query_cache
         WHERE ?1 IS NULL OR entity_type = ?1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String, bool, Option<String>)> = stmt
      .query_map(params![prefix.entity_type()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query cache: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (key_json, data, fetched_at, invalidated, error) in rows {
      let key: QueryKey = match serde_json::from_str(&key_json) {
        Ok(key) => key,
        // Rows written by an incompatible version are skipped
        Err(_) => continue,
      };
      if !key.starts_with(prefix) {
        continue;
      }
      entries.push((key, decode_entry(&data, &fetched_at, invalidated, error)?));
    }
    Ok(entries)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    entity_type TEXT,
    data TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_query_cache_entity ON query_cache(entity_type);
"#;

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT data, fetched_at, invalidated, error FROM query_cache
         WHERE query_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, String, bool, Option<String>)> = stmt
      .query_row(params![key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((data, fetched_at, invalidated, error)) => Ok(Some(decode_entry(
        &data,
        &fetched_at,
        invalidated,
        error,
      )?)),
      None => Ok(None),
    }
  }

  fn put(&self, key: &QueryKey, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key_json =
      serde_json::to_string(key).map_err(|e| eyre!("Failed to serialize query key: {}", e))?;
    let data = serde_json::to_string(&entry.data)
      .map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_key, entity_type, data, fetched_at, invalidated, error)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          key.cache_hash(),
          key_json,
          key.entity_type(),
          data,
          entry.fetched_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
          entry.invalidated,
          entry.error,
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn entries_with_prefix(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Self::load_rows(&conn, prefix)
  }

  fn mark_invalid(&self, prefix: &QueryKey) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let keys: Vec<QueryKey> = Self::load_rows(&conn, prefix)?
      .into_iter()
      .map(|(key, _)| key)
      .collect();

    for key in &keys {
      conn
        .execute(
          "UPDATE query_cache SET invalidated = 1 WHERE query_hash = ?",
          params![key.cache_hash()],
        )
        .map_err(|e| eyre!("Failed to invalidate {}: {}", key, e))?;
    }

    Ok(keys.len())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

fn decode_entry(
  data: &str,
  fetched_at: &str,
  invalidated: bool,
  error: Option<String>,
) -> Result<CacheEntry> {
  let data: Value =
    serde_json::from_str(data).map_err(|e| eyre!("Failed to deserialize cache entry: {}", e))?;
  Ok(CacheEntry {
    data,
    fetched_at: parse_datetime(fetched_at)?,
    invalidated,
    error,
  })
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
