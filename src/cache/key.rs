//! Hierarchical query keys.
//!
//! A key is an ordered list of segments, e.g. `["invoices", "list", {status: "paid"}]`.
//! Two keys are equal when their segments are deeply equal, and a key "belongs"
//! to another when the other is a prefix of it. Invalidation, cancellation and
//! snapshots all operate on prefixes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Filter signature of a list query. Ordered so that equal filters always
/// produce equal keys regardless of insertion order.
pub type Filters = BTreeMap<String, String>;

/// One segment of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySegment {
  Name(String),
  Id(i64),
  Filters(Filters),
}

/// Structured identifier of a cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  /// Create a key with a single root segment (usually the entity type).
  pub fn root(name: &str) -> Self {
    Self(vec![KeySegment::Name(name.to_string())])
  }

  /// Extend the key with a named segment.
  pub fn name(mut self, name: &str) -> Self {
    self.0.push(KeySegment::Name(name.to_string()));
    self
  }

  /// Extend the key with an identifier segment.
  pub fn id(mut self, id: i64) -> Self {
    self.0.push(KeySegment::Id(id));
    self
  }

  /// Extend the key with a filter signature.
  pub fn filters(mut self, filters: &Filters) -> Self {
    self.0.push(KeySegment::Filters(filters.clone()));
    self
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  /// True if `prefix` is a (non-strict) prefix of this key.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// The root segment, used by storage backends to narrow prefix scans.
  pub fn entity_type(&self) -> Option<&str> {
    match self.0.first() {
      Some(KeySegment::Name(name)) => Some(name),
      _ => None,
    }
  }

  /// Stable, fixed-length hash for use as a storage row id.
  pub fn cache_hash(&self) -> String {
    // Serializing a Vec of enums with BTreeMaps is deterministic
    let input = serde_json::to_vec(&self.0).unwrap_or_else(|_| self.to_string().into_bytes());

    let mut hasher = Sha256::new();
    hasher.update(&input);
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str("/")?;
      }
      match segment {
        KeySegment::Name(name) => f.write_str(name)?,
        KeySegment::Id(id) => write!(f, "{}", id)?,
        KeySegment::Filters(filters) => {
          let pairs: Vec<String> = filters.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
          write!(f, "{{{}}}", pairs.join(","))?;
        }
      }
    }
    Ok(())
  }
}

/// Key builder for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityKeys {
  entity: &'static str,
}

impl EntityKeys {
  pub const fn new(entity: &'static str) -> Self {
    Self { entity }
  }

  pub fn entity(&self) -> &'static str {
    self.entity
  }

  /// Every query of this entity type.
  pub fn all(&self) -> QueryKey {
    QueryKey::root(self.entity)
  }

  /// Prefix shared by every list query of this entity type.
  pub fn lists(&self) -> QueryKey {
    self.all().name("list")
  }

  /// A list query with the given filter signature.
  pub fn list(&self, filters: &Filters) -> QueryKey {
    self.lists().filters(filters)
  }

  /// Prefix shared by every detail query of this entity type.
  pub fn details(&self) -> QueryKey {
    self.all().name("detail")
  }

  pub fn detail(&self, id: i64) -> QueryKey {
    self.details().id(id)
  }

  /// Aggregate statistics for this entity type.
  pub fn stats(&self) -> QueryKey {
    self.all().name("stats")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EMPLOYEES: EntityKeys = EntityKeys::new("employees");

  fn filters(pairs: &[(&str, &str)]) -> Filters {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_key_derivation_is_idempotent() {
    let f = filters(&[("status", "active"), ("department_id", "3")]);
    assert_eq!(EMPLOYEES.list(&f), EMPLOYEES.list(&f));
    assert_eq!(EMPLOYEES.detail(7), EMPLOYEES.detail(7));
    assert_eq!(EMPLOYEES.list(&f).cache_hash(), EMPLOYEES.list(&f).cache_hash());
  }

  #[test]
  fn test_filter_order_does_not_matter() {
    let a = filters(&[("status", "active"), ("department_id", "3")]);
    let b = filters(&[("department_id", "3"), ("status", "active")]);
    assert_eq!(EMPLOYEES.list(&a), EMPLOYEES.list(&b));
  }

  #[test]
  fn test_hierarchy() {
    let list = EMPLOYEES.list(&filters(&[("status", "active")]));
    assert!(list.starts_with(&EMPLOYEES.lists()));
    assert!(list.starts_with(&EMPLOYEES.all()));

    let detail = EMPLOYEES.detail(42);
    assert!(detail.starts_with(&EMPLOYEES.details()));
    assert!(!detail.starts_with(&EMPLOYEES.lists()));
    assert_ne!(EMPLOYEES.detail(1), EMPLOYEES.detail(2));

    assert!(!EntityKeys::new("invoices").lists().starts_with(&EMPLOYEES.all()));
  }

  #[test]
  fn test_display_and_entity_type() {
    let key = EMPLOYEES.list(&filters(&[("status", "active")]));
    assert_eq!(key.to_string(), "employees/list/{status=active}");
    assert_eq!(key.entity_type(), Some("employees"));
    assert_eq!(EMPLOYEES.detail(5).to_string(), "employees/detail/5");
  }

  #[test]
  fn test_distinct_keys_hash_differently() {
    assert_ne!(EMPLOYEES.lists().cache_hash(), EMPLOYEES.stats().cache_hash());
    assert_eq!(EMPLOYEES.stats().cache_hash().len(), 64);
  }
}
