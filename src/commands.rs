//! Entity names accepted on the command line, and filter parsing.

use color_eyre::{eyre::eyre, Result};

use crate::cache::Filters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
  Employees,
  Projects,
  Invoices,
  Departments,
  ContractTypes,
  Users,
}

#[derive(Debug, Clone)]
pub struct EntityName {
  pub kind: EntityKind,
  pub name: &'static str,
  pub aliases: &'static [&'static str],
}

/// All entity types the client manages
pub const ENTITIES: &[EntityName] = &[
  EntityName {
    kind: EntityKind::Employees,
    name: "employees",
    aliases: &["e", "employee", "emp"],
  },
  EntityName {
    kind: EntityKind::Projects,
    name: "projects",
    aliases: &["p", "project"],
  },
  EntityName {
    kind: EntityKind::Invoices,
    name: "invoices",
    aliases: &["i", "invoice", "inv"],
  },
  EntityName {
    kind: EntityKind::Departments,
    name: "departments",
    aliases: &["d", "department", "dept"],
  },
  EntityName {
    kind: EntityKind::ContractTypes,
    name: "contract-types",
    aliases: &["c", "contract-type", "contract_types", "contracts"],
  },
  EntityName {
    kind: EntityKind::Users,
    name: "users",
    aliases: &["u", "user"],
  },
];

/// Resolve an entity name, alias, or unambiguous prefix.
pub fn resolve_entity(input: &str) -> Result<EntityKind> {
  let input = input.trim().to_lowercase();

  if let Some(entity) = ENTITIES
    .iter()
    .find(|e| e.name == input || e.aliases.contains(&input.as_str()))
  {
    return Ok(entity.kind);
  }

  let prefixed: Vec<&EntityName> = ENTITIES
    .iter()
    .filter(|e| !input.is_empty() && e.name.starts_with(&input))
    .collect();

  match prefixed.as_slice() {
    [entity] => Ok(entity.kind),
    [] => Err(eyre!(
      "Unknown entity '{}'. Expected one of: {}",
      input,
      entity_names().join(", ")
    )),
    many => Err(eyre!(
      "Ambiguous entity '{}': {}",
      input,
      many.iter().map(|e| e.name).collect::<Vec<_>>().join(", ")
    )),
  }
}

pub fn entity_names() -> Vec<&'static str> {
  ENTITIES.iter().map(|e| e.name).collect()
}

/// Parse `key=value` filter arguments.
pub fn parse_filters(args: &[String]) -> Result<Filters> {
  let mut filters = Filters::new();
  for arg in args {
    let (key, value) = arg
      .split_once('=')
      .ok_or_else(|| eyre!("Invalid filter '{}', expected key=value", arg))?;
    let key = key.trim();
    if key.is_empty() {
      return Err(eyre!("Invalid filter '{}', empty key", arg));
    }
    filters.insert(key.to_string(), value.trim().to_string());
  }
  Ok(filters)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_exact_match() {
    assert_eq!(resolve_entity("invoices").unwrap(), EntityKind::Invoices);
    assert_eq!(resolve_entity("Contract-Types").unwrap(), EntityKind::ContractTypes);
  }

  #[test]
  fn test_alias_match() {
    assert_eq!(resolve_entity("emp").unwrap(), EntityKind::Employees);
    assert_eq!(resolve_entity("contract_types").unwrap(), EntityKind::ContractTypes);
  }

  #[test]
  fn test_prefix_match() {
    assert_eq!(resolve_entity("proj").unwrap(), EntityKind::Projects);
    assert_eq!(resolve_entity("dep").unwrap(), EntityKind::Departments);
  }

  #[test]
  fn test_unknown_entity() {
    let err = resolve_entity("budgets").unwrap_err();
    assert!(err.to_string().contains("Unknown entity 'budgets'"));
    assert!(resolve_entity("").is_err());
  }

  #[test]
  fn test_parse_filters() {
    let filters = parse_filters(&[
      "status=active".to_string(),
      "department_id = 3".to_string(),
    ])
    .unwrap();
    assert_eq!(filters.get("status").map(String::as_str), Some("active"));
    assert_eq!(filters.get("department_id").map(String::as_str), Some("3"));

    assert!(parse_filters(&["status".to_string()]).is_err());
    assert!(parse_filters(&["=x".to_string()]).is_err());
  }
}
