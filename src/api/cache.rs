//! Caching implementations for the management API types.

use chrono::{DateTime, Duration, Utc};

use crate::cache::{Cacheable, InvalidationPolicy};

use super::resources::{Resource, ResourcePolicy};
use super::types::{
  ContractType, ContractTypePatch, CountStats, Department, DepartmentPatch, Employee,
  EmployeePatch, EmployeeStats, Id, Invoice, InvoicePatch, InvoiceStats, NewContractType,
  NewDepartment, NewEmployee, NewInvoice, NewProject, NewUser, Project, ProjectPatch,
  ProjectStats, User, UserPatch,
};

/// Assign `$patch.$field` to `$record.$field` for every listed field that is present.
macro_rules! merge {
  ($record:expr, $patch:expr, { $($field:ident),* $(,)? }) => {
    $(
      if let Some(value) = &$patch.$field {
        $record.$field = value.clone();
      }
    )*
  };
  ($record:expr, $patch:expr, optional { $($field:ident),* $(,)? }) => {
    $(
      if let Some(value) = &$patch.$field {
        $record.$field = Some(value.clone());
      }
    )*
  };
}

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Employee {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "employees"
  }
}

impl Cacheable for Project {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "projects"
  }
}

impl Cacheable for Invoice {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "invoices"
  }
}

impl Cacheable for Department {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "departments"
  }
}

impl Cacheable for ContractType {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "contract_types"
  }
}

impl Cacheable for User {
  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "users"
  }
}

// ============================================================================
// Resource implementations
// ============================================================================

impl Resource for Employee {
  type Create = NewEmployee;
  type Update = EmployeePatch;
  type Stats = EmployeeStats;

  fn label() -> &'static str {
    "employee"
  }

  fn collection() -> &'static str {
    "employees"
  }

  fn provisional(input: &NewEmployee, temp_id: Id, now: DateTime<Utc>) -> Self {
    Self {
      id: temp_id,
      first_name: input.first_name.clone(),
      last_name: input.last_name.clone(),
      email: input.email.clone(),
      phone: input.phone.clone(),
      position: input.position.clone(),
      department_id: input.department_id,
      contract_type_id: input.contract_type_id,
      hourly_rate: input.hourly_rate,
      hire_date: input.hire_date,
      status: input.status.unwrap_or_default(),
      department_name: None,
      project_count: 0,
      created_at: now,
      updated_at: now,
    }
  }

  fn apply_patch(&mut self, patch: &EmployeePatch, now: DateTime<Utc>) {
    merge!(self, patch, { first_name, last_name, email, status });
    merge!(self, patch, optional {
      phone, position, department_id, contract_type_id, hourly_rate, hire_date,
    });
    if patch.department_id.is_some() {
      // Stale once the department changes; the server fills it back in
      self.department_name = None;
    }
    self.updated_at = now;
  }

  fn display_name(&self) -> String {
    let position = self.position.as_deref().unwrap_or("-");
    format!("{} <{}> {}", self.full_name(), self.email, position)
  }

  fn default_policy() -> ResourcePolicy {
    ResourcePolicy::new(Duration::minutes(5), InvalidationPolicy::Awaited)
  }
}

impl Resource for Project {
  type Create = NewProject;
  type Update = ProjectPatch;
  type Stats = ProjectStats;

  fn label() -> &'static str {
    "project"
  }

  fn collection() -> &'static str {
    "projects"
  }

  fn provisional(input: &NewProject, temp_id: Id, now: DateTime<Utc>) -> Self {
    Self {
      id: temp_id,
      name: input.name.clone(),
      description: input.description.clone(),
      client_name: input.client_name.clone(),
      status: input.status.unwrap_or_default(),
      start_date: input.start_date,
      end_date: input.end_date,
      budget: input.budget,
      assignments: Vec::new(),
      total_invoiced: 0.0,
      created_at: now,
      updated_at: now,
    }
  }

  fn apply_patch(&mut self, patch: &ProjectPatch, now: DateTime<Utc>) {
    merge!(self, patch, { name, status });
    merge!(self, patch, optional {
      description, client_name, start_date, end_date, budget,
    });
    self.updated_at = now;
  }

  fn display_name(&self) -> String {
    match &self.client_name {
      Some(client) => format!("{} ({}) [{:?}]", self.name, client, self.status),
      None => format!("{} [{:?}]", self.name, self.status),
    }
  }

  fn default_policy() -> ResourcePolicy {
    ResourcePolicy::new(Duration::minutes(3), InvalidationPolicy::Awaited).keep_previous_data()
  }
}

impl Resource for Invoice {
  type Create = NewInvoice;
  type Update = InvoicePatch;
  type Stats = InvoiceStats;

  fn label() -> &'static str {
    "invoice"
  }

  fn collection() -> &'static str {
    "invoices"
  }

  fn provisional(input: &NewInvoice, temp_id: Id, now: DateTime<Utc>) -> Self {
    Self {
      id: temp_id,
      invoice_number: input.invoice_number.clone(),
      project_id: input.project_id,
      client_name: input.client_name.clone(),
      amount: input.amount,
      tax_amount: input.tax_amount.unwrap_or(0.0),
      status: input.status.unwrap_or_default(),
      issue_date: input.issue_date,
      due_date: input.due_date,
      allocations: input.allocations.clone(),
      project_name: None,
      total: 0.0,
      created_at: now,
      updated_at: now,
    }
  }

  fn apply_patch(&mut self, patch: &InvoicePatch, now: DateTime<Utc>) {
    merge!(self, patch, {
      invoice_number, client_name, amount, tax_amount, status, issue_date, allocations,
    });
    merge!(self, patch, optional { project_id, due_date });
    if patch.project_id.is_some() {
      self.project_name = None;
    }
    self.updated_at = now;
  }

  fn display_name(&self) -> String {
    format!(
      "{} {} {:.2} [{:?}]",
      self.invoice_number, self.client_name, self.amount, self.status
    )
  }

  fn default_policy() -> ResourcePolicy {
    ResourcePolicy::new(Duration::minutes(2), InvalidationPolicy::FireAndForget)
      .keep_previous_data()
  }
}

impl Resource for Department {
  type Create = NewDepartment;
  type Update = DepartmentPatch;
  type Stats = CountStats;

  fn label() -> &'static str {
    "department"
  }

  fn collection() -> &'static str {
    "departments"
  }

  fn provisional(input: &NewDepartment, temp_id: Id, now: DateTime<Utc>) -> Self {
    Self {
      id: temp_id,
      name: input.name.clone(),
      description: input.description.clone(),
      employee_count: 0,
      created_at: now,
      updated_at: now,
    }
  }

  fn apply_patch(&mut self, patch: &DepartmentPatch, now: DateTime<Utc>) {
    merge!(self, patch, { name });
    merge!(self, patch, optional { description });
    self.updated_at = now;
  }

  fn display_name(&self) -> String {
    format!("{} ({} employees)", self.name, self.employee_count)
  }

  fn default_policy() -> ResourcePolicy {
    ResourcePolicy::new(Duration::minutes(10), InvalidationPolicy::Awaited)
  }
}

impl Resource for ContractType {
  type Create = NewContractType;
  type Update = ContractTypePatch;
  type Stats = CountStats;

  fn label() -> &'static str {
    "contract type"
  }

  fn collection() -> &'static str {
    "contract-types"
  }

  fn provisional(input: &NewContractType, temp_id: Id, now: DateTime<Utc>) -> Self {
    Self {
      id: temp_id,
      name: input.name.clone(),
      description: input.description.clone(),
      is_active: input.is_active.unwrap_or(true),
      created_at: now,
      updated_at: now,
    }
  }

  fn apply_patch(&mut self, patch: &ContractTypePatch, now: DateTime<Utc>) {
    merge!(self, patch, { name, is_active });
    merge!(self, patch, optional { description });
    self.updated_at = now;
  }

  fn display_name(&self) -> String {
    if self.is_active {
      self.name.clone()
    } else {
      format!("{} (inactive)", self.name)
    }
  }

  fn default_policy() -> ResourcePolicy {
    ResourcePolicy::new(Duration::minutes(10), InvalidationPolicy::Awaited)
  }
}

impl Resource for User {
  type Create = NewUser;
  type Update = UserPatch;
  type Stats = CountStats;

  fn label() -> &'static str {
    "user"
  }

  fn collection() -> &'static str {
    "users"
  }

  fn provisional(input: &NewUser, temp_id: Id, now: DateTime<Utc>) -> Self {
    Self {
      id: temp_id,
      username: input.username.clone(),
      email: input.email.clone(),
      role: input.role.unwrap_or_default(),
      is_active: true,
      created_at: now,
      updated_at: now,
    }
  }

  fn apply_patch(&mut self, patch: &UserPatch, now: DateTime<Utc>) {
    // The password never comes back from the server
    merge!(self, patch, { username, email, role, is_active });
    self.updated_at = now;
  }

  fn display_name(&self) -> String {
    format!("{} <{}> {:?}", self.username, self.email, self.role)
  }

  fn default_policy() -> ResourcePolicy {
    ResourcePolicy::new(Duration::minutes(5), InvalidationPolicy::Awaited)
  }
}
