//! Records exchanged with the management API.
//!
//! Each entity comes with a create payload (display fields required, the rest
//! optional), a patch payload (every field optional, absent fields are not
//! sent), and the aggregate statistics returned by its `stats` endpoint.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

// ============================================================================
// Employees
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
  #[default]
  Active,
  Inactive,
  OnLeave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
  pub id: Id,
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  pub phone: Option<String>,
  pub position: Option<String>,
  pub department_id: Option<Id>,
  pub contract_type_id: Option<Id>,
  pub hourly_rate: Option<f64>,
  pub hire_date: Option<NaiveDate>,
  #[serde(default)]
  pub status: EmployeeStatus,
  /// Joined from the department by the server
  #[serde(default)]
  pub department_name: Option<String>,
  #[serde(default)]
  pub project_count: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Employee {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmployee {
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub department_id: Option<Id>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contract_type_id: Option<Id>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hourly_rate: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hire_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<EmployeeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeePatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub first_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub department_id: Option<Id>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contract_type_id: Option<Id>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hourly_rate: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hire_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<EmployeeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmployeeStats {
  pub total: i64,
  pub active: i64,
  pub inactive: i64,
  pub on_leave: i64,
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
  #[default]
  Planning,
  Active,
  OnHold,
  Completed,
  Cancelled,
}

/// An employee working on a project, with a role and date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAssignment {
  pub employee_id: Id,
  pub role: Option<String>,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: Id,
  pub name: String,
  pub description: Option<String>,
  pub client_name: Option<String>,
  #[serde(default)]
  pub status: ProjectStatus,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  pub budget: Option<f64>,
  #[serde(default)]
  pub assignments: Vec<ProjectAssignment>,
  #[serde(default)]
  pub total_invoiced: f64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub client_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<ProjectStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub budget: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub client_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<ProjectStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub budget: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectStats {
  pub total: i64,
  pub active: i64,
  pub completed: i64,
  pub total_budget: f64,
}

// ============================================================================
// Invoices
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
  #[default]
  Draft,
  Pending,
  Paid,
  Overdue,
  Cancelled,
}

/// Share of an invoice's cost attributed to an employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAllocation {
  pub employee_id: Id,
  pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
  pub id: Id,
  pub invoice_number: String,
  pub project_id: Option<Id>,
  pub client_name: String,
  pub amount: f64,
  #[serde(default)]
  pub tax_amount: f64,
  #[serde(default)]
  pub status: InvoiceStatus,
  pub issue_date: NaiveDate,
  pub due_date: Option<NaiveDate>,
  #[serde(default)]
  pub allocations: Vec<CostAllocation>,
  /// Joined from the project by the server
  #[serde(default)]
  pub project_name: Option<String>,
  /// amount + tax, computed by the server
  #[serde(default)]
  pub total: f64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
  pub invoice_number: String,
  pub client_name: String,
  pub amount: f64,
  pub issue_date: NaiveDate,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<Id>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tax_amount: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<InvoiceStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub allocations: Vec<CostAllocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoicePatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub invoice_number: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub client_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub amount: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tax_amount: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<Id>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<InvoiceStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub issue_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_date: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub allocations: Option<Vec<CostAllocation>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceStats {
  pub total: i64,
  pub paid_amount: f64,
  pub outstanding_amount: f64,
  pub overdue: i64,
}

// ============================================================================
// Departments, contract types, users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
  pub id: Id,
  pub name: String,
  pub description: Option<String>,
  #[serde(default)]
  pub employee_count: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDepartment {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepartmentPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractType {
  pub id: Id,
  pub name: String,
  pub description: Option<String>,
  #[serde(default = "default_true")]
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContractType {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractTypePatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Admin,
  Manager,
  Accountant,
  #[default]
  Viewer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: Id,
  pub username: String,
  pub email: String,
  #[serde(default)]
  pub role: Role,
  #[serde(default = "default_true")]
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
  pub username: String,
  pub email: String,
  pub password: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub password: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<Role>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

/// Statistics for entities whose `stats` endpoint only counts records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountStats {
  pub total: i64,
  pub active: Option<i64>,
}

fn default_true() -> bool {
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_patch_skips_absent_fields() {
    let patch = EmployeePatch {
      position: Some("Gaffer".to_string()),
      status: Some(EmployeeStatus::OnLeave),
      ..Default::default()
    };
    assert_eq!(
      serde_json::to_value(&patch).unwrap(),
      json!({"position": "Gaffer", "status": "on_leave"})
    );
  }

  #[test]
  fn test_invoice_defaults_server_fields() {
    let invoice: Invoice = serde_json::from_value(json!({
      "id": 12,
      "invoice_number": "INV-2024-012",
      "project_id": null,
      "client_name": "Northwind",
      "amount": 1200.0,
      "status": "overdue",
      "issue_date": "2024-03-01",
      "due_date": null,
      "created_at": "2024-03-01T10:00:00Z",
      "updated_at": "2024-03-02T10:00:00Z"
    }))
    .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Overdue);
    assert!(invoice.allocations.is_empty());
    assert_eq!(invoice.total, 0.0);
  }
}
